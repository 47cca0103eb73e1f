#![doc = r#"
# sth-service

## 设计动机（Why）
- **定位**：短时历史服务的编排层：HTTP 表面、摄取协调器、查询规划器、
  KPI 计数与进程生命周期在此汇聚；
- **架构角色**：只依赖 `sth-core` 的契约对话存储，生产装配注入 MongoDB
  实现，测试装配注入内存桩，编排语义在两种装配下完全一致；
- **设计理念**：每条通知对应**恰好一次**回复——属性级子任务并行派发、
  统一汇合，首个错误决定回复，其余完成只是副作用。

## 核心契约（What）
- **查询**：原始与聚合两条读路径互斥派发；未知命名空间是 `values: []`
  的 200，不是 404；
- **摄取**：租户头缺失回退配置默认值；畸形载荷以结构化校验体回复 400；
- **运维**：`attendedRequests` 按受理请求递增并周期上报，`/version`
  暴露 crate 版本。
"#]

pub mod config;
pub mod envelope;
pub mod http;
pub mod ingest;
pub mod kpi;
pub mod lifecycle;
pub mod planner;
