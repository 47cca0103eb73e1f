#![doc = r#"
# sth-store-mongo

## 设计动机（Why）
- **定位**：本 crate 是 `sth-core` 存储契约（[`HistoricStore`]）在 MongoDB 上的
  实现层，封装集合供给、原始事件读写、聚合桶原子更新与 CSV 物化等落地细节。
- **架构角色**：作为实现层积木，只向上暴露契约类型；驱动错误在边界处统一
  映射为稳定错误域，服务编排层对驱动无感。
- **设计理念**：聚合桶的“插入骨架 + 槽位增量”以幂等插入（确定性 `_id`，
  重复键即他人已就位）模拟原子对，并发写者对同一槽位不丢增量。

## 核心契约（What）
- **输入条件**：调用方必须在 Tokio 运行时中使用本实现；句柄均来自本实现的
  `get_collection`；
- **输出保障**：查询路径的集合缺失返回 `CollectionNotFound` 预期分支，其余
  错误以 `SthError::Store` 携带驱动原因链上抛；
- **共享资源**：驱动连接池是唯一的共享可变资源，池饱和时子任务在驱动内
  排队。

## 风险与考量（Trade-offs）
- **TTL 精度**：年龄截断依赖 MongoDB 的 TTL 扫描周期（默认约 60s），过期
  存在分钟级迟滞；
- **occur 键空间**：文本值作为文档键存储，须经转义消除路径歧义字符，读取
  时逆转义还原。
"#]

mod aggregate;
mod client;
mod error;
mod provider;
mod raw;

pub use client::{MongoStore, MongoStoreConfig};

use async_trait::async_trait;
use sth_core::prelude::{
    AggregateQuery, BucketProjection, CollectionHandle, GetCollectionOptions, HistoricStore,
    Namespace, RawEvent, RawQuery, RawReply, Resolution, SthError,
};

#[async_trait]
impl HistoricStore for MongoStore {
    async fn get_collection(
        &self,
        namespace: &Namespace,
        options: &GetCollectionOptions,
    ) -> Result<CollectionHandle, SthError> {
        provider::get_collection(self, namespace, options).await
    }

    async fn store_raw(&self, handle: &CollectionHandle, event: &RawEvent) -> Result<(), SthError> {
        raw::store_raw(self, handle, event).await
    }

    async fn query_raw(
        &self,
        handle: &CollectionHandle,
        query: &RawQuery,
    ) -> Result<RawReply, SthError> {
        raw::query_raw(self, handle, query).await
    }

    async fn update_aggregate(
        &self,
        handle: &CollectionHandle,
        event: &RawEvent,
        resolutions: &[Resolution],
    ) -> Result<(), SthError> {
        aggregate::update_aggregate(self, handle, event, resolutions).await
    }

    async fn query_aggregate(
        &self,
        handle: &CollectionHandle,
        query: &AggregateQuery,
    ) -> Result<Vec<BucketProjection>, SthError> {
        aggregate::query_aggregate(self, handle, query).await
    }
}
