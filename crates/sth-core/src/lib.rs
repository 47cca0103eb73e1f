#![doc = r#"
# sth-core

## 设计动机（Why）
- **定位**：本 crate 承载短时历史（STH）服务的纯领域契约：命名空间到集合标识的
  解析规则、五档分辨率的桶算术、原始事件与聚合桶的数据模型，以及存储实现必须
  满足的异步契约。
- **架构角色**：作为分层的最底座，不依赖任何驱动或运行时；MongoDB 实现层
  （`sth-store-mongo`）与服务编排层（`sth-service`）都只经由这里的类型对话。
- **设计理念**：聚合增量建模为交换幺半群——任意摄取顺序产生逐字节相同的桶
  状态，这是并发写路径无需全局排序的根本依据，并由性质测试直接验证。

## 核心契约（What）
- **输入条件**：所有时间戳为 `DateTime<Utc>`；属性值在进入写路径前已归约为
  数值 / 文本二分（见 [`event::AttrValue`]）；
- **输出保障**：命名解析是纯函数且满足存储命名空间长度上限；桶的槽位寻址
  `(origin, slot_index)` 对同一事件恒定；
- **错误域**：全部失败以 [`error::SthError`] 表达，变体绑定稳定错误码。

## 实现策略（How）
- 时间算术集中在 [`time`]，聚合算术集中在 [`bucket`]，两者都保持纯函数形态，
  内存桩与 MongoDB 实现共享同一份语义；
- 存储契约（[`store::HistoricStore`]）对象安全，服务层以 `Arc<dyn _>` 注入，
  测试以 [`test_stubs::MemoryStore`] 替换。

## 风险与考量（Trade-offs）
- `day` 档固定 31 槽：短月尾部槽位空置，换取桶布局恒定与 O(1) 槽位寻址；
- 数值统一 `f64`：超出 2^53 的整数计数会损失精度，符合上游协议的取值域。
"#]

pub mod bucket;
pub mod error;
pub mod event;
pub mod namespace;
pub mod query;
pub mod store;
pub mod test_stubs;
pub mod time;

pub use async_trait::async_trait;

/// 常用类型的统一出口，供实现层与服务层 `use sth_core::prelude::*` 引入。
pub mod prelude {
    pub use crate::bucket::{
        AggrMethod, AggregateBucket, BucketProjection, ProjectedPoint, ProjectedValue,
        ProjectedValueEntry, SeriesKind, SlotContent,
    };
    pub use crate::error::{SthError, ValidationSource};
    pub use crate::event::{AttrValue, Notification, RawEvent};
    pub use crate::namespace::{Family, NameCodec, Namespace};
    pub use crate::query::{AggregateQuery, CsvFile, RawQuery, RawReply, SeriesFilter};
    pub use crate::store::{
        CollectionHandle, GetCollectionOptions, HistoricStore, ShouldStore, TruncationPolicy,
    };
    pub use crate::time::{Resolution, TimeRange};
}
