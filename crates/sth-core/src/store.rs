//! # store 模块说明
//!
//! ## 角色定位（Why）
//! - 以对象安全的异步契约界定存储实现的职责边界：集合供给（C2）、原始事件
//!   读写（C3）与聚合桶维护（C4）；
//! - 契约层不感知任何驱动类型，错误一律收敛为 [`SthError`]，使服务编排层
//!   可以在 MongoDB 实现与内存桩之间无差别切换。
//!
//! ## 核心契约（What）
//! - `get_collection`：`create = false` 时目标缺失返回
//!   [`SthError::CollectionNotFound`]（查询路径的预期分支）；`create = true`
//!   时按需创建，截断策略仅在首次创建时生效，散列模式下幂等写入反查记录；
//! - `update_aggregate`：对每个分辨率施加恰好一次增量，增量两两可交换；
//!   插入骨架与槽位更新对并发写者表现为一个原子对；
//! - 除 `CollectionNotFound` 外，错误原样上抛；空结果不是错误。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bucket::BucketProjection;
use crate::error::SthError;
use crate::event::RawEvent;
use crate::namespace::{Family, Namespace};
use crate::query::{AggregateQuery, RawQuery, RawReply};
use crate::time::Resolution;

/// 写路径的存储模式：只写原始、只写聚合或双写。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShouldStore {
    OnlyRaw,
    OnlyAggregated,
    Both,
}

impl ShouldStore {
    /// 解析配置取值（`ONLY_RAW | ONLY_AGGREGATED | BOTH`）。
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ONLY_RAW" => Some(Self::OnlyRaw),
            "ONLY_AGGREGATED" => Some(Self::OnlyAggregated),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }

    /// 本模式是否写原始族。
    pub fn wants_raw(self) -> bool {
        matches!(self, Self::OnlyRaw | Self::Both)
    }

    /// 本模式是否写聚合族。
    pub fn wants_aggregated(self) -> bool {
        matches!(self, Self::OnlyAggregated | Self::Both)
    }
}

/// 集合截断策略，仅在集合首次创建时落地。
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TruncationPolicy {
    /// 不截断。
    None,
    /// 按事件年龄过期。
    Age { expire_after: Duration },
    /// 按集合体量封顶。
    Size {
        max_bytes: u64,
        max_documents: Option<u64>,
    },
}

/// `get_collection` 的行为开关。
#[derive(Clone, Debug)]
pub struct GetCollectionOptions {
    pub family: Family,
    /// 为假时缺失即 `CollectionNotFound`；为真时按需创建。
    pub create: bool,
    /// 散列模式下首次创建时是否写入反查记录。
    pub store_hash: bool,
    pub truncation: TruncationPolicy,
}

impl GetCollectionOptions {
    /// 查询路径的惯用组合：不创建、不写反查、不截断。
    pub fn lookup(family: Family) -> Self {
        Self {
            family,
            create: false,
            store_hash: false,
            truncation: TruncationPolicy::None,
        }
    }

    /// 摄取路径的惯用组合：创建、写反查，截断策略由配置给定。
    pub fn provision(family: Family, truncation: TruncationPolicy) -> Self {
        Self {
            family,
            create: true,
            store_hash: true,
            truncation,
        }
    }
}

/// 已定位集合的不透明句柄。
///
/// 仅携带寻址信息；句柄可被克隆、跨任务传递，实现层不得在其中缓存连接。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CollectionHandle {
    pub database: String,
    pub collection: String,
    pub family: Family,
}

/// 短时历史存储的统一异步契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务编排层（摄取协调器与查询规划器）只依赖本契约，驱动细节被隔离在
///   实现 crate 中；测试以内存桩替换真实存储，覆盖全部编排语义。
///
/// ## 并发（Concurrency）
/// - 所有方法可被任意多任务并发调用；实现内部唯一的共享可变资源应当是
///   驱动连接池；
/// - `update_aggregate` 的增量是交换幺半群：并发写同一槽位不丢更新。
#[async_trait]
pub trait HistoricStore: Send + Sync {
    /// 定位（或创建）命名空间对应族的集合。
    async fn get_collection(
        &self,
        namespace: &Namespace,
        options: &GetCollectionOptions,
    ) -> Result<CollectionHandle, SthError>;

    /// 追加一条原始事件。无去重；并发追加相互独立。
    async fn store_raw(&self, handle: &CollectionHandle, event: &RawEvent) -> Result<(), SthError>;

    /// 执行一次原始查询。
    async fn query_raw(
        &self,
        handle: &CollectionHandle,
        query: &RawQuery,
    ) -> Result<RawReply, SthError>;

    /// 将一个事件并入给定分辨率集合的聚合桶，每个分辨率恰好一次增量。
    async fn update_aggregate(
        &self,
        handle: &CollectionHandle,
        event: &RawEvent,
        resolutions: &[Resolution],
    ) -> Result<(), SthError>;

    /// 执行一次聚合查询，返回窗内每个桶的投影。
    async fn query_aggregate(
        &self,
        handle: &CollectionHandle,
        query: &AggregateQuery,
    ) -> Result<Vec<BucketProjection>, SthError>;
}
