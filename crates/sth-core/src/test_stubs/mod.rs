//! 面向测试的存储桩集合，集中提供 [`HistoricStore`] 的内存实现。
//!
//! # 设计定位（Why）
//! - 服务编排层的端到端测试需要一个不依赖外部 MongoDB 的存储实现；
//! - 内存桩直接复用 [`crate::bucket`] 的纯聚合算术，使编排测试同时覆盖
//!   聚合引擎的槽位语义；
//! - 统一出口避免各测试文件重复定义桩类型，契约演进时获得集中编译错误提示。
//!
//! # 使用方式（How）
//! - `MemoryStore::default()` 即可作为 `Arc<dyn HistoricStore>` 注入服务；
//! - 通过 [`MemoryStore::aggregate_bucket`] / [`MemoryStore::raw_count`]
//!   直接断言存储末态；
//! - 通过 [`MemoryStore::fail_raw_writes`] 注入原始写失败，驱动“首个错误”
//!   一类的编排断言。
//!
//! # 风险提示（Trade-offs）
//! - 桩以单进程互斥锁串行化内部状态，不复现真实驱动的并发交错；
//!   并发交换律由 `sth-core` 的性质测试单独覆盖。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::bucket::{self, AggregateBucket, BucketProjection, SeriesKind};
use crate::error::SthError;
use crate::event::RawEvent;
use crate::namespace::{self, Family, NameCodec, Namespace};
use crate::query::{AggregateQuery, CsvFile, RawQuery, RawReply, SeriesFilter};
use crate::store::{CollectionHandle, GetCollectionOptions, HistoricStore};
use crate::time::Resolution;

#[derive(Clone, Eq, Hash, PartialEq)]
struct BucketKey {
    database: String,
    collection: String,
    entity_id: String,
    entity_type: String,
    attr_name: String,
    resolution: Resolution,
    origin: DateTime<Utc>,
}

/// [`HistoricStore`] 的内存实现。
///
/// 集合命名复用生产解析器（路径模式），保证桩与真实实现对同一命名空间
/// 产生相同的句柄。
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<(String, String), Family>>,
    raw: Mutex<HashMap<(String, String), Vec<RawEvent>>>,
    buckets: Mutex<HashMap<BucketKey, AggregateBucket>>,
    fail_raw: AtomicBool,
    csv_serial: AtomicU64,
}

impl MemoryStore {
    /// 注入（或解除）原始写失败。
    pub fn fail_raw_writes(&self, fail: bool) {
        self.fail_raw.store(fail, Ordering::SeqCst);
    }

    /// 句柄下的原始事件条数。
    pub fn raw_count(&self, handle: &CollectionHandle) -> usize {
        self.raw
            .lock()
            .get(&(handle.database.clone(), handle.collection.clone()))
            .map_or(0, Vec::len)
    }

    /// 读取一个聚合桶的完整末态，缺失时返回 `None`。
    pub fn aggregate_bucket(
        &self,
        handle: &CollectionHandle,
        filter: &SeriesFilter,
        resolution: Resolution,
        origin: DateTime<Utc>,
    ) -> Option<AggregateBucket> {
        self.buckets
            .lock()
            .get(&BucketKey {
                database: handle.database.clone(),
                collection: handle.collection.clone(),
                entity_id: filter.entity_id.clone(),
                entity_type: filter.entity_type.clone(),
                attr_name: filter.attr_name.clone(),
                resolution,
                origin,
            })
            .cloned()
    }

    fn matching_events(
        &self,
        handle: &CollectionHandle,
        query: &RawQuery,
    ) -> Vec<RawEvent> {
        let raw = self.raw.lock();
        let Some(events) = raw.get(&(handle.database.clone(), handle.collection.clone())) else {
            return Vec::new();
        };
        let filter = query.filter();
        let range = query.range();
        let mut matching: Vec<RawEvent> = events
            .iter()
            .filter(|event| {
                event.entity_id == filter.entity_id
                    && event.entity_type == filter.entity_type
                    && event.attr_name == filter.attr_name
                    && range.contains(event.recv_time)
            })
            .cloned()
            .collect();
        // 稳定排序：同刻事件保持插入序。
        matching.sort_by_key(|event| event.recv_time);
        matching
    }
}

#[async_trait::async_trait]
impl HistoricStore for MemoryStore {
    async fn get_collection(
        &self,
        ns: &Namespace,
        options: &GetCollectionOptions,
    ) -> Result<CollectionHandle, SthError> {
        let database = namespace::database_name(&ns.service);
        let collection = namespace::resolve(ns, options.family, NameCodec::Path)?;
        let key = (database.clone(), collection.clone());

        let mut collections = self.collections.lock();
        if !collections.contains_key(&key) {
            if !options.create {
                return Err(SthError::CollectionNotFound { collection });
            }
            collections.insert(key, options.family);
        }
        Ok(CollectionHandle {
            database,
            collection,
            family: options.family,
        })
    }

    async fn store_raw(&self, handle: &CollectionHandle, event: &RawEvent) -> Result<(), SthError> {
        if self.fail_raw.load(Ordering::SeqCst) {
            return Err(SthError::store("insert", "injected raw-write failure"));
        }
        self.raw
            .lock()
            .entry((handle.database.clone(), handle.collection.clone()))
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn query_raw(
        &self,
        handle: &CollectionHandle,
        query: &RawQuery,
    ) -> Result<RawReply, SthError> {
        let matching = self.matching_events(handle, query);
        match query {
            RawQuery::LastN { n, .. } => {
                let skip = matching.len().saturating_sub(*n as usize);
                Ok(RawReply::Inline(matching[skip..].to_vec()))
            }
            RawQuery::Window {
                h_limit, h_offset, ..
            } => Ok(RawReply::Inline(
                matching
                    .into_iter()
                    .skip(*h_offset as usize)
                    .take(*h_limit as usize)
                    .collect(),
            )),
            RawQuery::Csv { filter, .. } => {
                let serial = self.csv_serial.fetch_add(1, Ordering::Relaxed);
                // 进程号加桩实例地址加序号，保证并行测试间路径唯一。
                let path = std::env::temp_dir().join(format!(
                    "sth-stub-{}-{:x}-{serial}.csv",
                    std::process::id(),
                    std::ptr::from_ref(self) as usize,
                ));
                let mut body = String::from("recvTime,entityId,entityType,attrName,attrType,attrValue\n");
                for event in &matching {
                    body.push_str(&format!(
                        "{},{},{},{},{},{}\n",
                        event.recv_time.to_rfc3339(),
                        event.entity_id,
                        event.entity_type,
                        event.attr_name,
                        event.attr_type,
                        event.attr_value.render(),
                    ));
                }
                std::fs::write(&path, body)
                    .map_err(|err| SthError::store_with_cause("csv", "stub csv write failed", err))?;
                Ok(RawReply::File(CsvFile::new(
                    path,
                    format!("{}.csv", filter.attr_name),
                )))
            }
        }
    }

    async fn update_aggregate(
        &self,
        handle: &CollectionHandle,
        event: &RawEvent,
        resolutions: &[Resolution],
    ) -> Result<(), SthError> {
        let mut buckets = self.buckets.lock();
        for &resolution in resolutions {
            let origin = resolution.origin(event.recv_time);
            let key = BucketKey {
                database: handle.database.clone(),
                collection: handle.collection.clone(),
                entity_id: event.entity_id.clone(),
                entity_type: event.entity_type.clone(),
                attr_name: event.attr_name.clone(),
                resolution,
                origin,
            };
            let bucket = buckets.entry(key).or_insert_with(|| {
                AggregateBucket::skeleton(
                    event.entity_id.clone(),
                    event.entity_type.clone(),
                    event.attr_name.clone(),
                    resolution,
                    origin,
                    SeriesKind::of(&event.attr_value),
                )
            });
            bucket.apply(event.recv_time, &event.attr_value)?;
        }
        Ok(())
    }

    async fn query_aggregate(
        &self,
        handle: &CollectionHandle,
        query: &AggregateQuery,
    ) -> Result<Vec<BucketProjection>, SthError> {
        let from = query.range.from.map(|t| query.resolution.origin(t));
        let to = query.range.to.map(|t| query.resolution.origin(t));

        let buckets = self.buckets.lock();
        let mut selected: Vec<&AggregateBucket> = buckets
            .iter()
            .filter(|(key, _)| {
                key.database == handle.database
                    && key.collection == handle.collection
                    && key.entity_id == query.filter.entity_id
                    && key.entity_type == query.filter.entity_type
                    && key.attr_name == query.filter.attr_name
                    && key.resolution == query.resolution
                    && from.is_none_or(|from| key.origin >= from)
                    && to.is_none_or(|to| key.origin <= to)
            })
            .map(|(_, bucket)| bucket)
            .collect();
        selected.sort_by_key(|bucket| bucket.origin);

        selected
            .into_iter()
            .map(|bucket| bucket::project(bucket, query.method, query.filter_empty))
            .collect()
    }
}
