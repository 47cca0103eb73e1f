//! # ingest 模块说明
//!
//! ## 角色定位（Why）
//! - 摄取协调器：把一条通知展平为属性级写任务，按存储模式对每个属性派发
//!   原始写与/或聚合更新，汇合全部子任务后给出**唯一**一次回复；
//! - 单属性的原始写与聚合更新相互独立，完成顺序不作承诺；跨通知亦无排序，
//!   聚合增量的交换律保证末态一致。
//!
//! ## 核心契约（What）
//! - 展平阶段剔除不可聚合的属性值（对象 / 数组 / 布尔 / null，及按配置剔除
//!   空白字符串）；剔除后为空 → 载荷校验错误；
//! - 设 N 为保留属性数，子任务总数为 N 或 2N（取决于存储模式）；
//! - 回复携带按完成序观察到的**首个**错误；全部成功则为成功；
//! - 属性携带 `TimeInstant` 元数据时以其为该属性的事件时刻，否则取服务端
//!   接收时刻。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use sth_core::prelude::*;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::ServiceConfig;

/// 展平后的单个写单元：一条命名空间定位加一条事件。
struct PendingWrite {
    namespace: Namespace,
    event: RawEvent,
}

/// 处理一条通知：展平、派发、汇合、给出唯一结果。
///
/// 返回成功派发并全部落库的子任务数；任一子任务失败时返回首个错误。
pub async fn ingest_notification(
    store: Arc<dyn HistoricStore>,
    config: &ServiceConfig,
    service: &str,
    service_path: &str,
    notification: &Notification,
    recv_time: DateTime<Utc>,
) -> Result<usize, SthError> {
    let pending = flatten(config, service, service_path, notification, recv_time);
    if pending.is_empty() {
        return Err(SthError::validation(
            ValidationSource::Payload,
            ["attributes"],
        ));
    }

    let truncation = config.truncation.policy()?;
    let resolutions: Arc<[Resolution]> = Arc::from(config.resolutions.as_slice());

    // 子任务以脱离请求生命周期的方式派发：请求被取消时句柄随本函数一并
    // 丢弃，但在途存储操作仍运行至完成，且不会再有第二次回复。
    let mut tasks: FuturesUnordered<JoinHandle<Result<(), SthError>>> = FuturesUnordered::new();
    for write in pending {
        let write = Arc::new(write);
        if config.should_store.wants_raw() {
            let store = Arc::clone(&store);
            let write = Arc::clone(&write);
            let options = GetCollectionOptions::provision(Family::Raw, truncation);
            tasks.push(tokio::spawn(async move {
                let handle = store.get_collection(&write.namespace, &options).await?;
                store.store_raw(&handle, &write.event).await
            }));
        }
        if config.should_store.wants_aggregated() {
            let store = Arc::clone(&store);
            let write = Arc::clone(&write);
            let resolutions = Arc::clone(&resolutions);
            let options = GetCollectionOptions::provision(Family::Aggregated, truncation);
            tasks.push(tokio::spawn(async move {
                let handle = store.get_collection(&write.namespace, &options).await?;
                store.update_aggregate(&handle, &write.event, &resolutions).await
            }));
        }
    }

    // 按完成序汇合全部子任务；首个错误决定回复，其余完成仅作日志。
    let mut settled = 0usize;
    let mut any_success = false;
    let mut first_error: Option<SthError> = None;
    while let Some(joined) = tasks.next().await {
        settled += 1;
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => Err(SthError::store("join", join_err.to_string())),
        };
        match outcome {
            Ok(()) => any_success = true,
            Err(err) => {
                warn!(code = err.code(), error = %err, "ingest subtask failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        // 子属性的集合缺失仅在全部子任务失败时决定回复。
        Some(SthError::CollectionNotFound { .. }) if any_success => Ok(settled),
        Some(err) => Err(err),
        None => Ok(settled),
    }
}

/// 将通知展平为属性级写单元，剔除不可聚合的取值。
fn flatten(
    config: &ServiceConfig,
    service: &str,
    service_path: &str,
    notification: &Notification,
    recv_time: DateTime<Utc>,
) -> Vec<PendingWrite> {
    let mut pending = Vec::new();
    for response in &notification.context_responses {
        let element = &response.context_element;
        for attribute in &element.attributes {
            let Some(value) = AttrValue::from_json(&attribute.value, config.ignore_blank_spaces)
            else {
                continue;
            };
            let event_time = attribute.time_instant().unwrap_or(recv_time);
            pending.push(PendingWrite {
                namespace: Namespace {
                    service: service.to_owned(),
                    service_path: service_path.to_owned(),
                    entity_id: element.id.clone(),
                    entity_type: element.entity_type.clone(),
                    attr_name: attribute.name.clone(),
                },
                event: RawEvent {
                    recv_time: event_time,
                    entity_id: element.id.clone(),
                    entity_type: element.entity_type.clone(),
                    attr_name: attribute.name.clone(),
                    attr_type: attribute.attr_type.clone(),
                    attr_value: value,
                },
            });
        }
    }
    pending
}
