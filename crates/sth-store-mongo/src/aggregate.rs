//! # aggregate 模块说明
//!
//! ## 角色定位（Why）
//! - 实现聚合族（C4）的持久化：每个事件对每个启用分辨率施加恰好一次槽位
//!   增量，并以点查回答聚合查询；
//! - 桶文档的 `_id` 完整编码桶键 `(序列, 分辨率, 起点)`，聚合查询的代价只与
//!   窗内桶数相关，与原始事件量无关。
//!
//! ## 更新协议（How）
//! - 驱动不提供“插入骨架并更新槽位”的单条原子操作（`$setOnInsert` 与 `$inc`
//!   不能作用于同一路径），按契约允许的等价序列模拟：
//!   1. 直接 `update_one` 槽位增量；命中即完成；
//!   2. 未命中则插入预物化骨架（确定性 `_id`，重复键视为他人已插入）；
//!   3. 重试一次增量。两名并发写者最多各经历一次重复键，增量不会丢失。
//! - 数值增量用 `$inc/$min/$max`，骨架以 `min = +∞`、`max = -∞` 为单位元，
//!   首个样本与后续样本走同一条路径；
//! - 文本增量 `$inc` occur 计数；occur 键经转义消除 `.`、`$` 等路径歧义字符。
//!
//! ## 核心契约（What）
//! - 槽位增量两两可交换；
//! - 方法与桶形态不符（`occur` 对数值桶，数值方法对文本桶）→
//!   [`SthError::TypeMismatch`]。

use std::collections::BTreeMap;

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use sth_core::bucket::{self, AggregateBucket, BucketProjection, SeriesKind, SlotContent};
use sth_core::prelude::{
    AggregateQuery, AttrValue, CollectionHandle, RawEvent, Resolution, SthError,
};

use crate::client::MongoStore;
use crate::error::{is_duplicate_key, map_store_error};

/// 桶文档的确定性 `_id`。
pub(crate) fn bucket_id(
    entity_id: &str,
    entity_type: &str,
    attr_name: &str,
    resolution: Resolution,
    origin: chrono::DateTime<chrono::Utc>,
) -> Document {
    doc! {
        "entityId": entity_id,
        "entityType": entity_type,
        "attrName": attr_name,
        "resolution": resolution.as_str(),
        "origin": BsonDateTime::from_millis(origin.timestamp_millis()),
    }
}

/// 预物化骨架：`points` 以单位元填满正确长度，此后更新均为原地修改。
pub(crate) fn skeleton_document(
    event: &RawEvent,
    resolution: Resolution,
    origin: chrono::DateTime<chrono::Utc>,
    kind: SeriesKind,
) -> Document {
    let empty_slot = match kind {
        SeriesKind::Numeric => doc! {
            "samples": 0_i64,
            "sum": 0.0,
            "sum2": 0.0,
            "min": f64::INFINITY,
            "max": f64::NEG_INFINITY,
        },
        SeriesKind::Textual => doc! { "samples": 0_i64, "occur": {} },
    };
    let points: Vec<Bson> = (0..resolution.slots())
        .map(|_| Bson::Document(empty_slot.clone()))
        .collect();
    doc! {
        "_id": bucket_id(
            &event.entity_id,
            &event.entity_type,
            &event.attr_name,
            resolution,
            origin,
        ),
        "attrKind": kind.as_str(),
        "points": points,
    }
}

/// 单个槽位的增量更新文档。
pub(crate) fn delta_document(slot: usize, value: &AttrValue) -> Document {
    match value {
        AttrValue::Number(v) => {
            let v = *v;
            doc! {
                "$inc": {
                    format!("points.{slot}.samples"): 1_i64,
                    format!("points.{slot}.sum"): v,
                    format!("points.{slot}.sum2"): v * v,
                },
                "$min": { format!("points.{slot}.min"): v },
                "$max": { format!("points.{slot}.max"): v },
            }
        }
        AttrValue::Text(text) => doc! {
            "$inc": {
                format!("points.{slot}.samples"): 1_i64,
                format!("points.{slot}.occur.{}", escape_occur_key(text)): 1_i64,
            },
        },
    }
}

/// 转义 occur 键中的存储路径歧义字符（`.`、前导 `$`、NUL 与转义符自身）。
pub(crate) fn escape_occur_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '.' => out.push_str("%2E"),
            '$' => out.push_str("%24"),
            '\0' => out.push_str("%00"),
            other => out.push(other),
        }
    }
    out
}

/// [`escape_occur_key`] 的逆变换；未知转义序列原样保留。
pub(crate) fn unescape_occur_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let escaped: String = chars.clone().take(2).collect();
        match escaped.as_str() {
            "25" => out.push('%'),
            "2E" => out.push('.'),
            "24" => out.push('$'),
            "00" => out.push('\0'),
            _ => {
                out.push('%');
                continue;
            }
        }
        chars.next();
        chars.next();
    }
    out
}

pub(crate) async fn update_aggregate(
    store: &MongoStore,
    handle: &CollectionHandle,
    event: &RawEvent,
    resolutions: &[Resolution],
) -> Result<(), SthError> {
    let collection = store
        .client
        .database(&handle.database)
        .collection::<Document>(&handle.collection);
    let kind = SeriesKind::of(&event.attr_value);

    for &resolution in resolutions {
        let origin = resolution.origin(event.recv_time);
        let slot = resolution.slot_index(event.recv_time);
        let id = bucket_id(
            &event.entity_id,
            &event.entity_type,
            &event.attr_name,
            resolution,
            origin,
        );
        // 过滤条件同时钉住形态：异型桶不命中，由下方的不动点检查转成 TypeMismatch。
        let filter = doc! { "_id": &id, "attrKind": kind.as_str() };
        let delta = delta_document(slot, &event.attr_value);

        let first = collection
            .update_one(filter.clone(), delta.clone())
            .await
            .map_err(|err| map_store_error("update_aggregate", err))?;
        if first.matched_count > 0 {
            continue;
        }

        match collection
            .insert_one(skeleton_document(event, resolution, origin, kind))
            .await
        {
            Ok(_) => {}
            Err(err) if is_duplicate_key(&err) => {
                // 并发插入竞态：他人的骨架已就位，直接走重试更新。
            }
            Err(err) => return Err(map_store_error("insert_skeleton", err)),
        }

        let second = collection
            .update_one(filter, delta)
            .await
            .map_err(|err| map_store_error("update_aggregate", err))?;
        if second.matched_count == 0 {
            // 骨架在位却仍未命中：唯一解释是既有桶的形态与本事件相反。
            return Err(SthError::TypeMismatch {
                method: "update",
                kind: kind.as_str(),
            });
        }
    }
    Ok(())
}

pub(crate) async fn query_aggregate(
    store: &MongoStore,
    handle: &CollectionHandle,
    query: &AggregateQuery,
) -> Result<Vec<BucketProjection>, SthError> {
    let collection = store
        .client
        .database(&handle.database)
        .collection::<Document>(&handle.collection);

    let mut filter = doc! {
        "_id.entityId": &query.filter.entity_id,
        "_id.entityType": &query.filter.entity_type,
        "_id.attrName": &query.filter.attr_name,
        "_id.resolution": query.resolution.as_str(),
    };
    let mut bounds = Document::new();
    if let Some(from) = query.range.from {
        let origin = query.resolution.origin(from);
        bounds.insert("$gte", BsonDateTime::from_millis(origin.timestamp_millis()));
    }
    if let Some(to) = query.range.to {
        let origin = query.resolution.origin(to);
        bounds.insert("$lte", BsonDateTime::from_millis(origin.timestamp_millis()));
    }
    if !bounds.is_empty() {
        filter.insert("_id.origin", bounds);
    }

    let cursor = collection
        .find(filter)
        .sort(doc! { "_id.origin": 1 })
        .await
        .map_err(|err| map_store_error("find", err))?;
    let documents: Vec<Document> = cursor
        .try_collect()
        .await
        .map_err(|err| map_store_error("find", err))?;

    documents
        .iter()
        .map(|document| {
            let bucket = bucket_from_document(document)?;
            bucket::project(&bucket, query.method, query.filter_empty)
        })
        .collect()
}

/// 桶文档还原为领域模型；形态不符视为存储被外部改写。
pub(crate) fn bucket_from_document(document: &Document) -> Result<AggregateBucket, SthError> {
    let id = document
        .get_document("_id")
        .map_err(|err| SthError::store_with_cause("decode", "_id missing", err))?;
    let text = |doc: &Document, key: &str| -> Result<String, SthError> {
        doc.get_str(key)
            .map(str::to_owned)
            .map_err(|err| SthError::store_with_cause("decode", format!("{key} missing"), err))
    };

    let resolution = Resolution::parse(&text(id, "resolution")?)
        .ok_or_else(|| SthError::store("decode", "unknown resolution"))?;
    let origin_millis = id
        .get_datetime("origin")
        .map_err(|err| SthError::store_with_cause("decode", "origin missing", err))?
        .timestamp_millis();
    let origin = chrono::DateTime::from_timestamp_millis(origin_millis)
        .ok_or_else(|| SthError::store("decode", "origin out of range"))?;

    let kind = match document.get_str("attrKind") {
        Ok("numeric") => SeriesKind::Numeric,
        Ok("textual") => SeriesKind::Textual,
        _ => return Err(SthError::store("decode", "attrKind missing")),
    };

    let raw_points = document
        .get_array("points")
        .map_err(|err| SthError::store_with_cause("decode", "points missing", err))?;
    let mut points = Vec::with_capacity(raw_points.len());
    for entry in raw_points {
        let Bson::Document(slot) = entry else {
            return Err(SthError::store("decode", "point is not a document"));
        };
        points.push(slot_from_document(slot, kind)?);
    }

    Ok(AggregateBucket {
        entity_id: text(id, "entityId")?,
        entity_type: text(id, "entityType")?,
        attr_name: text(id, "attrName")?,
        resolution,
        origin,
        kind,
        points,
    })
}

fn slot_from_document(slot: &Document, kind: SeriesKind) -> Result<SlotContent, SthError> {
    let samples = integer(slot, "samples")?;
    match kind {
        SeriesKind::Numeric => Ok(SlotContent::Numeric {
            samples,
            sum: number(slot, "sum")?,
            sum2: number(slot, "sum2")?,
            min: number(slot, "min")?,
            max: number(slot, "max")?,
        }),
        SeriesKind::Textual => {
            let mut occur = BTreeMap::new();
            if let Ok(entries) = slot.get_document("occur") {
                for (key, value) in entries {
                    let count = match value {
                        Bson::Int32(v) => *v as u64,
                        Bson::Int64(v) => *v as u64,
                        Bson::Double(v) => *v as u64,
                        other => {
                            return Err(SthError::store(
                                "decode",
                                format!("occur count has unsupported shape: {other:?}"),
                            ))
                        }
                    };
                    occur.insert(unescape_occur_key(key), count);
                }
            }
            Ok(SlotContent::Textual { samples, occur })
        }
    }
}

fn integer(slot: &Document, key: &str) -> Result<u64, SthError> {
    match slot.get(key) {
        Some(Bson::Int32(v)) => Ok(*v as u64),
        Some(Bson::Int64(v)) => Ok(*v as u64),
        Some(Bson::Double(v)) => Ok(*v as u64),
        other => Err(SthError::store(
            "decode",
            format!("{key} has unsupported shape: {other:?}"),
        )),
    }
}

fn number(slot: &Document, key: &str) -> Result<f64, SthError> {
    match slot.get(key) {
        Some(Bson::Double(v)) => Ok(*v),
        Some(Bson::Int32(v)) => Ok(f64::from(*v)),
        Some(Bson::Int64(v)) => Ok(*v as f64),
        other => Err(SthError::store(
            "decode",
            format!("{key} has unsupported shape: {other:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sth_core::bucket::AggrMethod;

    fn event() -> RawEvent {
        RawEvent {
            recv_time: Utc
                .with_ymd_and_hms(2020, 3, 15, 10, 11, 7)
                .single()
                .expect("fixed timestamp"),
            entity_id: "Sensor:1".into(),
            entity_type: "Sensor".into(),
            attr_name: "t".into(),
            attr_type: "float".into(),
            attr_value: AttrValue::Number(21.5),
        }
    }

    #[test]
    fn skeleton_pre_materialises_all_slots() {
        let origin = Resolution::Second.origin(event().recv_time);
        let skeleton = skeleton_document(&event(), Resolution::Second, origin, SeriesKind::Numeric);
        let points = skeleton.get_array("points").expect("points array");
        assert_eq!(points.len(), 60);

        let Bson::Document(slot) = &points[0] else {
            panic!("slot document expected");
        };
        assert_eq!(slot.get_f64("min").expect("min"), f64::INFINITY);
        assert_eq!(slot.get_f64("max").expect("max"), f64::NEG_INFINITY);
    }

    #[test]
    fn numeric_delta_targets_one_slot() {
        let delta = delta_document(7, &AttrValue::Number(21.5));
        let inc = delta.get_document("$inc").expect("$inc");
        assert_eq!(inc.get_i64("points.7.samples").expect("samples"), 1);
        assert_eq!(inc.get_f64("points.7.sum").expect("sum"), 21.5);
        assert_eq!(inc.get_f64("points.7.sum2").expect("sum2"), 462.25);
        assert_eq!(
            delta
                .get_document("$min")
                .expect("$min")
                .get_f64("points.7.min")
                .expect("min"),
            21.5
        );
    }

    #[test]
    fn textual_delta_counts_escaped_key() {
        let delta = delta_document(3, &AttrValue::Text("a.b$c".into()));
        let inc = delta.get_document("$inc").expect("$inc");
        assert_eq!(inc.get_i64("points.3.occur.a%2Eb%24c").expect("occur"), 1);
    }

    #[test]
    fn occur_key_escaping_round_trips() {
        for key in ["plain", "a.b", "$lead", "100%", "%2E", "a\0b", "中文值"] {
            let escaped = escape_occur_key(key);
            assert!(!escaped.contains('.') && !escaped.contains('$') && !escaped.contains('\0'));
            assert_eq!(unescape_occur_key(&escaped), key, "key `{key}`");
        }
    }

    #[test]
    fn bucket_document_round_trips_and_projects() {
        let event = event();
        let origin = Resolution::Second.origin(event.recv_time);
        let mut document = skeleton_document(&event, Resolution::Second, origin, SeriesKind::Numeric);

        // 模拟一次增量落地后的槽位状态。
        let points = document.get_array_mut("points").expect("points array");
        points[7] = Bson::Document(doc! {
            "samples": 1_i64,
            "sum": 21.5,
            "sum2": 462.25,
            "min": 21.5,
            "max": 21.5,
        });

        let bucket = bucket_from_document(&document).expect("decode bucket");
        assert_eq!(bucket.resolution, Resolution::Second);
        assert_eq!(bucket.origin, origin);
        assert_eq!(bucket.points[7].samples(), 1);

        let projection = bucket::project(&bucket, AggrMethod::Sum, true).expect("projection");
        assert_eq!(projection.points.len(), 1);
        assert_eq!(projection.points[0].offset, 7);
    }

    #[test]
    fn textual_bucket_restores_unescaped_occur() {
        let mut event = event();
        event.attr_value = AttrValue::Text("a.b".into());
        let origin = Resolution::Second.origin(event.recv_time);
        let mut document = skeleton_document(&event, Resolution::Second, origin, SeriesKind::Textual);
        let points = document.get_array_mut("points").expect("points array");
        points[7] = Bson::Document(doc! {
            "samples": 2_i64,
            "occur": { "a%2Eb": 2_i64 },
        });

        let bucket = bucket_from_document(&document).expect("decode bucket");
        let SlotContent::Textual { occur, .. } = &bucket.points[7] else {
            panic!("textual slot expected");
        };
        assert_eq!(occur.get("a.b"), Some(&2));
    }
}
