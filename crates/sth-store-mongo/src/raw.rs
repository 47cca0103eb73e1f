//! # raw 模块说明
//!
//! ## 角色定位（Why）
//! - 实现原始族（C3）的读写：追加单条观测、窗口 / Last-N 检索与 CSV 物化；
//! - 文档形态与响应排序在此处固化：`recvTime` 升序，同刻以 `_id`（插入序）
//!   定序。
//!
//! ## 核心契约（What）
//! - 追加无去重，并发追加相互独立；
//! - Last-N 以倒序取前 N 再翻转，保证返回的是窗内**最近** N 条且响应仍为
//!   升序；
//! - CSV 物化流式写入临时文件，文件所有权移交 [`CsvFile`]，响应冲刷后随
//!   析构删除。

use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use sth_core::prelude::{
    AttrValue, CollectionHandle, CsvFile, RawEvent, RawQuery, RawReply, SeriesFilter, SthError,
    TimeRange,
};

use crate::client::MongoStore;
use crate::error::map_store_error;

const CSV_HEADER: [&str; 6] = [
    "recvTime",
    "entityId",
    "entityType",
    "attrName",
    "attrType",
    "attrValue",
];

/// 原始事件的文档形态。
pub(crate) fn event_to_document(event: &RawEvent) -> Document {
    let attr_value = match &event.attr_value {
        AttrValue::Number(v) => Bson::Double(*v),
        AttrValue::Text(s) => Bson::String(s.clone()),
    };
    doc! {
        "recvTime": BsonDateTime::from_millis(event.recv_time.timestamp_millis()),
        "entityId": &event.entity_id,
        "entityType": &event.entity_type,
        "attrName": &event.attr_name,
        "attrType": &event.attr_type,
        "attrValue": attr_value,
    }
}

/// 文档还原为原始事件；形态不符视为存储被外部改写。
pub(crate) fn document_to_event(document: &Document) -> Result<RawEvent, SthError> {
    let recv_time = document
        .get_datetime("recvTime")
        .map_err(|err| SthError::store_with_cause("decode", "recvTime missing", err))?;
    let recv_time = chrono::DateTime::from_timestamp_millis(recv_time.timestamp_millis())
        .ok_or_else(|| SthError::store("decode", "recvTime out of range"))?;

    let text = |key: &str| -> Result<String, SthError> {
        document
            .get_str(key)
            .map(str::to_owned)
            .map_err(|err| SthError::store_with_cause("decode", format!("{key} missing"), err))
    };
    let attr_value = match document.get("attrValue") {
        Some(Bson::Double(v)) => AttrValue::Number(*v),
        Some(Bson::Int32(v)) => AttrValue::Number(f64::from(*v)),
        Some(Bson::Int64(v)) => AttrValue::Number(*v as f64),
        Some(Bson::String(s)) => AttrValue::Text(s.clone()),
        other => {
            return Err(SthError::store(
                "decode",
                format!("unsupported attrValue shape: {other:?}"),
            ))
        }
    };

    Ok(RawEvent {
        recv_time,
        entity_id: text("entityId")?,
        entity_type: text("entityType")?,
        attr_name: text("attrName")?,
        attr_type: text("attrType")?,
        attr_value,
    })
}

/// 查询过滤文档：序列三元组加可选时间窗。
pub(crate) fn filter_document(filter: &SeriesFilter, range: &TimeRange) -> Document {
    let mut document = doc! {
        "entityId": &filter.entity_id,
        "entityType": &filter.entity_type,
        "attrName": &filter.attr_name,
    };
    let mut bounds = Document::new();
    if let Some(from) = range.from {
        bounds.insert("$gte", BsonDateTime::from_millis(from.timestamp_millis()));
    }
    if let Some(to) = range.to {
        bounds.insert("$lte", BsonDateTime::from_millis(to.timestamp_millis()));
    }
    if !bounds.is_empty() {
        document.insert("recvTime", bounds);
    }
    document
}

pub(crate) async fn store_raw(
    store: &MongoStore,
    handle: &CollectionHandle,
    event: &RawEvent,
) -> Result<(), SthError> {
    store
        .client
        .database(&handle.database)
        .collection::<Document>(&handle.collection)
        .insert_one(event_to_document(event))
        .await
        .map_err(|err| map_store_error("insert", err))?;
    Ok(())
}

pub(crate) async fn query_raw(
    store: &MongoStore,
    handle: &CollectionHandle,
    query: &RawQuery,
) -> Result<RawReply, SthError> {
    let collection = store
        .client
        .database(&handle.database)
        .collection::<Document>(&handle.collection);
    let filter = filter_document(query.filter(), query.range());

    match query {
        RawQuery::LastN { n, .. } => {
            // 驱动层 limit(0) 的含义是“不限制”，零条请求须在下发前收敛为空结果。
            if *n == 0 {
                return Ok(RawReply::Inline(Vec::new()));
            }
            let cursor = collection
                .find(filter)
                .sort(doc! { "recvTime": -1, "_id": -1 })
                .limit(i64::from(*n))
                .await
                .map_err(|err| map_store_error("find", err))?;
            let documents: Vec<Document> = cursor
                .try_collect()
                .await
                .map_err(|err| map_store_error("find", err))?;
            let mut events = documents
                .iter()
                .map(document_to_event)
                .collect::<Result<Vec<_>, _>>()?;
            events.reverse();
            Ok(RawReply::Inline(events))
        }
        RawQuery::Window {
            h_limit, h_offset, ..
        } => {
            // 同 Last-N：零宽窗口不得退化为 limit(0) 的全量扫描。
            if *h_limit == 0 {
                return Ok(RawReply::Inline(Vec::new()));
            }
            let cursor = collection
                .find(filter)
                .sort(doc! { "recvTime": 1, "_id": 1 })
                .skip(u64::from(*h_offset))
                .limit(i64::from(*h_limit))
                .await
                .map_err(|err| map_store_error("find", err))?;
            let documents: Vec<Document> = cursor
                .try_collect()
                .await
                .map_err(|err| map_store_error("find", err))?;
            let events = documents
                .iter()
                .map(document_to_event)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RawReply::Inline(events))
        }
        RawQuery::Csv { filter: series, .. } => {
            let mut cursor = collection
                .find(filter)
                .sort(doc! { "recvTime": 1, "_id": 1 })
                .await
                .map_err(|err| map_store_error("find", err))?;

            let file = tempfile::Builder::new()
                .prefix("sth-")
                .suffix(".csv")
                .tempfile()
                .map_err(|err| {
                    SthError::store_with_cause("csv", "temporary file creation failed", err)
                })?;
            let (handle_file, temp_path) = file.into_parts();
            let mut writer = csv::Writer::from_writer(handle_file);
            writer
                .write_record(CSV_HEADER)
                .map_err(|err| SthError::store_with_cause("csv", "header write failed", err))?;
            while let Some(document) = cursor
                .try_next()
                .await
                .map_err(|err| map_store_error("find", err))?
            {
                let event = document_to_event(&document)?;
                writer
                    .write_record([
                        event.recv_time.to_rfc3339(),
                        event.entity_id,
                        event.entity_type,
                        event.attr_name,
                        event.attr_type,
                        event.attr_value.render(),
                    ])
                    .map_err(|err| SthError::store_with_cause("csv", "row write failed", err))?;
            }
            writer
                .flush()
                .map_err(|err| SthError::store_with_cause("csv", "flush failed", err))?;
            drop(writer);

            let path = temp_path.keep().map_err(|err| {
                SthError::store_with_cause("csv", "temporary file persist failed", err)
            })?;
            Ok(RawReply::File(CsvFile::new(
                path,
                format!("{}.csv", series.attr_name),
            )))
        }
    }
}
