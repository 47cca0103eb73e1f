//! # envelope 模块说明
//!
//! 数据查询的响应信封是固定形态：无论结果是否为空都返回同一结构，
//! “无数据”是 `values: []` 的 200，而非 404。原始与聚合两条路径只在
//! `values` 的元素形态上分化。

use serde_json::{json, Value};
use sth_core::prelude::{BucketProjection, RawEvent, SeriesFilter};

/// 构造数据查询的响应信封。
pub fn data_envelope(filter: &SeriesFilter, values: Value) -> Value {
    json!({
        "contextResponses": [{
            "contextElement": {
                "id": filter.entity_id,
                "type": filter.entity_type,
                "isPattern": false,
                "attributes": [{
                    "name": filter.attr_name,
                    "values": values,
                }],
            },
            "statusCode": { "code": "200", "reasonPhrase": "OK" },
        }]
    })
}

/// 原始事件列表的 `values` 形态：`{recvTime, attrType, attrValue}`。
pub fn raw_values(events: &[RawEvent]) -> Value {
    Value::Array(
        events
            .iter()
            .map(|event| {
                json!({
                    "recvTime": event.recv_time.to_rfc3339(),
                    "attrType": event.attr_type,
                    "attrValue": event.attr_value,
                })
            })
            .collect(),
    )
}

/// 聚合桶投影的 `values` 形态：`{origin, resolution, points}`。
pub fn aggregate_values(buckets: &[BucketProjection]) -> Value {
    serde_json::to_value(buckets).unwrap_or_else(|_| Value::Array(Vec::new()))
}
