//! HTTP 表面的端到端场景套件。
//!
//! # 教案级导览
//!
//! - **Why**：编排语义（互斥派发、唯一回复、空结果信封、租户头校验）只有
//!   穿过真实路由与处理器才能验证；本套件以内存存储桩驱动完整请求链路。
//! - **How**：`tower::ServiceExt::oneshot` 对路由逐请求调用，摄取场景通过
//!   `TimeInstant` 元数据钉住事件时刻，使聚合断言与墙钟无关。
//! - **What**：覆盖通知入库与秒级桶回填、分钟级 sum、occur 投影、参数组合
//!   校验、Last-N、CSV 物化与删除、KPI 计数及首个错误回复。

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use sth_core::prelude::*;
use sth_core::test_stubs::MemoryStore;
use sth_service::config::ServiceConfig;
use sth_service::http::{router, AppState};
use sth_service::kpi::Kpi;

fn test_app() -> (Router, Arc<MemoryStore>, Arc<Kpi>) {
    let store = Arc::new(MemoryStore::default());
    let kpi = Arc::new(Kpi::default());
    let state = AppState {
        store: Arc::clone(&store) as Arc<dyn HistoricStore>,
        config: Arc::new(ServiceConfig::default()),
        kpi: Arc::clone(&kpi),
    };
    (router(state), store, kpi)
}

fn notification(value: Value, instant: &str) -> Value {
    json!({
        "subscriptionId": "51c0ac9ed714fb3b37d7d5a8",
        "contextResponses": [{
            "contextElement": {
                "id": "Sensor:1",
                "type": "Sensor",
                "isPattern": "false",
                "attributes": [{
                    "name": "t",
                    "type": "float",
                    "value": value,
                    "metadata": [{
                        "name": "TimeInstant",
                        "type": "ISO8601",
                        "value": instant,
                    }],
                }],
            },
        }],
    })
}

async fn notify(app: &Router, body: &Value) -> StatusCode {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header("content-type", "application/json")
                .header("fiware-service", "tenant")
                .header("fiware-servicepath", "/test")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    response.status()
}

async fn query(app: &Router, params: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/STH/v1/contextEntities/type/Sensor/id/Sensor:1/attributes/t{params}"
                ))
                .header("fiware-service", "tenant")
                .header("fiware-servicepath", "/test")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn values_of(body: &Value) -> &Value {
    &body["contextResponses"][0]["contextElement"]["attributes"][0]["values"]
}

fn tenant_namespace() -> Namespace {
    Namespace {
        service: "tenant".into(),
        service_path: "/test".into(),
        entity_id: "Sensor:1".into(),
        entity_type: "Sensor".into(),
        attr_name: "t".into(),
    }
}

fn series_filter() -> SeriesFilter {
    SeriesFilter {
        entity_id: "Sensor:1".into(),
        entity_type: "Sensor".into(),
        attr_name: "t".into(),
    }
}

fn at(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .expect("test timestamp")
        .with_timezone(&chrono::Utc)
}

#[tokio::test]
async fn notify_populates_raw_and_second_resolution_bucket() {
    let (app, store, _) = test_app();
    let status = notify(&app, &notification(json!("21.5"), "2020-03-15T10:11:07Z")).await;
    assert_eq!(status, StatusCode::OK);

    let raw_handle = store
        .get_collection(&tenant_namespace(), &GetCollectionOptions::lookup(Family::Raw))
        .await
        .expect("raw collection created by ingest");
    assert_eq!(store.raw_count(&raw_handle), 1);

    let aggr_handle = store
        .get_collection(
            &tenant_namespace(),
            &GetCollectionOptions::lookup(Family::Aggregated),
        )
        .await
        .expect("aggregated collection created by ingest");
    let bucket = store
        .aggregate_bucket(
            &aggr_handle,
            &series_filter(),
            Resolution::Second,
            at("2020-03-15T10:11:00Z"),
        )
        .expect("second-resolution bucket");

    let SlotContent::Numeric {
        samples,
        sum,
        sum2,
        min,
        max,
    } = &bucket.points[7]
    else {
        panic!("numeric slot expected");
    };
    assert_eq!(*samples, 1);
    assert_eq!(*sum, 21.5);
    assert_eq!(*sum2, 462.25);
    assert_eq!(*min, 21.5);
    assert_eq!(*max, 21.5);
}

#[tokio::test]
async fn sum_over_minute_resolution_reports_three_samples() {
    let (app, _, _) = test_app();
    for (value, instant) in [
        ("10", "2020-03-15T10:11:01Z"),
        ("20", "2020-03-15T10:11:02Z"),
        ("30", "2020-03-15T10:11:03Z"),
    ] {
        assert_eq!(
            notify(&app, &notification(json!(value), instant)).await,
            StatusCode::OK
        );
    }

    let (status, body) = query(
        &app,
        "?aggrMethod=sum&aggrPeriod=minute&dateFrom=2020-03-15T10:00:00Z&dateTo=2020-03-15T10:59:59Z",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let values = values_of(&body);
    assert_eq!(values.as_array().map(Vec::len), Some(1));
    let bucket = &values[0];
    assert_eq!(bucket["resolution"], "minute");
    let points = bucket["points"].as_array().expect("points");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0]["offset"], 11);
    assert_eq!(points[0]["samples"], 3);
    assert_eq!(points[0]["sum"], 60.0);
}

#[tokio::test]
async fn occur_over_second_resolution_keeps_per_slot_counts() {
    let (app, _, _) = test_app();
    for (value, instant) in [
        ("a", "2020-03-15T10:11:05Z"),
        ("b", "2020-03-15T10:11:06Z"),
        ("a", "2020-03-15T10:11:07Z"),
    ] {
        assert_eq!(
            notify(&app, &notification(json!(value), instant)).await,
            StatusCode::OK
        );
    }

    let (status, body) = query(
        &app,
        "?aggrMethod=occur&aggrPeriod=second&dateFrom=2020-03-15T10:11:00Z&dateTo=2020-03-15T10:11:59Z",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let values = values_of(&body);
    let points = values[0]["points"].as_array().expect("points");
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["offset"], 5);
    assert_eq!(points[0]["occur"], json!({ "a": 1 }));
    assert_eq!(points[1]["offset"], 6);
    assert_eq!(points[1]["occur"], json!({ "b": 1 }));
    assert_eq!(points[2]["offset"], 7);
    assert_eq!(points[2]["occur"], json!({ "a": 1 }));
}

#[tokio::test]
async fn unrecognised_parameter_combination_lists_all_candidates() {
    let (app, _, _) = test_app();
    let (status, body) = query(&app, "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["validation"]["source"], "query");
    let keys = body["validation"]["keys"].as_array().expect("keys");
    for expected in ["lastN", "hLimit", "hOffset", "filetype", "aggrMethod", "aggrPeriod"] {
        assert!(
            keys.iter().any(|key| key == expected),
            "missing key {expected}"
        );
    }
}

#[tokio::test]
async fn missing_service_header_is_a_headers_validation_error() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/STH/v1/contextEntities/type/Sensor/id/Sensor:1/attributes/t?lastN=1")
                .header("fiware-servicepath", "/test")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["validation"]["source"], "headers");
    assert_eq!(body["validation"]["keys"], json!(["fiware-service"]));
}

#[tokio::test]
async fn last_n_returns_only_the_most_recent_event() {
    let (app, _, _) = test_app();
    for second in 1..=5u32 {
        let instant = format!("2020-03-15T10:11:{second:02}Z");
        assert_eq!(
            notify(&app, &notification(json!(second), &instant)).await,
            StatusCode::OK
        );
    }

    let (status, body) = query(&app, "?lastN=1").await;
    assert_eq!(status, StatusCode::OK);
    let values = values_of(&body).as_array().expect("values");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["attrValue"], 5.0);
    assert_eq!(values[0]["recvTime"], "2020-03-15T10:11:05+00:00");
}

#[tokio::test]
async fn window_pagination_respects_offset_and_limit() {
    let (app, _, _) = test_app();
    for second in 1..=5u32 {
        let instant = format!("2020-03-15T10:11:{second:02}Z");
        assert_eq!(
            notify(&app, &notification(json!(second), &instant)).await,
            StatusCode::OK
        );
    }

    let (status, body) = query(&app, "?hLimit=2&hOffset=1").await;
    assert_eq!(status, StatusCode::OK);
    let values = values_of(&body).as_array().expect("values");
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["attrValue"], 2.0);
    assert_eq!(values[1]["attrValue"], 3.0);
}

#[tokio::test]
async fn csv_export_streams_rows_and_removes_the_file() {
    let (app, _, _) = test_app();
    for (value, instant) in [("1", "2020-03-15T10:11:01Z"), ("2", "2020-03-15T10:11:02Z")] {
        assert_eq!(
            notify(&app, &notification(json!(value), instant)).await,
            StatusCode::OK
        );
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/STH/v1/contextEntities/type/Sensor/id/Sensor:1/attributes/t?filetype=csv")
                .header("fiware-service", "tenant")
                .header("fiware-servicepath", "/test")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .expect("content type");
    assert!(content_type.starts_with("text/csv"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf-8 csv");
    assert!(text.starts_with("recvTime,"));
    assert_eq!(text.lines().count(), 3, "header plus two rows");
    assert!(text.contains("Sensor:1"));
}

#[tokio::test]
async fn unknown_namespace_yields_empty_envelope_not_404() {
    let (app, _, _) = test_app();
    let (status, body) = query(&app, "?lastN=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(values_of(&body), &json!([]));
    assert_eq!(body["contextResponses"][0]["statusCode"]["code"], "200");

    let (status, body) = query(&app, "?aggrMethod=max&aggrPeriod=hour").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(values_of(&body), &json!([]));
}

#[tokio::test]
async fn first_subtask_error_reaches_the_single_reply() {
    let (app, store, _) = test_app();
    store.fail_raw_writes(true);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header("content-type", "application/json")
                .header("fiware-service", "tenant")
                .header("fiware-servicepath", "/test")
                .body(Body::from(
                    notification(json!("21.5"), "2020-03-15T10:11:07Z").to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["error"]["code"], "sth.store");
}

#[tokio::test]
async fn malformed_notification_payload_is_a_payload_validation_error() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"contextResponses": "not-a-list"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["validation"]["source"], "payload");
}

#[tokio::test]
async fn non_aggregatable_payload_names_the_attributes_key() {
    let (app, _, _) = test_app();
    let body = json!({
        "contextResponses": [{
            "contextElement": {
                "id": "Sensor:1",
                "type": "Sensor",
                "attributes": [{ "name": "t", "type": "struct", "value": { "nested": 1 } }],
            },
        }],
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/notify")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let parsed: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(parsed["validation"]["source"], "payload");
    assert_eq!(parsed["validation"]["keys"], json!(["attributes"]));
}

#[tokio::test]
async fn correlator_header_is_echoed_back() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/STH/v1/contextEntities/type/Sensor/id/Sensor:1/attributes/t?lastN=1")
                .header("fiware-service", "tenant")
                .header("fiware-servicepath", "/test")
                .header("Unica-Correlator", "corr-123")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(
        response
            .headers()
            .get("Unica-Correlator")
            .and_then(|value| value.to_str().ok()),
        Some("corr-123")
    );
}

#[tokio::test]
async fn version_endpoint_reports_crate_version() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/version")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/STH/v1/no/such/route")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn kpi_counts_every_accepted_request() {
    let (app, _, kpi) = test_app();
    let _ = query(&app, "?lastN=1").await;
    let _ = notify(&app, &notification(json!(1), "2020-03-15T10:11:07Z")).await;
    let _ = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/version")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(kpi.attended_requests(), 3);
    assert_eq!(kpi.drain(), 3);
    assert_eq!(kpi.attended_requests(), 0);
}
