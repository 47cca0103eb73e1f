//! # http 模块说明
//!
//! ## 角色定位（Why）
//! - 服务的 HTTP 表面：路由、租户头校验、关联标识回显，以及错误域到状态码
//!   的统一映射；
//! - 处理器保持薄壳：参数解析交给规划器，写路径交给摄取协调器，自身只负责
//!   响应形态。
//!
//! ## 状态码映射（What）
//! - 校验错误 → 400，响应体为结构化 `validation`；
//! - 聚合方法与序列形态不符 → 400，携带稳定错误码；
//! - 存储错误 → 500，响应体携带原因；未知路由 / 方法 → 404；
//! - 查询路径上的集合缺失**不是**错误：改写为 `values: []` 的 200。

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sth_core::prelude::*;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::ServiceConfig;
use crate::envelope;
use crate::ingest;
use crate::kpi::Kpi;
use crate::planner::{self, QueryParams, QueryPlan};

/// 处理器共享的应用状态。
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HistoricStore>,
    pub config: Arc<ServiceConfig>,
    pub kpi: Arc<Kpi>,
}

/// 组装服务路由。
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/STH/v1/contextEntities/type/{entityType}/id/{entityId}/attributes/{attrName}",
            get(get_historics),
        )
        .route("/notify", post(post_notify))
        .route("/version", get(get_version))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_historics(
    State(state): State<AppState>,
    Path((entity_type, entity_id, attr_name)): Path<(String, String, String)>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
) -> Response {
    state.kpi.record_request();
    let correlator = correlator_of(&headers, &state.config);

    let (service, service_path) = match require_tenant_headers(&headers) {
        Ok(tenant) => tenant,
        Err(err) => return reply_error(&err, correlator),
    };
    let filter = SeriesFilter {
        entity_id,
        entity_type,
        attr_name,
    };
    let plan = match planner::plan(filter.clone(), &params, state.config.filter_out_empty) {
        Ok(plan) => plan,
        Err(err) => return reply_error(&err, correlator),
    };
    let namespace = Namespace {
        service,
        service_path,
        entity_id: filter.entity_id.clone(),
        entity_type: filter.entity_type.clone(),
        attr_name: filter.attr_name.clone(),
    };

    match execute_plan(&state, &namespace, &filter, plan).await {
        Ok(QueryOutput::Document(body)) => reply_json(StatusCode::OK, body, correlator),
        Ok(QueryOutput::Csv(file)) => reply_csv(file, correlator).await,
        Err(err) => reply_error(&err, correlator),
    }
}

/// 查询执行的两种输出形态：JSON 信封或 CSV 物化文件。
enum QueryOutput {
    Document(Value),
    Csv(CsvFile),
}

async fn execute_plan(
    state: &AppState,
    namespace: &Namespace,
    filter: &SeriesFilter,
    plan: QueryPlan,
) -> Result<QueryOutput, SthError> {
    match plan {
        QueryPlan::Raw(query) => {
            let lookup = GetCollectionOptions::lookup(Family::Raw);
            let handle = match state.store.get_collection(namespace, &lookup).await {
                Ok(handle) => handle,
                Err(SthError::CollectionNotFound { .. }) => {
                    return Ok(QueryOutput::Document(envelope::data_envelope(
                        filter,
                        Value::Array(Vec::new()),
                    )));
                }
                Err(err) => return Err(err),
            };
            match state.store.query_raw(&handle, &query).await? {
                RawReply::Inline(events) => Ok(QueryOutput::Document(envelope::data_envelope(
                    filter,
                    envelope::raw_values(&events),
                ))),
                RawReply::File(file) => Ok(QueryOutput::Csv(file)),
            }
        }
        QueryPlan::Aggregated(query) => {
            let lookup = GetCollectionOptions::lookup(Family::Aggregated);
            let handle = match state.store.get_collection(namespace, &lookup).await {
                Ok(handle) => handle,
                Err(SthError::CollectionNotFound { .. }) => {
                    return Ok(QueryOutput::Document(envelope::data_envelope(
                        filter,
                        Value::Array(Vec::new()),
                    )));
                }
                Err(err) => return Err(err),
            };
            let buckets = state.store.query_aggregate(&handle, &query).await?;
            Ok(QueryOutput::Document(envelope::data_envelope(
                filter,
                envelope::aggregate_values(&buckets),
            )))
        }
    }
}

async fn post_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Notification>, JsonRejection>,
) -> Response {
    state.kpi.record_request();
    let correlator = correlator_of(&headers, &state.config);

    let Json(notification) = match payload {
        Ok(payload) => payload,
        Err(_) => {
            // 畸形载荷按载荷校验错误回复，而非静默丢弃。
            let err = SthError::validation(ValidationSource::Payload, ["contextResponses"]);
            return reply_error(&err, correlator);
        }
    };

    let service = header_or(&headers, "fiware-service", &state.config.default_service);
    let service_path = header_or(
        &headers,
        "fiware-servicepath",
        &state.config.default_service_path,
    );
    let recv_time = chrono::Utc::now();

    match ingest::ingest_notification(
        Arc::clone(&state.store),
        &state.config,
        &service,
        &service_path,
        &notification,
        recv_time,
    )
    .await
    {
        Ok(_) => reply_json(StatusCode::OK, json!({}), correlator),
        Err(err) => reply_error(&err, correlator),
    }
}

async fn get_version(State(state): State<AppState>) -> Response {
    state.kpi.record_request();
    reply_json(
        StatusCode::OK,
        json!({ "version": env!("CARGO_PKG_VERSION") }),
        None,
    )
}

async fn not_found() -> Response {
    reply_json(
        StatusCode::NOT_FOUND,
        json!({ "error": { "code": "not_found", "reason": "unknown route or method" } }),
        None,
    )
}

/// 读取租户头；缺失的键全部列入校验错误。
fn require_tenant_headers(headers: &HeaderMap) -> Result<(String, String), SthError> {
    let mut missing = Vec::new();
    let service = text_header(headers, "fiware-service");
    if service.is_none() {
        missing.push("fiware-service");
    }
    let service_path = text_header(headers, "fiware-servicepath");
    if service_path.is_none() {
        missing.push("fiware-servicepath");
    }
    match (service, service_path) {
        (Some(service), Some(service_path)) => Ok((service, service_path)),
        _ => Err(SthError::validation(ValidationSource::Headers, missing)),
    }
}

fn text_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|value| !value.is_empty())
}

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    text_header(headers, name).unwrap_or_else(|| default.to_owned())
}

/// 关联标识的回显值（头名由配置给定）。
fn correlator_of(headers: &HeaderMap, config: &ServiceConfig) -> Option<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(config.correlator_header.as_str()).ok()?;
    let value = headers.get(&name)?.clone();
    Some((name, value))
}

fn reply_json(
    status: StatusCode,
    body: Value,
    correlator: Option<(HeaderName, HeaderValue)>,
) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some((name, value)) = correlator {
        response.headers_mut().insert(name, value);
    }
    response
}

async fn reply_csv(file: CsvFile, correlator: Option<(HeaderName, HeaderValue)>) -> Response {
    let content = match tokio::fs::read(file.path()).await {
        Ok(content) => content,
        Err(err) => {
            let err = SthError::store_with_cause("csv", "materialised file unreadable", err);
            return reply_error(&err, correlator);
        }
    };
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    // `file` 在此作用域结束时析构，物化文件随响应冲刷后删除。
    drop(file);

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response();
    if let Some((name, value)) = correlator {
        response.headers_mut().insert(name, value);
    }
    response
}

/// 错误域到 HTTP 响应的唯一映射点。
fn reply_error(err: &SthError, correlator: Option<(HeaderName, HeaderValue)>) -> Response {
    let (status, body) = match err {
        SthError::Validation { source_kind, keys } => (
            StatusCode::BAD_REQUEST,
            json!({ "validation": { "source": source_kind.as_str(), "keys": keys } }),
        ),
        SthError::TypeMismatch { .. } => (
            StatusCode::BAD_REQUEST,
            json!({ "error": { "code": err.code(), "reason": err.to_string() } }),
        ),
        other => {
            error!(code = other.code(), error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": { "code": other.code(), "reason": other.to_string() } }),
            )
        }
    };
    reply_json(status, body, correlator)
}
