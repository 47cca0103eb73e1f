//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为 STH 全链路（命名解析、存储读写、聚合更新、HTTP 编排）提供统一的稳定错误域；
//! - 每个变体绑定一个 `<域>.<语义>` 形式的稳定错误码，供日志、指标与告警系统做精确分类。
//!
//! ## 设计要求（What）
//! - 错误类型实现 `thiserror::Error`，与 `std::error::Error` 生态兼容，可通过 `?` 逐层传播；
//! - `Validation` 携带结构化的来源与键列表，HTTP 层据此直接拼装 400 响应体；
//! - `CollectionNotFound` 是查询路径上的**预期分支**（改写为空结果），仅在摄取路径上按失败子任务计数。
//!
//! ## 扩展建议（How）
//! - 新增变体时同步在 [`codes`] 中登记错误码，并保持既有码值不变；
//! - 底层驱动错误应先经由实现层的映射函数收敛为 [`SthError::Store`]，避免驱动类型泄漏到契约层。

use thiserror::Error;

/// 稳定错误码表。
///
/// # 契约说明
/// - 码值遵循 `<域>.<语义>` 约定，一经发布不得变更；
/// - 观测与告警系统按码值（而非消息文本）做自动化治理。
pub mod codes {
    /// 请求头 / 查询串 / 载荷校验失败。
    pub const VALIDATION: &str = "sth.validation";
    /// 目标集合不存在（查询路径的预期分支）。
    pub const COLLECTION_MISSING: &str = "sth.collection_missing";
    /// 文档存储读写失败（连接、超时、写入错误）。
    pub const STORE: &str = "sth.store";
    /// 聚合方法与属性类型不兼容。
    pub const TYPE_MISMATCH: &str = "sth.type_mismatch";
    /// 路径模式下集合标识超出存储命名空间上限。
    pub const IDENTIFIER_TOO_LONG: &str = "sth.identifier_too_long";
    /// 配置加载或取值非法。
    pub const CONFIG: &str = "sth.config";
}

/// 校验错误的来源维度，与 HTTP 响应体中的 `validation.source` 一一对应。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSource {
    /// 请求头缺失或非法。
    Headers,
    /// 查询参数组合无法匹配任何已知路径。
    Query,
    /// 通知载荷缺少可入库的属性。
    Payload,
}

impl ValidationSource {
    /// 返回响应体中使用的稳定字符串。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Query => "query",
            Self::Payload => "payload",
        }
    }
}

/// STH 服务的统一错误域。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将跨层故障合流为一个枚举，使 HTTP 层能以单一 `match` 决定状态码与响应体；
/// - 变体粒度对齐传播策略：校验类立即 400，存储类延迟到所有子任务结算后返回 500。
///
/// ## 契约（What）
/// - 所有变体均为 `Send + Sync + 'static`，可跨任务传播；
/// - [`code`](Self::code) 返回稳定错误码；消息文本仅面向排障人员，不承诺稳定；
/// - `Store` 变体可携带底层原因（驱动错误等），通过 `source()` 暴露完整链路。
///
/// ## 取舍（Trade-offs）
/// - 使用 `String` 保存上下文，牺牲少量堆分配换取日志与跨层传递的灵活性；
/// - 不区分软/硬存储错误：核心不做重试，重试语义留给上游与驱动超时。
#[derive(Debug, Error)]
pub enum SthError {
    /// 请求在进入存储层之前即被判定非法。
    #[error("validation failed in {source_kind:?}: keys {keys:?}")]
    Validation {
        source_kind: ValidationSource,
        keys: Vec<String>,
    },

    /// 目标集合不存在。查询路径将其改写为空结果，摄取路径按失败子任务处理。
    #[error("collection `{collection}` does not exist")]
    CollectionNotFound { collection: String },

    /// 文档存储操作失败。
    #[error("store operation `{operation}` failed: {message}")]
    Store {
        operation: &'static str,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 聚合方法与序列的属性类型不兼容（数值序列请求 `occur`，或文本序列请求数值方法）。
    #[error("aggregation method `{method}` is not applicable to a {kind} series")]
    TypeMismatch {
        method: &'static str,
        kind: &'static str,
    },

    /// 路径模式生成的集合标识超出存储命名空间上限，且散列回退被禁用。
    #[error("collection identifier of {length} bytes exceeds the {limit}-byte namespace limit")]
    IdentifierTooLong { length: usize, limit: usize },

    /// 配置文件或环境变量取值非法。
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl SthError {
    /// 构造校验错误。
    pub fn validation(
        source_kind: ValidationSource,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Validation {
            source_kind,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// 构造不携带底层原因的存储错误。
    pub fn store(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Store {
            operation,
            message: message.into(),
            cause: None,
        }
    }

    /// 构造携带底层原因的存储错误。
    pub fn store_with_cause(
        operation: &'static str,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            operation,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// 构造配置错误。
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// 返回变体对应的稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => codes::VALIDATION,
            Self::CollectionNotFound { .. } => codes::COLLECTION_MISSING,
            Self::Store { .. } => codes::STORE,
            Self::TypeMismatch { .. } => codes::TYPE_MISMATCH,
            Self::IdentifierTooLong { .. } => codes::IDENTIFIER_TOO_LONG,
            Self::Config { .. } => codes::CONFIG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = SthError::validation(ValidationSource::Headers, ["fiware-service"]);
        assert_eq!(err.code(), codes::VALIDATION);

        let err = SthError::store("insert", "connection reset");
        assert_eq!(err.code(), codes::STORE);

        let err = SthError::IdentifierTooLong {
            length: 130,
            limit: 120,
        };
        assert_eq!(err.code(), codes::IDENTIFIER_TOO_LONG);
    }

    #[test]
    fn store_error_exposes_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timeout");
        let err = SthError::store_with_cause("find", "cursor failed", io);
        let cause = std::error::Error::source(&err).map(|c| c.to_string());
        assert_eq!(cause.as_deref(), Some("socket timeout"));
    }
}
