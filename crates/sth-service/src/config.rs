//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 汇集服务的全部可配置项：监听地址、存储连接、写模式、归约开关、集合
//!   命名模式、截断策略与 KPI 上报间隔；
//! - 支持 TOML 文件加载并以环境变量逐项覆盖，便于容器化部署时零文件启动。
//!
//! ## 核心契约（What）
//! - 非法取值在启动阶段以 [`SthError::Config`] 失败，绝不静默回退默认值；
//! - 环境变量名与部署文档保持一致（`DB_URI`、`STH_PORT`、`SHOULD_STORE` 等），
//!   覆盖顺序为：内置默认 → TOML 文件 → 环境变量；
//! - 截断策略的年龄与体量两种形态互斥，同时给定视为配置错误。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sth_core::prelude::{NameCodec, Resolution, ShouldStore, SthError, TruncationPolicy};

/// 截断策略的配置形态。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TruncationConfig {
    /// 原始事件的保留时长（秒）；落地为 `recvTime` 上的 TTL 索引。
    pub expire_after_secs: Option<u64>,
    /// 集合体量上限（字节）；落地为 capped collection。
    pub max_bytes: Option<u64>,
    /// 集合文档数上限；仅与 `max_bytes` 联用。
    pub max_documents: Option<u64>,
}

impl TruncationConfig {
    /// 归一化为存储契约的截断策略。
    pub fn policy(&self) -> Result<TruncationPolicy, SthError> {
        match (self.expire_after_secs, self.max_bytes) {
            (Some(_), Some(_)) => Err(SthError::config(
                "truncation by age and by size are mutually exclusive",
            )),
            (Some(secs), None) => Ok(TruncationPolicy::Age {
                expire_after: Duration::from_secs(secs),
            }),
            (None, Some(max_bytes)) => Ok(TruncationPolicy::Size {
                max_bytes,
                max_documents: self.max_documents,
            }),
            (None, None) => {
                if self.max_documents.is_some() {
                    return Err(SthError::config(
                        "truncation.max_documents requires truncation.max_bytes",
                    ));
                }
                Ok(TruncationPolicy::None)
            }
        }
    }
}

/// 服务配置全集。
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub db_uri: String,
    /// `user:pass` 形态的可选凭据。
    pub db_authentication: Option<String>,
    pub replica_set: Option<String>,
    pub pool_size: u32,
    /// `POST /notify` 缺失租户头时的默认值。
    pub default_service: String,
    pub default_service_path: String,
    pub should_store: ShouldStore,
    /// 为真时剔除修剪后为空的字符串属性值。
    pub ignore_blank_spaces: bool,
    /// 为真时聚合查询剔除 `samples = 0` 的槽位。
    pub filter_out_empty: bool,
    /// 回显的关联标识头名。
    pub correlator_header: String,
    pub name_codec: NameCodec,
    pub truncation: TruncationConfig,
    /// 启用的聚合分辨率集合。
    pub resolutions: Vec<Resolution>,
    pub kpi_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8666,
            db_uri: "mongodb://localhost:27017".into(),
            db_authentication: None,
            replica_set: None,
            pool_size: 5,
            default_service: "testservice".into(),
            default_service_path: "/testservicepath".into(),
            should_store: ShouldStore::Both,
            ignore_blank_spaces: true,
            filter_out_empty: true,
            correlator_header: "Unica-Correlator".into(),
            name_codec: NameCodec::Path,
            truncation: TruncationConfig::default(),
            resolutions: Resolution::ALL.to_vec(),
            kpi_interval_secs: 60,
        }
    }
}

impl ServiceConfig {
    /// 从可选的 TOML 文件加载并应用环境变量覆盖。
    pub fn load(path: Option<&Path>) -> Result<Self, SthError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|err| {
                    SthError::config(format!("cannot read {}: {err}", path.display()))
                })?;
                toml::from_str(&text).map_err(|err| {
                    SthError::config(format!("cannot parse {}: {err}", path.display()))
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 逐项应用环境变量覆盖。
    fn apply_env_overrides(&mut self) -> Result<(), SthError> {
        if let Some(value) = env("STH_HOST") {
            self.host = value;
        }
        if let Some(value) = env("STH_PORT") {
            self.port = parse(&value, "STH_PORT")?;
        }
        if let Some(value) = env("DB_URI") {
            self.db_uri = value;
        }
        if let Some(value) = env("DB_AUTHENTICATION") {
            self.db_authentication = Some(value);
        }
        if let Some(value) = env("REPLICA_SET") {
            self.replica_set = Some(value);
        }
        if let Some(value) = env("POOL_SIZE") {
            self.pool_size = parse(&value, "POOL_SIZE")?;
        }
        if let Some(value) = env("DEFAULT_SERVICE") {
            self.default_service = value;
        }
        if let Some(value) = env("DEFAULT_SERVICE_PATH") {
            self.default_service_path = value;
        }
        if let Some(value) = env("SHOULD_STORE") {
            self.should_store = ShouldStore::parse(&value).ok_or_else(|| {
                SthError::config("SHOULD_STORE must be ONLY_RAW, ONLY_AGGREGATED or BOTH")
            })?;
        }
        if let Some(value) = env("IGNORE_BLANK_SPACES") {
            self.ignore_blank_spaces = parse(&value, "IGNORE_BLANK_SPACES")?;
        }
        if let Some(value) = env("FILTER_OUT_EMPTY") {
            self.filter_out_empty = parse(&value, "FILTER_OUT_EMPTY")?;
        }
        if let Some(value) = env("UNICA_CORRELATOR_HEADER") {
            self.correlator_header = value;
        }
        if let Some(value) = env("NAME_ENCODING") {
            self.name_codec = match value.as_str() {
                "path" => NameCodec::Path,
                "hash" => NameCodec::Hash,
                _ => return Err(SthError::config("NAME_ENCODING must be `path` or `hash`")),
            };
        }
        if let Some(value) = env("TRUNCATION_EXPIRE_AFTER_SECS") {
            self.truncation.expire_after_secs = Some(parse(&value, "TRUNCATION_EXPIRE_AFTER_SECS")?);
        }
        if let Some(value) = env("TRUNCATION_MAX_BYTES") {
            self.truncation.max_bytes = Some(parse(&value, "TRUNCATION_MAX_BYTES")?);
        }
        if let Some(value) = env("TRUNCATION_MAX_DOCUMENTS") {
            self.truncation.max_documents = Some(parse(&value, "TRUNCATION_MAX_DOCUMENTS")?);
        }
        if let Some(value) = env("KPI_INTERVAL_SECS") {
            self.kpi_interval_secs = parse(&value, "KPI_INTERVAL_SECS")?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), SthError> {
        if self.pool_size == 0 {
            return Err(SthError::config("POOL_SIZE must be positive"));
        }
        if self.resolutions.is_empty() && self.should_store.wants_aggregated() {
            return Err(SthError::config(
                "at least one resolution is required when aggregates are stored",
            ));
        }
        self.truncation.policy().map(|_| ())
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, SthError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err| SthError::config(format!("{name} is invalid: {err}")))
}
