//! # namespace 模块说明
//!
//! ## 角色定位（Why）
//! - 把 `(service, servicePath, entityId, entityType, attrName)` 五元组确定性地映射为
//!   存储集合标识，是原始族与聚合族共同的命名规则所有者；
//! - 提供路径 / 散列两种模式：路径模式保留可读性，散列模式保证任意元组都能落在
//!   存储的命名空间长度上限内。
//!
//! ## 核心契约（What）
//! - `service` 决定逻辑数据库名，其余字段决定集合族；
//! - 同一元组、同一模式下解析结果恒定（纯函数）；
//! - 路径模式超限且散列模式未启用时，以 [`SthError::IdentifierTooLong`] 失败；
//! - 散列模式下两族共享同一散列前缀，聚合族追加 [`AGGREGATED_SUFFIX`]，
//!   反查依赖旁路的 hash→origin 映射集合（见存储实现层）。
//!
//! ## 取舍（Trade-offs）
//! - 散列采用 SHA-256 十六进制并按可用空间截断：截断降低了理论抗碰撞强度，
//!   但命名空间基数（租户内的实体 × 属性）远低于碰撞阈值。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SthError;

/// 存储命名空间（`db.collection`）的字节长度上限。
pub const MAX_NAMESPACE_LEN: usize = 120;

/// 所有集合名的统一前缀。
pub const COLLECTION_PREFIX: &str = "sth_";

/// 聚合族集合名后缀。
pub const AGGREGATED_SUFFIX: &str = ".aggr";

/// 散列反查映射集合名。
pub const HASH_ORIGIN_COLLECTION: &str = "sth_hash_to_origin";

/// 一条时间序列的身份五元组。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Namespace {
    pub service: String,
    pub service_path: String,
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
}

/// 集合族：原始事件或聚合桶。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Family {
    Raw,
    Aggregated,
}

/// 集合命名模式，由配置选定。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameCodec {
    /// 拼接模式：保留元组字段，可直接读出来源。
    Path,
    /// 散列模式：定长摘要，配合旁路映射反查。
    Hash,
}

/// 散列反查映射集合中的一条记录。
///
/// 写入是幂等的：同一 `(hash, is_aggregated)` 重复插入会被忽略。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HashOriginRecord {
    pub hash: String,
    pub service: String,
    #[serde(rename = "servicePath")]
    pub service_path: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "attrName")]
    pub attr_name: String,
    #[serde(rename = "isAggregated")]
    pub is_aggregated: bool,
}

impl HashOriginRecord {
    /// 由命名空间与族构造反查记录；`hash` 必须来自 [`resolve`] 的散列模式输出。
    pub fn new(hash: impl Into<String>, namespace: &Namespace, family: Family) -> Self {
        Self {
            hash: hash.into(),
            service: namespace.service.clone(),
            service_path: namespace.service_path.clone(),
            entity_id: namespace.entity_id.clone(),
            entity_type: namespace.entity_type.clone(),
            attr_name: namespace.attr_name.clone(),
            is_aggregated: matches!(family, Family::Aggregated),
        }
    }
}

/// `service` 对应的逻辑数据库名。
pub fn database_name(service: &str) -> String {
    format!("{COLLECTION_PREFIX}{service}")
}

/// 解析命名空间到集合名。
///
/// # 契约
/// - **输入**：命名空间元组、目标族与命名模式；
/// - **输出**：满足长度上限的集合名；
/// - **失败**：仅路径模式超限一种情形，返回 [`SthError::IdentifierTooLong`]。
pub fn resolve(namespace: &Namespace, family: Family, codec: NameCodec) -> Result<String, SthError> {
    match codec {
        NameCodec::Path => resolve_path(namespace, family),
        NameCodec::Hash => Ok(resolve_hash(namespace, family)),
    }
}

fn suffix_len(family: Family) -> usize {
    match family {
        Family::Raw => 0,
        Family::Aggregated => AGGREGATED_SUFFIX.len(),
    }
}

fn with_suffix(name: String, family: Family) -> String {
    match family {
        Family::Raw => name,
        Family::Aggregated => format!("{name}{AGGREGATED_SUFFIX}"),
    }
}

fn resolve_path(namespace: &Namespace, family: Family) -> Result<String, SthError> {
    let name = format!(
        "{COLLECTION_PREFIX}{}_{}_{}_{}",
        namespace.service_path, namespace.entity_id, namespace.entity_type, namespace.attr_name,
    );
    // 命名空间总长 = 数据库名 + '.' + 集合名（含族后缀）。
    let total = database_name(&namespace.service).len() + 1 + name.len() + suffix_len(family);
    if total > MAX_NAMESPACE_LEN {
        return Err(SthError::IdentifierTooLong {
            length: total,
            limit: MAX_NAMESPACE_LEN,
        });
    }
    Ok(with_suffix(name, family))
}

fn resolve_hash(namespace: &Namespace, family: Family) -> String {
    let digest = hash_digest(namespace);
    let available = MAX_NAMESPACE_LEN
        .saturating_sub(database_name(&namespace.service).len() + 1)
        .saturating_sub(COLLECTION_PREFIX.len() + AGGREGATED_SUFFIX.len());
    let keep = digest.len().min(available);
    with_suffix(format!("{COLLECTION_PREFIX}{}", &digest[..keep]), family)
}

/// 元组的 SHA-256 十六进制摘要（未截断、不含前后缀）。
///
/// 两族共享同一摘要，反查记录据此区分 `isAggregated`。
pub fn hash_digest(namespace: &Namespace) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.service_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(namespace.entity_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(namespace.entity_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(namespace.attr_name.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace() -> Namespace {
        Namespace {
            service: "smartcity".into(),
            service_path: "/gardens".into(),
            entity_id: "urn:ngsi:Sensor:42".into(),
            entity_type: "Sensor".into(),
            attr_name: "temperature".into(),
        }
    }

    #[test]
    fn path_mode_preserves_tuple_fields() {
        let raw = resolve(&namespace(), Family::Raw, NameCodec::Path).expect("raw name");
        assert_eq!(raw, "sth_/gardens_urn:ngsi:Sensor:42_Sensor_temperature");

        let aggr = resolve(&namespace(), Family::Aggregated, NameCodec::Path).expect("aggr name");
        assert_eq!(aggr, format!("{raw}{AGGREGATED_SUFFIX}"));
    }

    #[test]
    fn path_mode_rejects_oversized_identifier() {
        let mut ns = namespace();
        ns.attr_name = "x".repeat(MAX_NAMESPACE_LEN);
        let err = resolve(&ns, Family::Raw, NameCodec::Path).expect_err("must overflow");
        assert!(matches!(err, SthError::IdentifierTooLong { limit, .. } if limit == MAX_NAMESPACE_LEN));
    }

    #[test]
    fn hash_mode_is_deterministic_and_bounded() {
        let ns = {
            let mut ns = namespace();
            ns.attr_name = "x".repeat(MAX_NAMESPACE_LEN);
            ns
        };
        let first = resolve(&ns, Family::Aggregated, NameCodec::Hash).expect("hash name");
        let second = resolve(&ns, Family::Aggregated, NameCodec::Hash).expect("hash name");
        assert_eq!(first, second);
        assert!(first.ends_with(AGGREGATED_SUFFIX));
        assert!(database_name(&ns.service).len() + 1 + first.len() <= MAX_NAMESPACE_LEN);
    }

    #[test]
    fn hash_mode_families_share_digest() {
        let raw = resolve(&namespace(), Family::Raw, NameCodec::Hash).expect("raw");
        let aggr = resolve(&namespace(), Family::Aggregated, NameCodec::Hash).expect("aggr");
        assert_eq!(format!("{raw}{AGGREGATED_SUFFIX}"), aggr);
    }

    #[test]
    fn distinct_tuples_yield_distinct_digests() {
        let mut other = namespace();
        other.attr_name = "humidity".into();
        assert_ne!(hash_digest(&namespace()), hash_digest(&other));
    }
}
