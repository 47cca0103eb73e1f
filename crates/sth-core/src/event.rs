//! # event 模块说明
//!
//! ## 角色定位（Why）
//! - 定义原始事件与上游通知的领域模型：原始事件是存储的最小不可变单元，
//!   通知是摄取协调器的输入；
//! - 属性值在进入写路径前统一归约为“数值 / 文本”二分，聚合引擎据此选择槽位形态。
//!
//! ## 核心契约（What）
//! - `recv_time` 以服务端接收时刻为准；属性携带 `TimeInstant` 元数据时可按属性覆盖；
//! - 归约规则：JSON 数值 → 数值；可解析为有限浮点的字符串 → 数值（上游常以字符串携带
//!   数值读数）；其余字符串 → 文本；对象 / 数组 / 布尔 / null → 不可聚合，被丢弃；
//! - 配置启用去空白时，修剪后为空的字符串同样被丢弃。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 归约后的属性值。数值统一为 `f64`，文本保留原始字符串。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    Text(String),
}

impl AttrValue {
    /// 将通知中的 JSON 值归约为可聚合的属性值。
    ///
    /// 返回 `None` 表示该值不可聚合，调用方应将属性从本次摄取中剔除。
    pub fn from_json(value: &serde_json::Value, ignore_blank: bool) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                let v = n.as_f64()?;
                v.is_finite().then_some(Self::Number(v))
            }
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    if ignore_blank {
                        return None;
                    }
                    return Some(Self::Text(s.clone()));
                }
                match trimmed.parse::<f64>() {
                    Ok(v) if v.is_finite() => Some(Self::Number(v)),
                    _ => Some(Self::Text(s.clone())),
                }
            }
            _ => None,
        }
    }

    /// 是否为数值。
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// 序列化到 CSV / 日志时的文本形态。
    pub fn render(&self) -> String {
        match self {
            Self::Number(v) => v.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

/// 一条不可变的原始观测事件。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "recvTime")]
    pub recv_time: DateTime<Utc>,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "attrName")]
    pub attr_name: String,
    #[serde(rename = "attrType")]
    pub attr_type: String,
    #[serde(rename = "attrValue")]
    pub attr_value: AttrValue,
}

/// 上游上下文代理推送的通知载荷（`POST /notify` 的 body）。
#[derive(Clone, Debug, Deserialize)]
pub struct Notification {
    #[serde(rename = "subscriptionId", default)]
    pub subscription_id: Option<String>,
    #[serde(rename = "contextResponses")]
    pub context_responses: Vec<ContextResponse>,
}

/// 通知中的一个上下文响应。
#[derive(Clone, Debug, Deserialize)]
pub struct ContextResponse {
    #[serde(rename = "contextElement")]
    pub context_element: ContextElement,
}

/// 一个实体及其变更的属性集合。
#[derive(Clone, Debug, Deserialize)]
pub struct ContextElement {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Vec<NotifiedAttribute>,
}

/// 通知中的单个属性。`value` 保持原始 JSON，归约推迟到摄取协调器。
#[derive(Clone, Debug, Deserialize)]
pub struct NotifiedAttribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub attr_type: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub metadata: Vec<AttributeMetadata>,
}

/// 属性元数据项；目前只消费 `TimeInstant`。
#[derive(Clone, Debug, Deserialize)]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub meta_type: String,
    pub value: serde_json::Value,
}

impl NotifiedAttribute {
    /// 读取 `TimeInstant` 元数据并解析为时间戳；缺失或不可解析时返回 `None`，
    /// 调用方回退到服务端接收时刻。
    pub fn time_instant(&self) -> Option<DateTime<Utc>> {
        let meta = self.metadata.iter().find(|m| m.name == "TimeInstant")?;
        let text = meta.value.as_str()?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}
