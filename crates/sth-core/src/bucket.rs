//! # bucket 模块说明
//!
//! ## 角色定位（Why）
//! - 定义聚合桶与槽位的纯数据模型及其增量算术，是聚合引擎（C4）与其所有
//!   存储落地共享的唯一语义来源；
//! - 槽位增量是交换幺半群：任意两个合法摄取顺序产生逐字节相同的桶状态，
//!   这使并发写者无需跨事件排序。
//!
//! ## 核心契约（What）
//! - 数值槽位维护 `{samples, sum, sum2, min, max}`；空槽位以 `min = +∞`、
//!   `max = -∞` 为单位元，保证首个样本与后续样本走同一条 min/max 路径；
//! - 文本槽位维护 `{samples, occur}`，`samples = Σ occur[v]` 恒成立；
//! - `samples = 0` 的槽位与“不存在”等价，查询按 `filter_empty` 决定是否剔除；
//! - 槽位一旦以某种形态（数值 / 文本）接收过样本，异型样本以
//!   [`SthError::TypeMismatch`] 拒绝。
//!
//! ## 取舍（Trade-offs）
//! - `occur` 采用 `BTreeMap` 而非哈希表：遍历有序，桶状态的序列化结果
//!   可比较，直接支撑“摄取顺序无关”性质的逐字节断言。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SthError;
use crate::event::AttrValue;
use crate::time::Resolution;

/// 序列的聚合形态：由首个样本的类型决定。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Numeric,
    Textual,
}

impl SeriesKind {
    /// 样本值对应的形态。
    pub fn of(value: &AttrValue) -> Self {
        match value {
            AttrValue::Number(_) => Self::Numeric,
            AttrValue::Text(_) => Self::Textual,
        }
    }

    /// 错误消息中使用的稳定名称。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Textual => "textual",
        }
    }
}

/// 一个桶内槽位的聚合内容。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotContent {
    Numeric {
        samples: u64,
        sum: f64,
        sum2: f64,
        min: f64,
        max: f64,
    },
    Textual {
        samples: u64,
        occur: BTreeMap<String, u64>,
    },
}

impl SlotContent {
    /// 数值槽位的单位元。
    pub fn empty_numeric() -> Self {
        Self::Numeric {
            samples: 0,
            sum: 0.0,
            sum2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// 文本槽位的单位元。
    pub fn empty_textual() -> Self {
        Self::Textual {
            samples: 0,
            occur: BTreeMap::new(),
        }
    }

    /// 形态对应的单位元。
    pub fn empty(kind: SeriesKind) -> Self {
        match kind {
            SeriesKind::Numeric => Self::empty_numeric(),
            SeriesKind::Textual => Self::empty_textual(),
        }
    }

    /// 槽位当前形态。
    pub fn kind(&self) -> SeriesKind {
        match self {
            Self::Numeric { .. } => SeriesKind::Numeric,
            Self::Textual { .. } => SeriesKind::Textual,
        }
    }

    /// 槽位样本数。
    pub fn samples(&self) -> u64 {
        match self {
            Self::Numeric { samples, .. } | Self::Textual { samples, .. } => *samples,
        }
    }

    /// 向槽位施加一个样本增量。
    ///
    /// # 契约
    /// - **前置**：槽位形态与样本类型一致（或槽位为对应形态的单位元）；
    /// - **后置**：`samples` 递增 1，统计量按形态更新；
    /// - **失败**：形态不一致时返回 [`SthError::TypeMismatch`]，槽位保持不变。
    pub fn apply(&mut self, value: &AttrValue) -> Result<(), SthError> {
        match (self, value) {
            (
                Self::Numeric {
                    samples,
                    sum,
                    sum2,
                    min,
                    max,
                },
                AttrValue::Number(v),
            ) => {
                *samples += 1;
                *sum += v;
                *sum2 += v * v;
                *min = min.min(*v);
                *max = max.max(*v);
                Ok(())
            }
            (Self::Textual { samples, occur }, AttrValue::Text(text)) => {
                *samples += 1;
                *occur.entry(text.clone()).or_insert(0) += 1;
                Ok(())
            }
            // 形态冲突：上游对同名属性混用了数值与文本。
            (slot, _) => Err(SthError::TypeMismatch {
                method: "update",
                kind: slot.kind().as_str(),
            }),
        }
    }
}

/// 一个聚合桶：某条序列在某分辨率、某父单位起点下的全部槽位。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "attrName")]
    pub attr_name: String,
    pub resolution: Resolution,
    pub origin: DateTime<Utc>,
    pub kind: SeriesKind,
    pub points: Vec<SlotContent>,
}

impl AggregateBucket {
    /// 预物化骨架：`points` 以单位元填满正确长度，后续更新均为纯原地修改。
    pub fn skeleton(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        attr_name: impl Into<String>,
        resolution: Resolution,
        origin: DateTime<Utc>,
        kind: SeriesKind,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            attr_name: attr_name.into(),
            resolution,
            origin,
            kind,
            points: vec![SlotContent::empty(kind); resolution.slots()],
        }
    }

    /// 将一个事件样本并入本桶。
    ///
    /// 调用方负责保证 `recv_time` 截断后的起点等于本桶 `origin`。
    pub fn apply(&mut self, recv_time: DateTime<Utc>, value: &AttrValue) -> Result<(), SthError> {
        let index = self.resolution.slot_index(recv_time);
        self.points[index].apply(value)
    }
}

/// 聚合投影方法，亦即 HTTP 查询参数 `aggrMethod` 的取值域。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AggrMethod {
    Min,
    Max,
    Sum,
    Sum2,
    Occur,
}

impl AggrMethod {
    /// 解析 `aggrMethod` 取值；无法识别时返回 `None`。
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "sum" => Some(Self::Sum),
            "sum2" => Some(Self::Sum2),
            "occur" => Some(Self::Occur),
            _ => None,
        }
    }

    /// 协议中的稳定小写名。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Sum2 => "sum2",
            Self::Occur => "occur",
        }
    }

    /// 方法适用的序列形态。
    pub fn expected_kind(self) -> SeriesKind {
        match self {
            Self::Occur => SeriesKind::Textual,
            _ => SeriesKind::Numeric,
        }
    }
}

/// 投影后的单个槽位值。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProjectedValue {
    Number(f64),
    Occur(BTreeMap<String, u64>),
}

/// 投影后的槽位：`offset` 为桶内下标，`samples` 随任意方法一并返回。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub offset: usize,
    pub samples: u64,
    #[serde(flatten)]
    pub value: ProjectedValueEntry,
}

/// 以方法名为键的投影值包装，序列化后形如 `{"sum": 60.0}` 或 `{"occur": {...}}`。
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedValueEntry {
    pub method: AggrMethod,
    pub value: ProjectedValue,
}

impl Serialize for ProjectedValueEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.method.as_str(), &self.value)?;
        map.end()
    }
}

/// 投影后的桶：聚合查询响应中的一个条目。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BucketProjection {
    pub origin: DateTime<Utc>,
    pub resolution: Resolution,
    pub points: Vec<ProjectedPoint>,
}

/// 将桶投影到请求的方法。
///
/// # 契约
/// - `filter_empty = true` 时剔除 `samples = 0` 的槽位；
/// - 方法与桶形态不符时返回 [`SthError::TypeMismatch`]。
pub fn project(
    bucket: &AggregateBucket,
    method: AggrMethod,
    filter_empty: bool,
) -> Result<BucketProjection, SthError> {
    if bucket.kind != method.expected_kind() {
        return Err(SthError::TypeMismatch {
            method: method.as_str(),
            kind: bucket.kind.as_str(),
        });
    }
    let mut points = Vec::new();
    for (offset, slot) in bucket.points.iter().enumerate() {
        if filter_empty && slot.samples() == 0 {
            continue;
        }
        let value = match (slot, method) {
            (SlotContent::Numeric { min, .. }, AggrMethod::Min) => ProjectedValue::Number(*min),
            (SlotContent::Numeric { max, .. }, AggrMethod::Max) => ProjectedValue::Number(*max),
            (SlotContent::Numeric { sum, .. }, AggrMethod::Sum) => ProjectedValue::Number(*sum),
            (SlotContent::Numeric { sum2, .. }, AggrMethod::Sum2) => ProjectedValue::Number(*sum2),
            (SlotContent::Textual { occur, .. }, AggrMethod::Occur) => {
                ProjectedValue::Occur(occur.clone())
            }
            (slot, method) => {
                // 桶形态校验已在入口完成；单槽位异型意味着存储被外部改写。
                return Err(SthError::TypeMismatch {
                    method: method.as_str(),
                    kind: slot.kind().as_str(),
                });
            }
        };
        points.push(ProjectedPoint {
            offset,
            samples: slot.samples(),
            value: ProjectedValueEntry { method, value },
        });
    }
    Ok(BucketProjection {
        origin: bucket.origin,
        resolution: bucket.resolution,
        points,
    })
}
