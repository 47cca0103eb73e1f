//! # time 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义五档聚合分辨率及其“父单位截断 / 槽位下标”算术，是聚合引擎的唯一时间基准；
//! - 算术保持纯函数形态，便于在内存桩与 MongoDB 实现之间共享并做穷举测试。
//!
//! ## 核心契约（What）
//! - 固定的子单位表：
//!
//!   | 分辨率 | 父单位 | 槽位数 | 槽位下标 |
//!   |---|---|---|---|
//!   | second | minute | 60 | `recv_time.second` |
//!   | minute | hour   | 60 | `recv_time.minute` |
//!   | hour   | day    | 24 | `recv_time.hour` |
//!   | day    | month  | 31 | `recv_time.day - 1` |
//!   | month  | year   | 12 | `recv_time.month - 1` |
//!
//! - 对任意合法的 `DateTime<Utc>`，`slot_index` 恒小于 `slots()`；
//! - `origin` 与 `slot_index` 共同构成桶内寻址：同一事件在同一分辨率下的寻址是确定的。

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 聚合分辨率，亦即 HTTP 查询参数 `aggrPeriod` 的取值域。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Second,
    Minute,
    Hour,
    Day,
    Month,
}

impl Resolution {
    /// 全部分辨率，按粒度从细到粗排列。
    pub const ALL: [Resolution; 5] = [
        Resolution::Second,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Day,
        Resolution::Month,
    ];

    /// 解析 `aggrPeriod` 取值；无法识别时返回 `None`，由调用方转换为校验错误。
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "second" => Some(Self::Second),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// 返回协议中使用的稳定小写名。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    /// 每个桶的槽位数，等于父单位包含的子单位个数。
    ///
    /// `day` 档固定取 31：短月的尾部槽位天然空置，换取桶布局与槽位寻址的恒定。
    pub fn slots(self) -> usize {
        match self {
            Self::Second | Self::Minute => 60,
            Self::Hour => 24,
            Self::Day => 31,
            Self::Month => 12,
        }
    }

    /// 事件在本分辨率桶内的槽位下标（0 起）。
    pub fn slot_index(self, at: DateTime<Utc>) -> usize {
        match self {
            Self::Second => at.second() as usize,
            Self::Minute => at.minute() as usize,
            Self::Hour => at.hour() as usize,
            Self::Day => at.day() as usize - 1,
            Self::Month => at.month() as usize - 1,
        }
    }

    /// 桶起点：将时间戳截断到本分辨率的**父单位**起始时刻。
    ///
    /// 截断一个合法时间戳不会产出非法日期；`None` 分支仅为类型完整性保留，
    /// 一旦触达按原值返回。
    pub fn origin(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = NaiveDate::from_ymd_opt(at.year(), at.month(), at.day());
        let truncated = match self {
            Self::Second => date.and_then(|d| d.and_hms_opt(at.hour(), at.minute(), 0)),
            Self::Minute => date.and_then(|d| d.and_hms_opt(at.hour(), 0, 0)),
            Self::Hour => date.and_then(|d| d.and_hms_opt(0, 0, 0)),
            Self::Day => {
                NaiveDate::from_ymd_opt(at.year(), at.month(), 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
            Self::Month => {
                NaiveDate::from_ymd_opt(at.year(), 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
        };
        match truncated {
            Some(naive) => Utc.from_utc_datetime(&naive),
            None => at,
        }
    }
}

/// 查询与摄取共用的半开放时间窗，`None` 端不设界。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// 判断时间戳是否落在窗内（两端均为闭区间）。
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("test timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn slot_index_follows_sub_unit_table() {
        let t = at("2020-03-15T10:11:07Z");
        assert_eq!(Resolution::Second.slot_index(t), 7);
        assert_eq!(Resolution::Minute.slot_index(t), 11);
        assert_eq!(Resolution::Hour.slot_index(t), 10);
        assert_eq!(Resolution::Day.slot_index(t), 14);
        assert_eq!(Resolution::Month.slot_index(t), 2);
    }

    #[test]
    fn origin_truncates_to_parent_unit() {
        let t = at("2020-03-15T10:11:07Z");
        assert_eq!(Resolution::Second.origin(t), at("2020-03-15T10:11:00Z"));
        assert_eq!(Resolution::Minute.origin(t), at("2020-03-15T10:00:00Z"));
        assert_eq!(Resolution::Hour.origin(t), at("2020-03-15T00:00:00Z"));
        assert_eq!(Resolution::Day.origin(t), at("2020-03-01T00:00:00Z"));
        assert_eq!(Resolution::Month.origin(t), at("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn slot_index_always_within_bucket() {
        let edges = [
            at("2020-12-31T23:59:59Z"),
            at("2021-01-01T00:00:00Z"),
            at("2020-02-29T12:30:45Z"),
        ];
        for t in edges {
            for r in Resolution::ALL {
                assert!(r.slot_index(t) < r.slots(), "{} at {t}", r.as_str());
            }
        }
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = TimeRange {
            from: Some(at("2020-03-15T10:00:00Z")),
            to: Some(at("2020-03-15T11:00:00Z")),
        };
        assert!(range.contains(at("2020-03-15T10:00:00Z")));
        assert!(range.contains(at("2020-03-15T11:00:00Z")));
        assert!(!range.contains(at("2020-03-15T11:00:01Z")));
        assert!(TimeRange::default().contains(at("1970-01-01T00:00:00Z")));
    }
}
