//! # planner 模块说明
//!
//! ## 角色定位（Why）
//! - 查询规划器：按参数组合把一次查询派发到原始或聚合读路径，二者互斥；
//!   两者皆不匹配时给出列明全部候选键的校验错误；
//! - 参数解析（整数、时间戳、枚举）集中在此，存储层收到的规格已经是强类型。
//!
//! ## 派发规则（What，按序首个命中生效）
//! 1. `lastN`、(`hLimit` 且 `hOffset`)、`filetype=csv` 任一出现 → 原始路径；
//! 2. `aggrMethod` 与 `aggrPeriod` 同时出现 → 聚合路径；
//! 3. 否则 → 校验错误，键列表为全部六个候选参数。

use serde::Deserialize;
use sth_core::prelude::*;

/// 查询端点接受的原始参数集（未解析形态）。
#[derive(Clone, Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "lastN")]
    pub last_n: Option<String>,
    #[serde(rename = "hLimit")]
    pub h_limit: Option<String>,
    #[serde(rename = "hOffset")]
    pub h_offset: Option<String>,
    #[serde(rename = "aggrMethod")]
    pub aggr_method: Option<String>,
    #[serde(rename = "aggrPeriod")]
    pub aggr_period: Option<String>,
    #[serde(rename = "dateFrom")]
    pub date_from: Option<String>,
    #[serde(rename = "dateTo")]
    pub date_to: Option<String>,
    pub filetype: Option<String>,
}

/// 规划结果：恰好一条读路径。
#[derive(Clone, Debug)]
pub enum QueryPlan {
    Raw(RawQuery),
    Aggregated(AggregateQuery),
}

/// 规划一次查询。
///
/// `filter_out_empty` 来自服务配置，决定聚合路径是否剔除空槽位。
pub fn plan(
    filter: SeriesFilter,
    params: &QueryParams,
    filter_out_empty: bool,
) -> Result<QueryPlan, SthError> {
    // `csv` 是 filetype 唯一认可的取值；其余取值立即报错而非静默忽略。
    let csv = match params.filetype.as_deref() {
        None => false,
        Some("csv") => true,
        Some(_) => {
            return Err(SthError::validation(ValidationSource::Query, ["filetype"]));
        }
    };

    let range = TimeRange {
        from: parse_instant(params.date_from.as_deref(), "dateFrom")?,
        to: parse_instant(params.date_to.as_deref(), "dateTo")?,
    };

    let last_n = parse_count(params.last_n.as_deref(), "lastN")?;
    let h_limit = parse_count(params.h_limit.as_deref(), "hLimit")?;
    let h_offset = parse_count(params.h_offset.as_deref(), "hOffset")?;

    if let Some(n) = last_n {
        return Ok(QueryPlan::Raw(RawQuery::LastN { filter, n, range }));
    }
    if let (Some(h_limit), Some(h_offset)) = (h_limit, h_offset) {
        return Ok(QueryPlan::Raw(RawQuery::Window {
            filter,
            h_limit,
            h_offset,
            range,
        }));
    }
    if csv {
        return Ok(QueryPlan::Raw(RawQuery::Csv { filter, range }));
    }

    if let (Some(method), Some(period)) = (&params.aggr_method, &params.aggr_period) {
        let method = AggrMethod::parse(method)
            .ok_or_else(|| SthError::validation(ValidationSource::Query, ["aggrMethod"]))?;
        let resolution = Resolution::parse(period)
            .ok_or_else(|| SthError::validation(ValidationSource::Query, ["aggrPeriod"]))?;
        return Ok(QueryPlan::Aggregated(AggregateQuery {
            filter,
            method,
            resolution,
            range,
            filter_empty: filter_out_empty,
        }));
    }

    Err(SthError::validation(
        ValidationSource::Query,
        ["lastN", "hLimit", "hOffset", "filetype", "aggrMethod", "aggrPeriod"],
    ))
}

fn parse_count(value: Option<&str>, key: &str) -> Result<Option<u32>, SthError> {
    value
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| SthError::validation(ValidationSource::Query, [key]))
        })
        .transpose()
}

fn parse_instant(
    value: Option<&str>,
    key: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, SthError> {
    value
        .map(|raw| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|_| SthError::validation(ValidationSource::Query, [key]))
        })
        .transpose()
}
