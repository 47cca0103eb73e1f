//! # query 模块说明
//!
//! ## 角色定位（Why）
//! - 定义原始 / 聚合两条读路径的查询规格与结果形态，供查询规划器（C6）
//!   下发、存储实现执行；
//! - 原始查询结果以带标签的变体建模（内存列表或文件路径），HTTP 层按标签
//!   分派响应形态，存储实现无需感知 HTTP。
//!
//! ## 核心契约（What）
//! - 三种原始模式互斥：Last-N、窗口分页、CSV 物化；均携带同一序列过滤三元组
//!   与可选时间窗，响应按 `recv_time` 升序，同刻以插入序定序；
//! - CSV 文件由 [`CsvFile`] 独占持有，析构即删除，保证“响应冲刷后文件即清理”。

use std::path::{Path, PathBuf};

use crate::bucket::AggrMethod;
use crate::event::RawEvent;
use crate::time::{Resolution, TimeRange};

/// 查询路径上的序列过滤三元组。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SeriesFilter {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
}

/// 原始读路径的三种互斥模式。
#[derive(Clone, Debug)]
pub enum RawQuery {
    /// 窗内最近 N 条，响应仍按时间升序。
    LastN {
        filter: SeriesFilter,
        n: u32,
        range: TimeRange,
    },
    /// 自偏移 `h_offset` 起最多 `h_limit` 条，升序。
    Window {
        filter: SeriesFilter,
        h_limit: u32,
        h_offset: u32,
        range: TimeRange,
    },
    /// 将窗内全部事件物化为 CSV 文件。
    Csv { filter: SeriesFilter, range: TimeRange },
}

impl RawQuery {
    /// 查询携带的序列过滤器。
    pub fn filter(&self) -> &SeriesFilter {
        match self {
            Self::LastN { filter, .. } | Self::Window { filter, .. } | Self::Csv { filter, .. } => {
                filter
            }
        }
    }

    /// 查询携带的时间窗。
    pub fn range(&self) -> &TimeRange {
        match self {
            Self::LastN { range, .. } | Self::Window { range, .. } | Self::Csv { range, .. } => {
                range
            }
        }
    }
}

/// 聚合读路径的查询规格。
#[derive(Clone, Debug)]
pub struct AggregateQuery {
    pub filter: SeriesFilter,
    pub method: AggrMethod,
    pub resolution: Resolution,
    pub range: TimeRange,
    /// 为真时剔除 `samples = 0` 的槽位。
    pub filter_empty: bool,
}

/// 原始查询的结果变体，HTTP 层按标签分派。
#[derive(Debug)]
pub enum RawReply {
    /// 内存中的事件列表（Last-N 与窗口模式）。
    Inline(Vec<RawEvent>),
    /// 已物化的 CSV 文件（CSV 模式）。
    File(CsvFile),
}

/// 独占持有一份 CSV 物化文件，析构时删除。
///
/// # 契约
/// - **所有权**：创建者移交路径后不得再访问该文件；
/// - **清理**：`Drop` 尽力删除；删除失败不致 panic（临时目录最终由系统回收）。
#[derive(Debug)]
pub struct CsvFile {
    path: PathBuf,
    /// 响应中建议的下载文件名。
    pub file_name: String,
}

impl CsvFile {
    /// 接管一个已写完的 CSV 文件。
    pub fn new(path: PathBuf, file_name: impl Into<String>) -> Self {
        Self {
            path,
            file_name: file_name.into(),
        }
    }

    /// 物化文件所在路径。
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CsvFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_file_removes_itself_on_drop() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("sth-csv-drop-{}.csv", std::process::id()));
        std::fs::write(&path, "recvTime,attrValue\n").expect("write temp csv");
        assert!(path.exists());

        drop(CsvFile::new(path.clone(), "export.csv"));
        assert!(!path.exists());
    }

    #[test]
    fn raw_query_exposes_shared_filter() {
        let filter = SeriesFilter {
            entity_id: "Sensor:1".into(),
            entity_type: "Sensor".into(),
            attr_name: "t".into(),
        };
        let query = RawQuery::LastN {
            filter: filter.clone(),
            n: 5,
            range: TimeRange::default(),
        };
        assert_eq!(query.filter(), &filter);
    }
}
