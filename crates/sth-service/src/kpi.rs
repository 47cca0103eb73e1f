//! # kpi 模块说明
//!
//! ## 角色定位（Why）
//! - 维护进程级运营指标：已受理请求计数，供周期性 KPI 日志与按需读取；
//! - 计数器是除存储连接池外唯一的进程级共享可变状态，以原子操作收敛竞争。
//!
//! ## 核心契约（What）
//! - `record_request` 在每个被受理的入站请求上恰好调用一次；
//! - `drain` 读取并清零（周期上报的语义），`attended_requests` 只读不清零。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// 进程级 KPI 计数器。
#[derive(Debug, Default)]
pub struct Kpi {
    attended_requests: AtomicU64,
}

impl Kpi {
    /// 记录一次被受理的入站请求。
    pub fn record_request(&self) {
        self.attended_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// 当前累计值（不清零）。
    pub fn attended_requests(&self) -> u64 {
        self.attended_requests.load(Ordering::Relaxed)
    }

    /// 读取并清零，供周期上报使用。
    pub fn drain(&self) -> u64 {
        self.attended_requests.swap(0, Ordering::Relaxed)
    }
}

/// 启动周期性 KPI 日志任务；随运行时关停一并退出。
pub fn spawn_reporter(kpi: Arc<Kpi>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 首个 tick 立即到期，跳过以避免启动即上报一条零值。
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!(attended_requests = kpi.drain(), "kpi report");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_resets_the_counter() {
        let kpi = Kpi::default();
        kpi.record_request();
        kpi.record_request();
        assert_eq!(kpi.attended_requests(), 2);
        assert_eq!(kpi.drain(), 2);
        assert_eq!(kpi.attended_requests(), 0);
    }
}
