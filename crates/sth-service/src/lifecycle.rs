//! # lifecycle 模块说明
//!
//! ## 角色定位（Why）
//! - 进程生命周期：按“连接存储 → 绑定监听 → 受理请求”的顺序优雅启动，
//!   按“停止受理 → 排空在途 → 断开存储”的顺序优雅停机；
//! - 停机信号取 SIGINT / SIGTERM 先到者。
//!
//! ## 核心契约（What）
//! - 被取消的请求不阻止在途存储操作收尾（任务运行至完成，只是不再有人
//!   消费其结果）；
//! - KPI 上报任务随停机一并回收。

use std::sync::Arc;
use std::time::Duration;

use sth_core::prelude::SthError;
use sth_store_mongo::{MongoStore, MongoStoreConfig};
use tracing::info;

use crate::config::ServiceConfig;
use crate::http::{self, AppState};
use crate::kpi::{self, Kpi};

/// 启动服务并运行至停机信号。
pub async fn run(config: ServiceConfig) -> Result<(), SthError> {
    let store = MongoStore::connect(&MongoStoreConfig {
        uri: config.db_uri.clone(),
        pool_size: config.pool_size,
        authentication: config.db_authentication.clone(),
        replica_set: config.replica_set.clone(),
        name_codec: config.name_codec,
    })
    .await?;
    let store = Arc::new(store);

    let kpi = Arc::new(Kpi::default());
    let reporter = kpi::spawn_reporter(
        Arc::clone(&kpi),
        Duration::from_secs(config.kpi_interval_secs.max(1)),
    );

    let host = config.host.clone();
    let port = config.port;
    let state = AppState {
        store: Arc::clone(&store) as Arc<dyn sth_core::prelude::HistoricStore>,
        config: Arc::new(config),
        kpi,
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|err| SthError::config(format!("cannot bind {host}:{port}: {err}")))?;
    info!(%host, port, "sth-service accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| SthError::store_with_cause("serve", "http server failed", err))?;

    reporter.abort();
    // 优雅停机已排空在途请求；此处通常持有最后一个引用。
    if let Ok(store) = Arc::try_unwrap(store) {
        store.shutdown().await;
    }
    info!("sth-service stopped");
    Ok(())
}

/// SIGINT / SIGTERM 先到者触发停机。
async fn shutdown_signal() {
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
    info!("shutdown signal received, draining in-flight work");
}
