//! sth-service 进程入口：装配日志订阅器、加载配置并运行服务至停机。

use std::path::PathBuf;

use tracing::error;
use tracing_subscriber::EnvFilter;

use sth_service::config::ServiceConfig;
use sth_service::lifecycle;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // 配置文件路径：首个命令行参数，或 STH_CONFIG 环境变量；都缺省则纯默认加环境覆盖。
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STH_CONFIG").ok())
        .map(PathBuf::from);

    let config = match ServiceConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(code = err.code(), error = %err, "configuration rejected");
            std::process::exit(1);
        }
    };

    if let Err(err) = lifecycle::run(config).await {
        error!(code = err.code(), error = %err, "service terminated abnormally");
        std::process::exit(1);
    }
}
