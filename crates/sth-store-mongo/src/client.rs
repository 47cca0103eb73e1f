//! # client 模块说明
//!
//! ## 角色定位（Why）
//! - 封装驱动客户端的建立与回收：连接串解析、凭据注入、副本集与连接池
//!   上限设置；
//! - 连接池是全服务唯一的共享可变资源，池饱和时新的存储子任务在驱动内
//!   排队等待，核心不再额外排队。
//!
//! ## 核心契约（What）
//! - `connect` 成功后客户端可立即并发使用；`shutdown` 等待在途操作收尾后
//!   释放池内连接；
//! - `authentication` 取 `user:pass` 形态；解析失败视为配置错误而非存储
//!   错误，在启动阶段即失败。

use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;
use sth_core::prelude::{NameCodec, SthError};

use crate::error::map_store_error;

/// MongoDB 实现层的启动配置。
#[derive(Clone, Debug)]
pub struct MongoStoreConfig {
    /// 连接串（`mongodb://host:port,...`）。
    pub uri: String,
    /// 连接池上限。
    pub pool_size: u32,
    /// 可选凭据，`user:pass` 形态。
    pub authentication: Option<String>,
    /// 可选副本集名。
    pub replica_set: Option<String>,
    /// 集合命名模式。
    pub name_codec: NameCodec,
}

/// 短时历史存储契约的 MongoDB 实现。
///
/// 内含两类幂等记忆：已供给集合（省去重复的存在性探测与建索引）与已写入
/// 的散列反查记录（省去重复插入）。两者均为纯加速缓存，丢失只增加一次
/// 存储往返，不影响语义。
pub struct MongoStore {
    pub(crate) client: Client,
    pub(crate) name_codec: NameCodec,
    pub(crate) provisioned: dashmap::DashMap<(String, String), ()>,
    pub(crate) hash_records: dashmap::DashMap<(String, String), ()>,
}

impl MongoStore {
    /// 建立客户端并完成连接池参数设置。
    pub async fn connect(config: &MongoStoreConfig) -> Result<Self, SthError> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|err| map_store_error("connect", err))?;
        options.max_pool_size = Some(config.pool_size);
        options.app_name = Some("sth-service".into());
        if let Some(replica_set) = &config.replica_set {
            options.repl_set_name = Some(replica_set.clone());
        }
        if let Some(auth) = &config.authentication {
            let (user, pass) = auth.split_once(':').ok_or_else(|| {
                SthError::config("DB_AUTHENTICATION must take the form `user:pass`")
            })?;
            options.credential = Some(
                Credential::builder()
                    .username(user.to_owned())
                    .password(pass.to_owned())
                    .build(),
            );
        }

        let client =
            Client::with_options(options).map_err(|err| map_store_error("connect", err))?;
        Ok(Self {
            client,
            name_codec: config.name_codec,
            provisioned: dashmap::DashMap::new(),
            hash_records: dashmap::DashMap::new(),
        })
    }

    /// 优雅断开：等待在途操作收尾后释放连接池。
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}
