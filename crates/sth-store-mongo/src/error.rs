//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 把 MongoDB 驱动错误收敛为契约层的 [`SthError`]，阻止驱动类型泄漏到
//!   服务编排层；
//! - 识别“重复键”这一类需要特殊处理的写冲突：聚合骨架的并发插入竞态依赖
//!   它实现幂等。
//!
//! ## 设计要求（What）
//! - 映射保留底层原因链（`source()` 可回溯驱动错误），消息面向排障人员；
//! - [`is_duplicate_key`] 只认写路径的 11000 错误码，其余冲突按普通存储
//!   错误上抛。

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use sth_core::prelude::SthError;

/// MongoDB 的重复键错误码。
const DUPLICATE_KEY: i32 = 11000;

/// 将驱动错误映射为契约层存储错误，`operation` 标注失败的存储动作。
pub(crate) fn map_store_error(operation: &'static str, err: MongoError) -> SthError {
    SthError::store_with_cause(operation, err.to_string(), err)
}

/// 判断一次写失败是否为重复键冲突。
///
/// 聚合骨架采用“插入失败即视为他人已插入”的幂等协议，重复键是其中的
/// 预期分支，不得上抛。
pub(crate) fn is_duplicate_key(err: &MongoError) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// MongoDB 的“命名空间已存在”错误码（并发建集合的预期分支）。
const NAMESPACE_EXISTS: i32 = 48;

/// 判断一次建集合失败是否因目标已被并发创建。
pub(crate) fn is_namespace_exists(err: &MongoError) -> bool {
    match &*err.kind {
        ErrorKind::Command(command) => command.code == NAMESPACE_EXISTS,
        _ => false,
    }
}
