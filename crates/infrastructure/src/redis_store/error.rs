//! Redis 错误映射

use domain::{DomainError, StorageErrorKind};

/// 将 Redis 客户端错误映射为存储错误
pub fn map_redis_err(err: redis::RedisError, operation: &str) -> DomainError {
    let kind = if err.is_timeout() {
        StorageErrorKind::Timeout
    } else if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.kind() == redis::ErrorKind::InvalidClientConfig
    {
        StorageErrorKind::Connection
    } else {
        StorageErrorKind::Query
    };
    DomainError::storage_with_cause(kind, format!("Redis {operation} 失败: {err}"), err)
}

/// 审计记录的序列化与反序列化错误
pub fn map_json_err(err: serde_json::Error, operation: &str) -> DomainError {
    DomainError::storage_with_cause(
        StorageErrorKind::Query,
        format!("审计记录 {operation} 序列化失败: {err}"),
        err,
    )
}
