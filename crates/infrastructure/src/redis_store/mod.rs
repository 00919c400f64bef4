//! Redis 审计存储
//!
//! 元数据存放在哈希中，活动、订阅变更和封禁历史以 JSON 列表存放，新记录位于表头。

pub mod audit_repository;
pub mod error;

pub use audit_repository::{RedisAuditConfig, RedisAuditRepository};
pub use error::map_redis_err;
