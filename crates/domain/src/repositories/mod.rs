//! Repository接口定义
//!
//! 领域层只定义两类存储的契约，具体驱动由基础设施层实现并注入：
//! - 记录存储（权威）：用户聚合
//! - 审计存储（次要）：元数据与只追加的历史记录

pub mod audit_repository;
pub mod user_repository;

pub use audit_repository::{
    normalize_activity_limit, AuditRepository, Metadata, DEFAULT_ACTIVITY_LIMIT,
    MAX_ACTIVITY_LIMIT,
};
pub use user_repository::UserRepository;

#[cfg(feature = "testing")]
pub use audit_repository::MockAuditRepository;
#[cfg(feature = "testing")]
pub use user_repository::MockUserRepository;
