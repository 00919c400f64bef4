//! 领域实体定义
//!
//! 用户聚合及其内嵌的封禁、订阅信息，以及审计记录。

pub mod activity;
pub mod ban;
pub mod filter;
pub mod subscription;
pub mod user;

pub use activity::{ActivityType, BanAction, BanHistoryEntry, SubscriptionHistoryEntry, UserActivity};
pub use ban::BanInfo;
pub use filter::{UserFilter, UserPage, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use subscription::{SubscriptionInfo, SubscriptionLevel, SubscriptionStatus};
pub use user::{User, UserRole, UserStatus};
