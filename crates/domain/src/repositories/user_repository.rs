//! 用户记录存储接口定义
//!
//! 记录存储是用户状态的唯一权威来源。状态为 `Deleted` 的用户对所有查找操作不可见，
//! 只有 `delete` 本身对其保持幂等。

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::entities::ban::BanInfo;
use crate::entities::filter::UserFilter;
use crate::entities::subscription::SubscriptionInfo;
use crate::entities::user::{User, UserStatus};
use crate::errors::DomainResult;
use crate::value_objects::{Timestamp, UserId};

/// 用户Repository接口
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 创建新用户。唯一性冲突必须返回 `USER_ALREADY_EXISTS`
    async fn create(&self, ctx: &RequestContext, user: &User) -> DomainResult<User>;

    async fn find_by_id(&self, ctx: &RequestContext, id: UserId) -> DomainResult<Option<User>>;

    async fn find_by_email(&self, ctx: &RequestContext, email: &str)
        -> DomainResult<Option<User>>;

    async fn find_by_phone(&self, ctx: &RequestContext, phone: &str)
        -> DomainResult<Option<User>>;

    /// 整体更新用户；用户不存在时返回 `USER_NOT_FOUND`
    async fn update(&self, ctx: &RequestContext, user: &User) -> DomainResult<User>;

    /// 软删除，对已删除用户幂等
    async fn delete(&self, ctx: &RequestContext, id: UserId, at: Timestamp) -> DomainResult<()>;

    /// 按过滤条件分页查询，返回当前页和总数。所有已设置的条件以 AND 组合
    ///
    /// `status` 与 `is_banned` 条件按 `now` 时刻的有效封禁判断，已到期的临时封禁视为未封禁。
    async fn list(
        &self,
        ctx: &RequestContext,
        filter: &UserFilter,
        now: Timestamp,
    ) -> DomainResult<(Vec<User>, u64)>;

    /// 邮箱或名称是否已被占用
    async fn exists(&self, ctx: &RequestContext, email: &str, name: &str) -> DomainResult<bool>;

    /// 原子地写入封禁信息和对应的用户状态
    async fn ban(
        &self,
        ctx: &RequestContext,
        id: UserId,
        ban: &BanInfo,
        status: UserStatus,
        at: Timestamp,
    ) -> DomainResult<()>;

    /// 清除封禁标记并恢复为 Active，封禁记录本身保留
    async fn unban(&self, ctx: &RequestContext, id: UserId, at: Timestamp) -> DomainResult<()>;

    async fn update_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        subscription: &SubscriptionInfo,
        at: Timestamp,
    ) -> DomainResult<()>;

    /// 原子地取消当前订阅并返回取消后的订阅；没有订阅时返回 `SUBSCRIPTION_NOT_FOUND`
    async fn cancel_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        reason: &str,
        immediate: bool,
        at: Timestamp,
    ) -> DomainResult<SubscriptionInfo>;

    async fn update_last_login(
        &self,
        ctx: &RequestContext,
        id: UserId,
        at: Timestamp,
    ) -> DomainResult<()>;

    /// 连通性检查
    async fn ping(&self, ctx: &RequestContext) -> DomainResult<()>;
}
