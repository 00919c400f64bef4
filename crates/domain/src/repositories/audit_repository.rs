//! 审计存储接口定义
//!
//! 审计存储保存用户元数据和只追加的历史记录，按 `UserId` 组织，不做外键约束。
//! 它与记录存储之间只保证最终一致，读取方必须容忍数据缺失。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::entities::activity::{BanHistoryEntry, SubscriptionHistoryEntry, UserActivity};
use crate::errors::DomainResult;
use crate::value_objects::UserId;

/// 用户元数据
pub type Metadata = HashMap<String, String>;

pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;
pub const MAX_ACTIVITY_LIMIT: usize = 1000;

/// 活动查询条数：未指定或为 0 时取默认值，超过上限时截断
pub fn normalize_activity_limit(limit: Option<u32>) -> usize {
    match limit {
        None | Some(0) => DEFAULT_ACTIVITY_LIMIT,
        Some(n) => (n as usize).min(MAX_ACTIVITY_LIMIT),
    }
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// 整体替换元数据
    async fn save_metadata(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        metadata: &Metadata,
    ) -> DomainResult<()>;

    /// 读取元数据，不存在时返回空集合
    async fn get_metadata(&self, ctx: &RequestContext, user_id: UserId) -> DomainResult<Metadata>;

    /// 合并写入元数据，未涉及的键保持不变
    async fn update_metadata(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        metadata: &Metadata,
    ) -> DomainResult<()>;

    /// 按键删除元数据
    async fn delete_metadata(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        keys: &[String],
    ) -> DomainResult<()>;

    async fn log_activity(&self, ctx: &RequestContext, activity: &UserActivity)
        -> DomainResult<()>;

    /// 最近的活动，按时间倒序
    async fn get_user_activities(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        limit: Option<u32>,
    ) -> DomainResult<Vec<UserActivity>>;

    async fn log_subscription_change(
        &self,
        ctx: &RequestContext,
        entry: &SubscriptionHistoryEntry,
    ) -> DomainResult<()>;

    /// 订阅变更历史，按时间倒序
    async fn get_subscription_history(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> DomainResult<Vec<SubscriptionHistoryEntry>>;

    async fn log_ban_change(&self, ctx: &RequestContext, entry: &BanHistoryEntry)
        -> DomainResult<()>;

    /// 封禁历史，按时间倒序
    async fn get_ban_history(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> DomainResult<Vec<BanHistoryEntry>>;

    async fn ping(&self, ctx: &RequestContext) -> DomainResult<()>;
}
