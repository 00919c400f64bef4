//! 内存存储实现，用于测试和本地运行
//!
//! 语义与 PostgreSQL / Redis 实现保持一致：软删除的用户对查询不可见，
//! 历史记录按时间倒序返回。`set_failing(true)` 可模拟存储宕机。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{
    normalize_activity_limit, AuditRepository, BanHistoryEntry, BanInfo, DomainError,
    DomainResult, Metadata, RequestContext, StorageErrorKind, SubscriptionHistoryEntry,
    SubscriptionInfo, Timestamp, User, UserActivity, UserFilter, UserId, UserRepository,
    UserStatus,
};
use tokio::sync::RwLock;

fn outage(store: &str) -> DomainError {
    DomainError::storage(StorageErrorKind::Connection, format!("{store} 不可用"))
}

fn matches_filter(user: &User, filter: &UserFilter, now: Timestamp) -> bool {
    if user.is_deleted() {
        return false;
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        let hit = [&user.name, &user.email, &user.phone]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    if filter
        .status
        .is_some_and(|status| user.effective_status(now) != status)
    {
        return false;
    }
    if filter.role.is_some_and(|role| user.role != role) {
        return false;
    }
    if let Some(is_banned) = filter.is_banned {
        if user.ban_is_active(now) != is_banned {
            return false;
        }
    }
    if let Some(sub_status) = filter.sub_status {
        if user.subscription.as_ref().map(|sub| sub.status) != Some(sub_status) {
            return false;
        }
    }
    if let Some(sub_level) = filter.sub_level {
        if user.subscription.as_ref().map(|sub| sub.level) != Some(sub_level) {
            return false;
        }
    }
    true
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
    failing: AtomicBool,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(outage("记录存储"));
        }
        Ok(())
    }

    /// 包含软删除用户在内的原始记录
    pub async fn raw(&self, id: UserId) -> Option<User> {
        self.users.read().await.get(&id).cloned()
    }

    /// 在未删除的用户上执行修改
    async fn modify<T>(
        &self,
        id: UserId,
        f: impl FnOnce(&mut User) -> DomainResult<T>,
    ) -> DomainResult<T> {
        self.check_available()?;
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) if !user.is_deleted() => f(user),
            _ => Err(DomainError::user_not_found(id.to_string())),
        }
    }

    fn email_taken(users: &HashMap<UserId, User>, email: &str, except: UserId) -> bool {
        users
            .values()
            .any(|u| u.id != except && !u.is_deleted() && u.email == email)
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, _ctx: &RequestContext, user: &User) -> DomainResult<User> {
        self.check_available()?;
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || Self::email_taken(&users, &user.email, user.id) {
            return Err(DomainError::user_already_exists(user.email.clone()));
        }
        let mut stored = user.clone();
        stored.metadata.clear();
        users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, _ctx: &RequestContext, id: UserId) -> DomainResult<Option<User>> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn find_by_email(&self, _ctx: &RequestContext, email: &str) -> DomainResult<Option<User>> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| !u.is_deleted() && u.email == email)
            .cloned())
    }

    async fn find_by_phone(&self, _ctx: &RequestContext, phone: &str) -> DomainResult<Option<User>> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| !u.is_deleted() && !u.phone.is_empty() && u.phone == phone)
            .cloned())
    }

    async fn update(&self, _ctx: &RequestContext, user: &User) -> DomainResult<User> {
        self.check_available()?;
        let mut users = self.users.write().await;
        if Self::email_taken(&users, &user.email, user.id) {
            return Err(DomainError::user_already_exists(user.email.clone()));
        }
        match users.get_mut(&user.id) {
            Some(current) if !current.is_deleted() => {
                let created_at = current.created_at;
                *current = user.clone();
                current.created_at = created_at;
                current.metadata.clear();
                Ok(current.clone())
            }
            _ => Err(DomainError::user_not_found(user.id.to_string())),
        }
    }

    async fn delete(&self, _ctx: &RequestContext, id: UserId, at: Timestamp) -> DomainResult<()> {
        self.check_available()?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| DomainError::user_not_found(id.to_string()))?;
        user.status = UserStatus::Deleted;
        user.touch(at);
        Ok(())
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        filter: &UserFilter,
        now: Timestamp,
    ) -> DomainResult<(Vec<User>, u64)> {
        self.check_available()?;
        let users = self.users.read().await;
        let mut matched: Vec<&User> = users
            .values()
            .filter(|u| matches_filter(u, filter, now))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len() as u64;
        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let page = matched
            .into_iter()
            .skip(offset)
            .take(filter.page_size as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn exists(&self, _ctx: &RequestContext, email: &str, name: &str) -> DomainResult<bool> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .values()
            .any(|u| !u.is_deleted() && (u.email == email || u.name == name)))
    }

    async fn ban(
        &self,
        _ctx: &RequestContext,
        id: UserId,
        ban: &BanInfo,
        status: UserStatus,
        at: Timestamp,
    ) -> DomainResult<()> {
        self.modify(id, |user| {
            user.ban_info = Some(ban.clone());
            user.status = status;
            user.touch(at);
            Ok(())
        })
        .await
    }

    async fn unban(&self, _ctx: &RequestContext, id: UserId, at: Timestamp) -> DomainResult<()> {
        self.modify(id, |user| {
            if let Some(ban) = user.ban_info.as_mut() {
                ban.unban();
            }
            user.status = UserStatus::Active;
            user.touch(at);
            Ok(())
        })
        .await
    }

    async fn update_subscription(
        &self,
        _ctx: &RequestContext,
        id: UserId,
        subscription: &SubscriptionInfo,
        at: Timestamp,
    ) -> DomainResult<()> {
        self.modify(id, |user| {
            user.subscription = Some(subscription.clone());
            user.touch(at);
            Ok(())
        })
        .await
    }

    async fn cancel_subscription(
        &self,
        _ctx: &RequestContext,
        id: UserId,
        reason: &str,
        immediate: bool,
        at: Timestamp,
    ) -> DomainResult<SubscriptionInfo> {
        self.modify(id, |user| {
            user.cancel_subscription(reason, immediate, at)?;
            user.subscription
                .clone()
                .ok_or_else(|| DomainError::SubscriptionNotFound {
                    user_id: id.to_string(),
                })
        })
        .await
    }

    async fn update_last_login(
        &self,
        _ctx: &RequestContext,
        id: UserId,
        at: Timestamp,
    ) -> DomainResult<()> {
        self.modify(id, |user| {
            user.last_login_at = Some(at);
            user.touch(at);
            Ok(())
        })
        .await
    }

    async fn ping(&self, _ctx: &RequestContext) -> DomainResult<()> {
        self.check_available()
    }
}

#[derive(Default)]
struct AuditLog {
    metadata: HashMap<UserId, Metadata>,
    activities: HashMap<UserId, Vec<UserActivity>>,
    subscription_history: HashMap<UserId, Vec<SubscriptionHistoryEntry>>,
    ban_history: HashMap<UserId, Vec<BanHistoryEntry>>,
}

/// 内存审计存储。记录按写入顺序追加，读取时倒序返回
#[derive(Default)]
pub struct InMemoryAuditRepository {
    log: RwLock<AuditLog>,
    failing: AtomicBool,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(outage("审计存储"));
        }
        Ok(())
    }
}

fn newest_first<T: Clone>(entries: Option<&Vec<T>>, limit: usize) -> Vec<T> {
    entries
        .map(|items| items.iter().rev().take(limit).cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn save_metadata(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        metadata: &Metadata,
    ) -> DomainResult<()> {
        self.check_available()?;
        self.log
            .write()
            .await
            .metadata
            .insert(user_id, metadata.clone());
        Ok(())
    }

    async fn get_metadata(&self, _ctx: &RequestContext, user_id: UserId) -> DomainResult<Metadata> {
        self.check_available()?;
        Ok(self
            .log
            .read()
            .await
            .metadata
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_metadata(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        metadata: &Metadata,
    ) -> DomainResult<()> {
        self.check_available()?;
        let mut log = self.log.write().await;
        let current = log.metadata.entry(user_id).or_default();
        current.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn delete_metadata(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        keys: &[String],
    ) -> DomainResult<()> {
        self.check_available()?;
        let mut log = self.log.write().await;
        if let Some(current) = log.metadata.get_mut(&user_id) {
            for key in keys {
                current.remove(key);
            }
        }
        Ok(())
    }

    async fn log_activity(&self, _ctx: &RequestContext, activity: &UserActivity) -> DomainResult<()> {
        self.check_available()?;
        self.log
            .write()
            .await
            .activities
            .entry(activity.user_id)
            .or_default()
            .push(activity.clone());
        Ok(())
    }

    async fn get_user_activities(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        limit: Option<u32>,
    ) -> DomainResult<Vec<UserActivity>> {
        self.check_available()?;
        let log = self.log.read().await;
        Ok(newest_first(
            log.activities.get(&user_id),
            normalize_activity_limit(limit),
        ))
    }

    async fn log_subscription_change(
        &self,
        _ctx: &RequestContext,
        entry: &SubscriptionHistoryEntry,
    ) -> DomainResult<()> {
        self.check_available()?;
        self.log
            .write()
            .await
            .subscription_history
            .entry(entry.user_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn get_subscription_history(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
    ) -> DomainResult<Vec<SubscriptionHistoryEntry>> {
        self.check_available()?;
        let log = self.log.read().await;
        Ok(newest_first(log.subscription_history.get(&user_id), usize::MAX))
    }

    async fn log_ban_change(&self, _ctx: &RequestContext, entry: &BanHistoryEntry) -> DomainResult<()> {
        self.check_available()?;
        self.log
            .write()
            .await
            .ban_history
            .entry(entry.user_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn get_ban_history(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
    ) -> DomainResult<Vec<BanHistoryEntry>> {
        self.check_available()?;
        let log = self.log.read().await;
        Ok(newest_first(log.ban_history.get(&user_id), usize::MAX))
    }

    async fn ping(&self, _ctx: &RequestContext) -> DomainResult<()> {
        self.check_available()
    }
}
