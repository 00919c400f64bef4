//! 用户实体定义
//!
//! 用户聚合包含身份信息、封禁信息和订阅信息。封禁与订阅都是 1:1 内嵌，
//! 元数据的权威副本保存在审计存储中，这里只是读取时合并进来的视图。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::entities::ban::BanInfo;
use crate::entities::subscription::{SubscriptionInfo, SubscriptionLevel};
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Timestamp, UserId};

/// 用户状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// 未指定，仅出现在过滤条件中
    Unspecified,
    #[default]
    Active,
    Inactive,
    Suspended,
    Pending,
    /// 软删除
    Deleted,
    BannedPermanently,
    BannedTemporarily,
    BannedByAdmin,
    BannedBySystem,
    BannedForSpam,
    BannedForAbuse,
    BannedForFraud,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Unspecified => "UNSPECIFIED",
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
            UserStatus::Suspended => "SUSPENDED",
            UserStatus::Pending => "PENDING",
            UserStatus::Deleted => "DELETED",
            UserStatus::BannedPermanently => "BANNED_PERMANENTLY",
            UserStatus::BannedTemporarily => "BANNED_TEMPORARILY",
            UserStatus::BannedByAdmin => "BANNED_BY_ADMIN",
            UserStatus::BannedBySystem => "BANNED_BY_SYSTEM",
            UserStatus::BannedForSpam => "BANNED_FOR_SPAM",
            UserStatus::BannedForAbuse => "BANNED_FOR_ABUSE",
            UserStatus::BannedForFraud => "BANNED_FOR_FRAUD",
        }
    }

    /// 全部封禁类状态
    pub const BANNED: [UserStatus; 7] = [
        UserStatus::BannedPermanently,
        UserStatus::BannedTemporarily,
        UserStatus::BannedByAdmin,
        UserStatus::BannedBySystem,
        UserStatus::BannedForSpam,
        UserStatus::BannedForAbuse,
        UserStatus::BannedForFraud,
    ];

    /// 是否属于某种封禁状态
    pub fn is_banned_status(&self) -> bool {
        Self::BANNED.contains(self)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_ascii_uppercase().as_str() {
            "UNSPECIFIED" | "" => UserStatus::Unspecified,
            "ACTIVE" => UserStatus::Active,
            "INACTIVE" => UserStatus::Inactive,
            "SUSPENDED" => UserStatus::Suspended,
            "PENDING" => UserStatus::Pending,
            "DELETED" => UserStatus::Deleted,
            "BANNED_PERMANENTLY" => UserStatus::BannedPermanently,
            "BANNED_TEMPORARILY" => UserStatus::BannedTemporarily,
            "BANNED_BY_ADMIN" => UserStatus::BannedByAdmin,
            "BANNED_BY_SYSTEM" => UserStatus::BannedBySystem,
            "BANNED_FOR_SPAM" => UserStatus::BannedForSpam,
            "BANNED_FOR_ABUSE" => UserStatus::BannedForAbuse,
            "BANNED_FOR_FRAUD" => UserStatus::BannedForFraud,
            other => {
                return Err(DomainError::validation_error(
                    "status",
                    format!("未知的用户状态: {other}"),
                ))
            }
        };
        Ok(status)
    }
}

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    User,
    Moderator,
    Admin,
    SuperAdmin,
    Banned,
}

impl UserRole {
    /// 权限等级，数值越大权限越高
    pub fn rank(&self) -> u8 {
        match self {
            UserRole::Banned => 0,
            UserRole::User => 1,
            UserRole::Moderator => 2,
            UserRole::Admin => 3,
            UserRole::SuperAdmin => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Moderator => "MODERATOR",
            UserRole::Admin => "ADMIN",
            UserRole::SuperAdmin => "SUPER_ADMIN",
            UserRole::Banned => "BANNED",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(UserRole::User),
            "MODERATOR" => Ok(UserRole::Moderator),
            "ADMIN" => Ok(UserRole::Admin),
            "SUPER_ADMIN" => Ok(UserRole::SuperAdmin),
            "BANNED" => Ok(UserRole::Banned),
            other => Err(DomainError::validation_error(
                "role",
                format!("未知的用户角色: {other}"),
            )),
        }
    }
}

/// 用户实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// 用户唯一ID，创建后不可变
    pub id: UserId,
    pub email: String,
    pub service_email: String,
    pub name: String,
    pub phone: String,
    /// 密码哈希（敏感信息，不在序列化中包含）
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub status: UserStatus,
    pub role: UserRole,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_login_at: Option<Timestamp>,
    pub ban_info: Option<BanInfo>,
    pub subscription: Option<SubscriptionInfo>,
    /// 审计存储中的元数据视图
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl User {
    /// 创建新用户，服务邮箱默认与邮箱相同
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        let email = email.into();
        Self {
            id: UserId::generate(),
            service_email: email.clone(),
            email,
            name: name.into(),
            phone: String::new(),
            password_hash: password.into(),
            status: UserStatus::Active,
            role: UserRole::User,
            created_at: now,
            updated_at: now,
            last_login_at: None,
            ban_info: None,
            subscription: None,
            metadata: HashMap::new(),
        }
    }

    /// 校验必填字段，名称缺省时使用邮箱
    pub fn validate(&mut self) -> DomainResult<()> {
        if self.email.trim().is_empty() {
            return Err(DomainError::validation_error("email", "邮箱不能为空"));
        }
        if self.password_hash.is_empty() {
            return Err(DomainError::validation_error("password", "密码不能为空"));
        }
        if self.name.trim().is_empty() {
            self.name = self.email.clone();
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_deleted(&self) -> bool {
        self.status == UserStatus::Deleted
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self.role,
            UserRole::Admin | UserRole::SuperAdmin | UserRole::Moderator
        )
    }

    /// 封禁是否生效
    ///
    /// 临时封禁到期时就地清除封禁标记，并把内存中的封禁状态恢复为 Active，
    /// 使过期封禁在下一次读取时自愈。不会写回存储。
    pub fn is_banned(&mut self, now: Timestamp) -> bool {
        let Some(ban) = self.ban_info.as_mut() else {
            return false;
        };
        if ban.is_active_at(now) {
            return true;
        }
        if ban.is_banned {
            ban.unban();
            if self.status.is_banned_status() {
                self.status = UserStatus::Active;
            }
        }
        false
    }

    /// 只读版本的封禁检查
    pub fn ban_is_active(&self, now: Timestamp) -> bool {
        self.ban_info
            .as_ref()
            .is_some_and(|ban| ban.is_active_at(now))
    }

    /// 存储中仍标记为封禁、但临时封禁已到期
    pub fn ban_has_lapsed(&self, now: Timestamp) -> bool {
        self.ban_info
            .as_ref()
            .is_some_and(|ban| ban.is_banned && !ban.is_active_at(now))
    }

    /// 按 `is_banned` 的过期规则得到的状态，不修改自身
    pub fn effective_status(&self, now: Timestamp) -> UserStatus {
        if self.status.is_banned_status() && self.ban_has_lapsed(now) {
            UserStatus::Active
        } else {
            self.status
        }
    }

    pub fn has_valid_subscription(&self, now: Timestamp) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|sub| sub.is_valid_at(now))
    }

    pub fn can_access_feature(&self, feature: &str, now: Timestamp) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|sub| sub.is_valid_at(now) && sub.has_feature(feature))
    }

    /// 封禁用户；`duration` 为空表示永久封禁
    pub fn ban(
        &mut self,
        reason: impl Into<String>,
        banned_by: impl Into<String>,
        duration: Option<Duration>,
        now: Timestamp,
    ) -> &BanInfo {
        let info = BanInfo::new(reason, banned_by, duration, now);
        self.status = if info.is_temporary() {
            UserStatus::BannedTemporarily
        } else {
            UserStatus::BannedPermanently
        };
        self.touch(now);
        self.ban_info.insert(info)
    }

    /// 解除封禁，保留封禁记录作为痕迹
    pub fn unban(&mut self, now: Timestamp) {
        if let Some(ban) = self.ban_info.as_mut() {
            ban.unban();
        }
        self.status = UserStatus::Active;
        self.touch(now);
    }

    /// 激活订阅，不存在时先创建
    pub fn activate_subscription(
        &mut self,
        level: SubscriptionLevel,
        amount: f64,
        currency: impl Into<String>,
        now: Timestamp,
    ) {
        let sub = self
            .subscription
            .get_or_insert_with(|| SubscriptionInfo::new_trial(level, 0, now));
        sub.activate(level, amount, currency, now);
        if sub.features.is_empty() {
            sub.features = level.default_features();
        }
        self.touch(now);
    }

    pub fn cancel_subscription(
        &mut self,
        reason: impl Into<String>,
        immediate: bool,
        now: Timestamp,
    ) -> DomainResult<()> {
        let sub = self
            .subscription
            .as_mut()
            .ok_or_else(|| DomainError::SubscriptionNotFound {
                user_id: self.id.to_string(),
            })?;
        sub.cancel(reason, immediate, now);
        self.touch(now);
        Ok(())
    }

    /// 更新修改时间，保证 `updated_at` 单调且不早于 `created_at`
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = now.max(self.updated_at).max(self.created_at);
    }

    pub fn clear_password(&mut self) {
        self.password_hash.clear();
    }

    /// 返回去掉密码的副本
    pub fn sanitized(mut self) -> Self {
        self.clear_password();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::subscription::SubscriptionStatus;
    use chrono::Utc;

    fn user() -> User {
        User::new("a@x.com", "hash", "alice", Utc::now())
    }

    #[test]
    fn test_new_user_defaults() {
        let user = user();
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.service_email, "a@x.com");
        assert_eq!(user.created_at, user.updated_at);
        assert!(user.ban_info.is_none());
    }

    #[test]
    fn test_validate_defaults_name_to_email() {
        let mut user = User::new("b@x.com", "hash", "", Utc::now());
        user.validate().unwrap();
        assert_eq!(user.name, "b@x.com");

        let mut missing = User::new("", "hash", "x", Utc::now());
        assert_eq!(missing.validate().unwrap_err().code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_temporary_ban_expires_lazily() {
        let now = Utc::now();
        let mut user = user();
        user.ban("spam", "mod1", Some(Duration::hours(1)), now);

        assert_eq!(user.status, UserStatus::BannedTemporarily);
        assert!(user.is_banned(now + Duration::minutes(30)));

        let later = now + Duration::hours(1) + Duration::seconds(1);
        assert!(!user.is_banned(later));
        assert_eq!(user.status, UserStatus::Active);
        assert!(!user.ban_info.as_ref().unwrap().is_banned);
    }

    #[test]
    fn test_effective_status_agrees_with_lazy_expiry() {
        let now = Utc::now();
        let mut user = user();
        user.ban("spam", "mod1", Some(Duration::hours(1)), now);

        let during = now + Duration::minutes(30);
        assert!(!user.ban_has_lapsed(during));
        assert_eq!(user.effective_status(during), UserStatus::BannedTemporarily);

        let later = now + Duration::hours(2);
        assert!(user.ban_has_lapsed(later));
        assert_eq!(user.effective_status(later), UserStatus::Active);
        // 只读检查不改动记录
        assert_eq!(user.status, UserStatus::BannedTemporarily);

        assert!(!user.is_banned(later));
        assert_eq!(user.effective_status(later), user.status);
        assert!(!user.ban_has_lapsed(later));
    }

    #[test]
    fn test_permanent_ban_never_expires() {
        let now = Utc::now();
        let mut user = user();
        user.ban("fraud", "admin", None, now);

        assert_eq!(user.status, UserStatus::BannedPermanently);
        assert!(user.is_banned(now + Duration::days(10_000)));
    }

    #[test]
    fn test_unban_restores_active() {
        let now = Utc::now();
        let mut user = user();
        user.ban("spam", "mod1", None, now);
        user.unban(now);

        assert!(!user.is_banned(now));
        assert_eq!(user.status, UserStatus::Active);
    }

    #[test]
    fn test_is_admin_covers_moderators() {
        let mut user = user();
        assert!(!user.is_admin());
        for role in [UserRole::Moderator, UserRole::Admin, UserRole::SuperAdmin] {
            user.role = role;
            assert!(user.is_admin());
        }
    }

    #[test]
    fn test_subscription_lifecycle_on_user() {
        let now = Utc::now();
        let mut user = user();
        assert!(!user.has_valid_subscription(now));
        assert_eq!(
            user.cancel_subscription("x", true, now).unwrap_err().code(),
            "SUBSCRIPTION_NOT_FOUND"
        );

        user.activate_subscription(SubscriptionLevel::Pro, 9.9, "USD", now);
        assert!(user.has_valid_subscription(now));
        assert!(user.can_access_feature("api_access", now));
        assert!(!user.can_access_feature("custom_integrations", now));

        user.cancel_subscription("", true, now).unwrap();
        let sub = user.subscription.as_ref().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(sub.subscription_end, sub.canceled_at);
        assert!(!user.has_valid_subscription(now + Duration::seconds(1)));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let now = Utc::now();
        let mut user = User::new("a@x.com", "h", "a", now);
        user.touch(now - Duration::hours(1));
        assert_eq!(user.updated_at, now);
        user.touch(now + Duration::hours(1));
        assert_eq!(user.updated_at, now + Duration::hours(1));
    }

    #[test]
    fn test_password_never_serialized() {
        let user = user();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["status"], "ACTIVE");
        assert!(user.sanitized().password_hash.is_empty());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "banned_temporarily".parse::<UserStatus>().unwrap(),
            UserStatus::BannedTemporarily
        );
        assert!(UserStatus::BannedForSpam.is_banned_status());
        assert!(!UserStatus::Deleted.is_banned_status());
        assert_eq!("super_admin".parse::<UserRole>().unwrap(), UserRole::SuperAdmin);
    }
}
