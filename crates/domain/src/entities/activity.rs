//! 审计记录：用户活动、订阅变更历史、封禁历史
//!
//! 这些记录只追加，不修改也不删除。

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entities::subscription::{SubscriptionLevel, SubscriptionStatus};
use crate::value_objects::{Timestamp, UserId};

/// 活动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Login,
    Logout,
    PasswordChange,
    ProfileUpdate,
    EmailVerification,
    SubscriptionStart,
    SubscriptionEnd,
    Ban,
    Unban,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Login => "LOGIN",
            ActivityType::Logout => "LOGOUT",
            ActivityType::PasswordChange => "PASSWORD_CHANGE",
            ActivityType::ProfileUpdate => "PROFILE_UPDATE",
            ActivityType::EmailVerification => "EMAIL_VERIFICATION",
            ActivityType::SubscriptionStart => "SUBSCRIPTION_START",
            ActivityType::SubscriptionEnd => "SUBSCRIPTION_END",
            ActivityType::Ban => "BAN",
            ActivityType::Unban => "UNBAN",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户活动记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivity {
    pub id: Uuid,
    pub user_id: UserId,
    pub activity_type: ActivityType,
    pub ip_address: String,
    pub user_agent: String,
    pub device_id: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub created_at: Timestamp,
}

impl UserActivity {
    pub fn new(user_id: UserId, activity_type: ActivityType, now: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            activity_type,
            ip_address: String::new(),
            user_agent: String::new(),
            device_id: String::new(),
            details: Map::new(),
            created_at: now,
        }
    }

    /// 附加客户端信息
    pub fn with_client(
        mut self,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        self.ip_address = ip_address.into();
        self.user_agent = user_agent.into();
        self.device_id = device_id.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// 订阅变更历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionHistoryEntry {
    pub id: Uuid,
    pub user_id: UserId,
    /// 首次订阅时为空
    pub old_level: Option<SubscriptionLevel>,
    pub new_level: SubscriptionLevel,
    pub old_status: Option<SubscriptionStatus>,
    pub new_status: SubscriptionStatus,
    pub reason: String,
    pub changed_by: String,
    pub changed_at: Timestamp,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SubscriptionHistoryEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        old_level: Option<SubscriptionLevel>,
        new_level: SubscriptionLevel,
        old_status: Option<SubscriptionStatus>,
        new_status: SubscriptionStatus,
        reason: impl Into<String>,
        changed_by: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            old_level,
            new_level,
            old_status,
            new_status,
            reason: reason.into(),
            changed_by: changed_by.into(),
            changed_at: now,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 封禁历史动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BanAction {
    Ban,
    Unban,
}

/// 封禁历史记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanHistoryEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub action: BanAction,
    pub reason: String,
    pub actor: String,
    /// 临时封禁的时长（秒）
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub created_at: Timestamp,
}

impl BanHistoryEntry {
    pub fn banned(
        user_id: UserId,
        reason: impl Into<String>,
        actor: impl Into<String>,
        duration: Option<Duration>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action: BanAction::Ban,
            reason: reason.into(),
            actor: actor.into(),
            duration_seconds: duration.map(|d| d.num_seconds()),
            details: Map::new(),
            created_at: now,
        }
    }

    pub fn unbanned(user_id: UserId, actor: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action: BanAction::Unban,
            reason: String::new(),
            actor: actor.into(),
            duration_seconds: None,
            details: Map::new(),
            created_at: now,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_seconds.map(Duration::seconds)
    }
}
