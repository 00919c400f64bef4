//! 订阅信息
//!
//! 订阅由用户 1:1 持有。订阅“有效”当且仅当状态为 active / trial / grace-period，
//! 且结束时间为空或尚未到达。

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Months};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::Timestamp;

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Inactive,
    Trial,
    Active,
    PastDue,
    Canceled,
    Expired,
    Paused,
    Pending,
    GracePeriod,
    Upgrading,
    Downgrading,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Inactive => "INACTIVE",
            SubscriptionStatus::Trial => "TRIAL",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Canceled => "CANCELED",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::GracePeriod => "GRACE_PERIOD",
            SubscriptionStatus::Upgrading => "UPGRADING",
            SubscriptionStatus::Downgrading => "DOWNGRADING",
        }
    }

    /// 允许访问付费功能的状态
    pub fn grants_access(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trial | SubscriptionStatus::GracePeriod
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_ascii_uppercase().as_str() {
            "INACTIVE" => SubscriptionStatus::Inactive,
            "TRIAL" => SubscriptionStatus::Trial,
            "ACTIVE" => SubscriptionStatus::Active,
            "PAST_DUE" => SubscriptionStatus::PastDue,
            "CANCELED" => SubscriptionStatus::Canceled,
            "EXPIRED" => SubscriptionStatus::Expired,
            "PAUSED" => SubscriptionStatus::Paused,
            "PENDING" => SubscriptionStatus::Pending,
            "GRACE_PERIOD" => SubscriptionStatus::GracePeriod,
            "UPGRADING" => SubscriptionStatus::Upgrading,
            "DOWNGRADING" => SubscriptionStatus::Downgrading,
            other => {
                return Err(DomainError::validation_error(
                    "subscription_status",
                    format!("未知的订阅状态: {other}"),
                ))
            }
        };
        Ok(status)
    }
}

/// 订阅级别
///
/// 比较使用 `rank()` 给出的显式等级表，而不是声明顺序：
/// free < starter < basic < standard < pro < business < premium < enterprise < ultimate < lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionLevel {
    Free,
    Basic,
    Standard,
    Pro,
    Premium,
    Enterprise,
    Lifetime,
    Starter,
    Business,
    Ultimate,
}

impl SubscriptionLevel {
    /// 所有级别，按等级从低到高
    pub const ALL: [SubscriptionLevel; 10] = [
        SubscriptionLevel::Free,
        SubscriptionLevel::Starter,
        SubscriptionLevel::Basic,
        SubscriptionLevel::Standard,
        SubscriptionLevel::Pro,
        SubscriptionLevel::Business,
        SubscriptionLevel::Premium,
        SubscriptionLevel::Enterprise,
        SubscriptionLevel::Ultimate,
        SubscriptionLevel::Lifetime,
    ];

    pub fn rank(&self) -> u8 {
        match self {
            SubscriptionLevel::Free => 0,
            SubscriptionLevel::Starter => 1,
            SubscriptionLevel::Basic => 2,
            SubscriptionLevel::Standard => 3,
            SubscriptionLevel::Pro => 4,
            SubscriptionLevel::Business => 5,
            SubscriptionLevel::Premium => 6,
            SubscriptionLevel::Enterprise => 7,
            SubscriptionLevel::Ultimate => 8,
            SubscriptionLevel::Lifetime => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionLevel::Free => "FREE",
            SubscriptionLevel::Basic => "BASIC",
            SubscriptionLevel::Standard => "STANDARD",
            SubscriptionLevel::Pro => "PRO",
            SubscriptionLevel::Premium => "PREMIUM",
            SubscriptionLevel::Enterprise => "ENTERPRISE",
            SubscriptionLevel::Lifetime => "LIFETIME",
            SubscriptionLevel::Starter => "STARTER",
            SubscriptionLevel::Business => "BUSINESS",
            SubscriptionLevel::Ultimate => "ULTIMATE",
        }
    }

    /// 各级别的默认功能集合
    pub fn default_features(&self) -> Vec<String> {
        let features: &[&str] = match self {
            SubscriptionLevel::Free => &["basic_access", "read_only"],
            SubscriptionLevel::Basic => &["basic_access", "create_content", "basic_analytics"],
            SubscriptionLevel::Standard => &[
                "basic_access",
                "create_content",
                "advanced_analytics",
                "export_data",
            ],
            SubscriptionLevel::Pro => &[
                "basic_access",
                "create_content",
                "advanced_analytics",
                "export_data",
                "api_access",
                "priority_support",
            ],
            SubscriptionLevel::Premium => {
                &["all_features", "dedicated_support", "custom_integrations"]
            }
            _ => &["basic_access"],
        };
        features.iter().map(|f| (*f).to_owned()).collect()
    }
}

impl Ord for SubscriptionLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for SubscriptionLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SubscriptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        SubscriptionLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| {
                DomainError::validation_error(
                    "subscription_level",
                    format!("未知的订阅级别: {normalized}"),
                )
            })
    }
}

/// 订阅信息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub status: SubscriptionStatus,
    pub level: SubscriptionLevel,
    pub subscription_start: Timestamp,
    pub subscription_end: Option<Timestamp>,
    pub trial_end: Option<Timestamp>,
    /// 外部计费系统中的订阅 ID
    pub subscription_id: String,
    pub payment_method: String,
    pub auto_renew: bool,
    pub next_billing_date: Option<Timestamp>,
    pub amount: f64,
    pub currency: String,
    pub canceled_at: Option<Timestamp>,
    pub cancel_reason: String,
    pub grace_period_end: Option<Timestamp>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl SubscriptionInfo {
    /// 创建试用订阅
    pub fn new_trial(level: SubscriptionLevel, trial_days: u32, now: Timestamp) -> Self {
        let trial_end = (trial_days > 0).then(|| now + Duration::days(i64::from(trial_days)));
        Self {
            status: SubscriptionStatus::Trial,
            level,
            subscription_start: now,
            subscription_end: None,
            trial_end,
            subscription_id: String::new(),
            payment_method: String::new(),
            auto_renew: true,
            next_billing_date: None,
            amount: 0.0,
            currency: String::new(),
            canceled_at: None,
            cancel_reason: String::new(),
            grace_period_end: None,
            features: level.default_features(),
        }
    }

    /// 激活订阅，默认计费周期为一个月
    pub fn activate(
        &mut self,
        level: SubscriptionLevel,
        amount: f64,
        currency: impl Into<String>,
        now: Timestamp,
    ) {
        let end = now
            .checked_add_months(Months::new(1))
            .unwrap_or(now + Duration::days(30));

        self.status = SubscriptionStatus::Active;
        self.level = level;
        self.amount = amount;
        self.currency = currency.into();
        self.subscription_start = now;
        self.subscription_end = Some(end);
        self.next_billing_date = Some(end);
    }

    /// 取消订阅；`immediate` 时立即结束
    pub fn cancel(&mut self, reason: impl Into<String>, immediate: bool, now: Timestamp) {
        self.status = SubscriptionStatus::Canceled;
        self.cancel_reason = reason.into();
        self.canceled_at = Some(now);
        if immediate {
            self.subscription_end = Some(now);
        }
        self.auto_renew = false;
    }

    /// 订阅在给定时刻是否有效
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        if !self.status.grants_access() {
            return false;
        }
        match self.subscription_end {
            Some(end) => now <= end,
            None => true,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.status == SubscriptionStatus::Trial
    }

    pub fn has_trial_expired(&self, now: Timestamp) -> bool {
        self.trial_end.is_some_and(|end| now > end)
    }

    /// 距到期的天数，已过期为 0，无结束时间返回 None
    pub fn days_until_expiration(&self, now: Timestamp) -> Option<i64> {
        self.subscription_end
            .map(|end| (end - now).num_days().max(0))
    }

    /// 变更级别；降为 free 时订阅变为未激活
    pub fn update_level(&mut self, level: SubscriptionLevel, amount: f64) {
        let changed = self.level != level;
        self.level = level;
        self.amount = amount;
        if changed {
            self.status = if level == SubscriptionLevel::Free {
                SubscriptionStatus::Inactive
            } else {
                SubscriptionStatus::Active
            };
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}
