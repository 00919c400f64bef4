//! 封禁信息
//!
//! 由用户 1:1 持有，只能通过封禁/解封操作修改。

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::Timestamp;

/// 封禁信息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanInfo {
    pub is_banned: bool,
    pub banned_at: Timestamp,
    /// 为空表示永久封禁
    pub banned_until: Option<Timestamp>,
    pub reason: String,
    /// 执行封禁的操作者 ID
    pub banned_by: String,
}

impl BanInfo {
    /// 创建新的封禁信息
    pub fn new(
        reason: impl Into<String>,
        banned_by: impl Into<String>,
        duration: Option<Duration>,
        now: Timestamp,
    ) -> Self {
        Self {
            is_banned: true,
            banned_at: now,
            banned_until: duration.map(|d| now + d),
            reason: reason.into(),
            banned_by: banned_by.into(),
        }
    }

    /// 解除封禁
    pub fn unban(&mut self) {
        self.is_banned = false;
        self.banned_until = None;
    }

    pub fn is_temporary(&self) -> bool {
        self.banned_until.is_some()
    }

    /// 封禁在给定时刻是否生效（不修改自身）
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        if !self.is_banned {
            return false;
        }
        match self.banned_until {
            Some(until) => now <= until,
            None => true,
        }
    }

    /// 剩余封禁时长；永久封禁或已失效返回 None
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        if !self.is_banned {
            return None;
        }
        let until = self.banned_until?;
        let left = until - now;
        (left > Duration::zero()).then_some(left)
    }
}
