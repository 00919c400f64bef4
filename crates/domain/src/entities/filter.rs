//! 用户列表查询条件与分页结果

use serde::{Deserialize, Serialize};

use crate::entities::subscription::{SubscriptionLevel, SubscriptionStatus};
use crate::entities::user::{User, UserRole, UserStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// 用户过滤条件。未设置的字段不参与查询
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserFilter {
    pub page: u32,
    pub page_size: u32,
    /// 模糊匹配邮箱、名称、手机号
    pub search: Option<String>,
    pub status: Option<UserStatus>,
    pub role: Option<UserRole>,
    pub is_banned: Option<bool>,
    pub sub_status: Option<SubscriptionStatus>,
    pub sub_level: Option<SubscriptionLevel>,
}

impl UserFilter {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Default::default()
        }
    }

    /// 规范化分页参数，并去掉空的搜索词和未指定的状态
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        self.search = self
            .search
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());
        if self.status == Some(UserStatus::Unspecified) {
            self.status = None;
        }
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl UserPage {
    pub fn new(users: Vec<User>, total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(u64::from(page_size))
        };
        Self {
            users,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}
