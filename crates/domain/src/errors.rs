//! 领域模型错误定义
//!
//! 每个错误都带有稳定的机器可读错误码（`code()`），传输适配器只依赖错误码
//! 做协议状态映射；错误消息仅用于日志和诊断。

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::entities::user::UserRole;

/// 被包装的底层错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 存储基础设施错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// 连接失败（连接池耗尽、网络不可达等）
    Connection,
    /// 查询执行失败
    Query,
    /// 约束冲突（非唯一性约束）
    Constraint,
    /// 超时
    Timeout,
}

impl StorageErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorKind::Connection => "DB_CONNECTION_FAILED",
            StorageErrorKind::Query => "DB_QUERY_FAILED",
            StorageErrorKind::Constraint => "DB_CONSTRAINT_VIOLATION",
            StorageErrorKind::Timeout => "DB_TIMEOUT",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 领域模型错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 用户不存在（已软删除的用户同样视为不存在）
    #[error("用户不存在: {identifier}")]
    UserNotFound { identifier: String },

    /// 邮箱或用户名已被占用
    #[error("用户已存在: {identifier}")]
    UserAlreadyExists { identifier: String },

    /// 凭据无效。用户不存在与密码错误共用此错误，避免用户枚举
    #[error("用户名或密码错误")]
    InvalidCredentials,

    /// 令牌无效或无法解析出有效用户
    #[error("无效的令牌")]
    InvalidToken,

    /// 用户处于封禁状态
    #[error("用户已被封禁: {reason}")]
    UserBanned {
        reason: String,
        banned_until: Option<DateTime<Utc>>,
    },

    /// 管理员不能通过封禁流程被封禁
    #[error("不能封禁具有管理员角色的用户 ({role})")]
    AdminBanNotAllowed { role: UserRole },

    /// 用户当前没有生效的封禁
    #[error("用户未被封禁: {user_id}")]
    BanNotFound { user_id: String },

    /// 需要（更高级别的）订阅
    #[error("需要订阅: {reason}")]
    SubscriptionRequired { reason: String },

    /// 用户没有订阅
    #[error("订阅不存在: {user_id}")]
    SubscriptionNotFound { user_id: String },

    /// 字段级验证错误
    #[error("验证失败: {field}: {message}")]
    Validation {
        field: String,
        message: String,
        details: Map<String, Value>,
    },

    /// 令牌签发失败
    #[error("令牌生成失败: {message}")]
    TokenGeneration { message: String },

    /// 存储基础设施错误
    #[error("存储错误 [{kind}]: {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
        #[source]
        cause: Option<BoxError>,
    },
}

impl DomainError {
    /// 稳定的错误码
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::UserNotFound { .. } => "USER_NOT_FOUND",
            DomainError::UserAlreadyExists { .. } => "USER_ALREADY_EXISTS",
            DomainError::InvalidCredentials => "INVALID_CREDENTIALS",
            DomainError::InvalidToken => "INVALID_TOKEN",
            DomainError::UserBanned { .. } => "USER_BANNED",
            DomainError::AdminBanNotAllowed { .. } => "ADMIN_BAN_NOT_ALLOWED",
            DomainError::BanNotFound { .. } => "BAN_NOT_FOUND",
            DomainError::SubscriptionRequired { .. } => "SUBSCRIPTION_REQUIRED",
            DomainError::SubscriptionNotFound { .. } => "SUBSCRIPTION_NOT_FOUND",
            DomainError::Validation { .. } => "VALIDATION_FAILED",
            DomainError::TokenGeneration { .. } => "TOKEN_GENERATION_FAILED",
            DomainError::Storage { kind, .. } => kind.code(),
        }
    }

    /// 创建用户不存在错误
    pub fn user_not_found(identifier: impl Into<String>) -> Self {
        Self::UserNotFound {
            identifier: identifier.into(),
        }
    }

    /// 创建用户已存在错误
    pub fn user_already_exists(identifier: impl Into<String>) -> Self {
        Self::UserAlreadyExists {
            identifier: identifier.into(),
        }
    }

    pub fn subscription_required(reason: impl Into<String>) -> Self {
        Self::SubscriptionRequired {
            reason: reason.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let mut details = Map::new();
        details.insert("field".to_owned(), Value::String(field.clone()));
        Self::Validation {
            field,
            message: message.into(),
            details,
        }
    }

    /// 创建带长度细节的验证错误
    pub fn invalid_length(field: impl Into<String>, min: usize, max: usize, actual: usize) -> Self {
        let field = field.into();
        let mut details = Map::new();
        details.insert("field".to_owned(), Value::String(field.clone()));
        details.insert("type".to_owned(), Value::from("length"));
        details.insert("min".to_owned(), Value::from(min));
        details.insert("max".to_owned(), Value::from(max));
        details.insert("actual".to_owned(), Value::from(actual));
        Self::Validation {
            message: format!("长度必须在 {min} 到 {max} 之间，当前为 {actual}"),
            field,
            details,
        }
    }

    /// 创建存储错误
    pub fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self::Storage {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// 创建带底层原因的存储错误
    pub fn storage_with_cause(
        kind: StorageErrorKind,
        message: impl Into<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self::Storage {
            kind,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::UserNotFound { .. })
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
