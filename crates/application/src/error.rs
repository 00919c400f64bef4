use domain::{DomainError, Interrupted};
use thiserror::Error;

use crate::password::PasswordHasherError;

/// 应用层错误
///
/// 领域错误原样透传；取消和超时单独表示，不进入领域错误码体系。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ApplicationError {
    /// 稳定的错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => err.code(),
            ApplicationError::Password(_) => "PASSWORD_HASH_FAILED",
            ApplicationError::Cancelled => "CANCELLED",
            ApplicationError::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ApplicationError::Domain(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            ApplicationError::Cancelled | ApplicationError::DeadlineExceeded
        )
    }
}

impl From<Interrupted> for ApplicationError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => ApplicationError::Cancelled,
            Interrupted::DeadlineExceeded => ApplicationError::DeadlineExceeded,
        }
    }
}
