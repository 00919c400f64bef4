//! 凭据令牌原语
//!
//! 令牌的签发与校验（签名、过期）由实现方负责，服务层只依赖这里的接口。

use domain::{Timestamp, UserId, UserRole};
use thiserror::Error;

/// 校验通过后的令牌声明
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub email: String,
    pub role: UserRole,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token generation failed: {0}")]
    Generation(String),
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
}

#[cfg_attr(test, mockall::automock)]
pub trait TokenService: Send + Sync {
    fn issue(&self, user_id: UserId, email: &str, role: UserRole) -> Result<String, TokenError>;

    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError>;
}
