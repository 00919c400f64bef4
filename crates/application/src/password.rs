use async_trait::async_trait;
use thiserror::Error;

/// bcrypt 哈希的固定长度
pub const BCRYPT_HASH_LEN: usize = 60;
/// 可识别的 bcrypt 版本前缀
pub const BCRYPT_PREFIXES: [&str; 4] = ["$2a$", "$2b$", "$2x$", "$2y$"];

/// 判断输入是否已经是 bcrypt 哈希，避免重复哈希
pub fn looks_like_bcrypt_hash(value: &str) -> bool {
    value.len() == BCRYPT_HASH_LEN && BCRYPT_PREFIXES.iter().any(|p| value.starts_with(p))
}

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("hash error: {0}")]
    Hash(String),
    #[error("verify error: {0}")]
    Verify(String),
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<String, PasswordHasherError>;

    async fn verify(&self, plaintext: &str, hashed: &str) -> Result<bool, PasswordHasherError>;

    /// 输入是否为本哈希器可识别的哈希格式
    fn is_hashed(&self, value: &str) -> bool {
        looks_like_bcrypt_hash(value)
    }
}
