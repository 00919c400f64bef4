//! 应用层实现。
//!
//! 这里提供账户生命周期的用例服务，负责输入校验、记录存储与审计存储之间的写入顺序，
//! 以及对外部原语（密码哈希、凭据令牌、时钟）的抽象。

pub mod audit;
pub mod clock;
pub mod error;
pub mod password;
pub mod services;
pub mod token;

pub use audit::{AuditDispatch, AuditOp, AuditWriter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use password::{looks_like_bcrypt_hash, PasswordHasher, PasswordHasherError};
pub use services::{
    AccountService, AccountServiceDependencies, Authentication, BanUserRequest, ComponentHealth,
    HealthReport, RegisterUserRequest, UpdateUserRequest,
};
pub use token::{TokenClaims, TokenError, TokenService};
