//! 基础设施层实现。
//!
//! 提供记录存储（PostgreSQL）、审计存储（Redis）、内存存储、密码哈希与 JWT 令牌等适配器，
//! 实现应用/领域层定义的接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod password;
pub mod redis_store;
pub mod repository;
pub mod token;

pub use builder::{Infrastructure, InfrastructureError};
pub use memory::{InMemoryAuditRepository, InMemoryUserRepository};
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use redis_store::{RedisAuditConfig, RedisAuditRepository};
pub use repository::{create_pg_pool, PgUserRepository};
pub use token::JwtTokenService;
