use std::sync::Arc;

use application::{
    AccountService, AccountServiceDependencies, AuditDispatch, Clock, SystemClock,
};
use config::AppConfig;
use domain::{AuditRepository, DomainError, UserRepository};
use thiserror::Error;
use tracing::info;

use crate::{
    memory::{InMemoryAuditRepository, InMemoryUserRepository},
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    redis_store::{RedisAuditConfig, RedisAuditRepository},
    repository::{create_pg_pool, PgUserRepository},
    token::JwtTokenService,
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("audit store error: {0}")]
    AuditStore(#[from] DomainError),
}

/// 装配好的存储与原语
#[derive(Clone)]
pub struct Infrastructure {
    pub user_repository: Arc<dyn UserRepository>,
    pub audit_repository: Arc<dyn AuditRepository>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
    pub token_service: Arc<JwtTokenService>,
    pub audit_dispatch: AuditDispatch,
}

impl Infrastructure {
    /// 连接 PostgreSQL 与 Redis，并执行数据库迁移
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(
            &config.database.url,
            config.database.max_connections,
            config.database.acquire_timeout(),
        )
        .await?;
        MIGRATOR.run(&pool).await?;
        info!("数据库迁移完成");

        let audit = RedisAuditRepository::connect(&RedisAuditConfig {
            url: config.redis.url.clone(),
            key_prefix: config.redis.key_prefix.clone(),
        })
        .await?;

        Ok(Self::assemble(
            config,
            Arc::new(PgUserRepository::new(pool)),
            Arc::new(audit),
        ))
    }

    /// 使用内存存储，适用于测试与本地运行
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::assemble(
            config,
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(InMemoryAuditRepository::new()),
        )
    }

    pub fn assemble(
        config: &AppConfig,
        user_repository: Arc<dyn UserRepository>,
        audit_repository: Arc<dyn AuditRepository>,
    ) -> Self {
        let audit_dispatch = if config.audit.background {
            AuditDispatch::Background
        } else {
            AuditDispatch::Inline
        };

        Self {
            user_repository,
            audit_repository,
            password_hasher: Arc::new(BcryptPasswordHasher::new(Some(
                config.security.bcrypt_cost,
            ))),
            token_service: Arc::new(JwtTokenService::new(&config.jwt)),
            audit_dispatch,
        }
    }

    pub fn account_service(&self) -> AccountService {
        self.account_service_with_clock(Arc::new(SystemClock))
    }

    pub fn account_service_with_clock(&self, clock: Arc<dyn Clock>) -> AccountService {
        AccountService::new(AccountServiceDependencies {
            user_repository: self.user_repository.clone(),
            audit_repository: self.audit_repository.clone(),
            password_hasher: self.password_hasher.clone(),
            token_service: self.token_service.clone(),
            clock,
            audit_dispatch: self.audit_dispatch,
        })
    }
}
