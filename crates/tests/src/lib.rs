//! 跨 crate 场景测试的公共环境
//!
//! 使用内存存储、真实的 bcrypt 与 JWT 实现，以及可手动推进的时钟。

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use application::{AccountService, ManualClock, RegisterUserRequest};
use chrono::Utc;
use config::AppConfig;
use domain::{Metadata, RequestContext, User};
use infrastructure::{InMemoryAuditRepository, InMemoryUserRepository, Infrastructure};
use tracing_subscriber::fmt::MakeWriter;

pub const TEST_PASSWORD: &str = "correct-horse-battery";
const TEST_SECRET: &str = "integration-test-secret-with-32-plus-chars";

pub struct TestEnvironment {
    pub service: AccountService,
    pub users: Arc<InMemoryUserRepository>,
    pub audit: Arc<InMemoryAuditRepository>,
    pub clock: Arc<ManualClock>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.jwt.secret = TEST_SECRET.into();
        config.security.bcrypt_cost = 4;
        config
    }

    pub fn with_config(config: AppConfig) -> Self {
        let users = Arc::new(InMemoryUserRepository::new());
        let audit = Arc::new(InMemoryAuditRepository::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let infrastructure = Infrastructure::assemble(&config, users.clone(), audit.clone());
        let service = infrastructure.account_service_with_clock(clock.clone());

        Self {
            service,
            users,
            audit,
            clock,
        }
    }

    pub async fn register(&self, email: &str, name: &str) -> User {
        self.service
            .register(
                &RequestContext::new(),
                RegisterUserRequest {
                    email: email.into(),
                    password: TEST_PASSWORD.into(),
                    name: name.into(),
                    metadata: Metadata::from([("source".to_string(), "test".to_string())]),
                    ..Default::default()
                },
            )
            .await
            .expect("register user")
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// 收集日志输出，用于断言告警确实被记录
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// 安装为当前线程的默认订阅者
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
