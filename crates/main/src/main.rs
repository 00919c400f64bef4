//! 主应用程序入口
//!
//! 加载配置，连接记录存储与审计存储，执行启动健康检查后周期性探测，直到收到退出信号。

use std::time::Duration;

use application::{AccountService, ComponentHealth};
use config::{AppConfig, LogFormat, LogConfig};
use domain::RequestContext;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn check_health(service: &AccountService) -> anyhow::Result<()> {
    let ctx = RequestContext::with_timeout(HEALTH_CHECK_TIMEOUT);
    let report = service.health_check(&ctx).await.map_err(|err| {
        tracing::error!(code = err.code(), error = %err, "记录存储不可用");
        err
    })?;

    if let ComponentHealth::Degraded { reason } = &report.audit_store {
        tracing::warn!(%reason, "审计存储不可用，审计数据将缺失");
    } else {
        tracing::debug!("健康检查通过");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.log);
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let infrastructure = Infrastructure::connect(&config).await?;
    let service = infrastructure.account_service();
    check_health(&service).await?;
    tracing::info!("账户服务已启动");

    let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = check_health(&service).await {
                    tracing::error!(error = %err, "周期健康检查失败");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("收到退出信号，账户服务停止");
                break;
            }
        }
    }

    Ok(())
}
