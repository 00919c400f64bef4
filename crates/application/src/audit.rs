//! 审计存储的尽力写入
//!
//! 权威写入成功之后才会提交审计写入。审计写入至多执行一次，失败只记录日志，
//! 不会影响调用方看到的结果。

use std::sync::Arc;

use domain::{
    AuditRepository, BanHistoryEntry, DomainResult, Metadata, RequestContext,
    SubscriptionHistoryEntry, UserActivity, UserId,
};
use tracing::warn;

/// 审计写入的执行方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditDispatch {
    /// 在当前请求内等待写入完成（仍受请求上下文的取消约束）
    #[default]
    Inline,
    /// 派发到后台任务，不阻塞当前请求，也不受其取消影响
    Background,
}

/// 一次审计写入
#[derive(Debug, Clone)]
pub enum AuditOp {
    SaveMetadata(UserId, Metadata),
    UpdateMetadata(UserId, Metadata),
    Activity(UserActivity),
    SubscriptionChange(SubscriptionHistoryEntry),
    BanChange(BanHistoryEntry),
}

impl AuditOp {
    pub fn name(&self) -> &'static str {
        match self {
            AuditOp::SaveMetadata(..) => "save_metadata",
            AuditOp::UpdateMetadata(..) => "update_metadata",
            AuditOp::Activity(_) => "log_activity",
            AuditOp::SubscriptionChange(_) => "log_subscription_change",
            AuditOp::BanChange(_) => "log_ban_change",
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            AuditOp::SaveMetadata(id, _) | AuditOp::UpdateMetadata(id, _) => *id,
            AuditOp::Activity(activity) => activity.user_id,
            AuditOp::SubscriptionChange(entry) => entry.user_id,
            AuditOp::BanChange(entry) => entry.user_id,
        }
    }

    async fn apply(&self, repo: &dyn AuditRepository, ctx: &RequestContext) -> DomainResult<()> {
        match self {
            AuditOp::SaveMetadata(id, metadata) => repo.save_metadata(ctx, *id, metadata).await,
            AuditOp::UpdateMetadata(id, metadata) => {
                repo.update_metadata(ctx, *id, metadata).await
            }
            AuditOp::Activity(activity) => repo.log_activity(ctx, activity).await,
            AuditOp::SubscriptionChange(entry) => repo.log_subscription_change(ctx, entry).await,
            AuditOp::BanChange(entry) => repo.log_ban_change(ctx, entry).await,
        }
    }
}

#[derive(Clone)]
pub struct AuditWriter {
    repository: Arc<dyn AuditRepository>,
    dispatch: AuditDispatch,
}

impl AuditWriter {
    pub fn new(repository: Arc<dyn AuditRepository>, dispatch: AuditDispatch) -> Self {
        Self {
            repository,
            dispatch,
        }
    }

    /// 提交一组审计写入，按顺序执行，单条失败不影响后续
    pub async fn submit(&self, ctx: &RequestContext, ops: Vec<AuditOp>) {
        if ops.is_empty() {
            return;
        }
        match self.dispatch {
            AuditDispatch::Inline => run_all(self.repository.as_ref(), ctx, &ops).await,
            AuditDispatch::Background => {
                let repository = Arc::clone(&self.repository);
                let ctx = ctx.detached();
                tokio::spawn(async move {
                    run_all(repository.as_ref(), &ctx, &ops).await;
                });
            }
        }
    }
}

async fn run_all(repo: &dyn AuditRepository, ctx: &RequestContext, ops: &[AuditOp]) {
    for op in ops {
        match ctx.run(op.apply(repo, ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                request_id = %ctx.request_id(),
                user_id = %op.user_id(),
                operation = op.name(),
                code = err.code(),
                error = %err,
                "审计写入失败，已忽略"
            ),
            Err(interrupted) => warn!(
                request_id = %ctx.request_id(),
                user_id = %op.user_id(),
                operation = op.name(),
                reason = %interrupted,
                "审计写入被中断"
            ),
        }
    }
}
