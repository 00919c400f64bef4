//! 请求上下文
//!
//! 每个服务操作和存储调用都显式接收 `RequestContext`，用于取消、超时以及日志关联。

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 操作被中断的原因。与领域错误分开，不属于错误码体系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// 可取消的请求上下文
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 创建带超时的上下文
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// 设置截止时间，只能收紧不能放宽
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// 派生子上下文：父上下文取消时子上下文随之取消
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// 派生独立上下文：保留 request_id，不继承取消与截止时间。
    /// 用于在请求结束后仍需完成的后台写入
    pub fn detached(&self) -> Self {
        Self {
            request_id: self.request_id,
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 检查上下文是否仍然有效
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Interrupted::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// 在上下文约束下执行 future，取消或超时时立即返回
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(Interrupted::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(Interrupted::DeadlineExceeded),
                    out = fut => Ok(out),
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(Interrupted::Cancelled),
                    out = fut => Ok(out),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { 42 }).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let ctx = RequestContext::new();
        ctx.cancel();
        let result = ctx.run(async { 1 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_child_is_cancelled_with_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.request_id(), parent.request_id());
    }

    #[tokio::test]
    async fn test_detached_ignores_parent_cancellation() {
        let parent = RequestContext::with_timeout(Duration::from_secs(1));
        let detached = parent.detached();
        parent.cancel();
        assert!(!detached.is_cancelled());
        assert!(detached.deadline().is_none());
        assert_eq!(detached.request_id(), parent.request_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_slow_future() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }
}
