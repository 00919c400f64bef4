//! 记录存储与审计存储之间的一致性场景

use std::time::Duration as StdDuration;

use application::{ApplicationError, ComponentHealth, RegisterUserRequest};
use domain::{RequestContext, UserFilter};
use tests::{CapturedLogs, TestEnvironment, TEST_PASSWORD};

fn request(email: &str) -> RegisterUserRequest {
    RegisterUserRequest {
        email: email.into(),
        password: TEST_PASSWORD.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn audit_outage_does_not_fail_writes_but_is_logged() {
    let env = TestEnvironment::new();
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let ctx = RequestContext::new();

    env.audit.set_failing(true);
    let user = env
        .service
        .register(&ctx, request("alice@example.com"))
        .await
        .expect("record store write succeeds");
    env.service
        .authenticate(&ctx, "alice@example.com", TEST_PASSWORD)
        .await
        .expect("login still works");

    let output = logs.contents();
    assert!(output.contains("审计写入失败"), "missing audit warning: {output}");
    assert!(output.contains("log_activity"));
    assert!(output.contains("DB_CONNECTION_FAILED"));

    // 读取用户时缺失的元数据被容忍
    let fetched = env.service.get_user(&ctx, user.id).await.unwrap();
    assert!(fetched.metadata.is_empty());

    // 审计数据只能来自审计存储，此时报错
    let err = env
        .service
        .get_user_activities(&ctx, user.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DB_CONNECTION_FAILED");

    // 恢复后历史缺失，但权威状态完整
    env.audit.set_failing(false);
    assert!(env
        .service
        .get_user_activities(&ctx, user.id, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn record_store_failure_skips_audit_writes() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("bob@example.com", "bob").await;
    let before = env
        .service
        .get_user_activities(&ctx, user.id, None)
        .await
        .unwrap()
        .len();

    env.users.set_failing(true);
    let err = env
        .service
        .activate_subscription(&ctx, user.id, domain::SubscriptionLevel::Pro, 10.0, "USD")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DB_CONNECTION_FAILED");
    env.users.set_failing(false);

    let after = env
        .service
        .get_user_activities(&ctx, user.id, None)
        .await
        .unwrap();
    assert_eq!(after.len(), before);
    assert!(env
        .service
        .get_subscription_history(&ctx, user.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn cancelled_context_aborts_without_mutation() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = env
        .service
        .register(&ctx, request("carol@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Cancelled));
    assert_eq!(err.code(), "CANCELLED");

    let page = env
        .service
        .list_users(&RequestContext::new(), UserFilter::new(1, 20))
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn expired_deadline_is_reported_separately() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::with_timeout(StdDuration::ZERO);
    tokio::time::sleep(StdDuration::from_millis(5)).await;

    let err = env
        .service
        .list_users(&ctx, UserFilter::new(1, 20))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DEADLINE_EXCEEDED");
    assert!(err.domain().is_none());
}

#[tokio::test]
async fn background_audit_writes_complete_after_request() {
    let mut config = TestEnvironment::config();
    config.audit.background = true;
    let env = TestEnvironment::with_config(config);
    let ctx = RequestContext::new();

    let user = env.register("dave@example.com", "dave").await;
    ctx.cancel();

    let mut activities = Vec::new();
    for _ in 0..50 {
        activities = env
            .service
            .get_user_activities(&RequestContext::new(), user.id, None)
            .await
            .unwrap();
        if !activities.is_empty() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert_eq!(activities.len(), 1);
}

#[tokio::test]
async fn health_check_reports_degraded_audit_store() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();

    let report = env.service.health_check(&ctx).await.unwrap();
    assert!(!report.is_degraded());

    env.audit.set_failing(true);
    let report = env.service.health_check(&ctx).await.unwrap();
    assert!(report.is_degraded());
    assert!(matches!(report.audit_store, ComponentHealth::Degraded { .. }));

    env.users.set_failing(true);
    let err = env.service.health_check(&ctx).await.unwrap_err();
    assert_eq!(err.code(), "DB_CONNECTION_FAILED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_with_same_email_yield_one_user() {
    let env = TestEnvironment::new();

    let attempts = (0..8).map(|i| {
        let service = &env.service;
        async move {
            let ctx = RequestContext::new();
            let mut req = request("race@example.com");
            req.name = format!("racer-{i}");
            service.register(&ctx, req).await
        }
    });
    let results = futures::future::join_all(attempts).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), "USER_ALREADY_EXISTS");
    }

    let page = env
        .service
        .list_users(&RequestContext::new(), UserFilter::new(1, 20))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}
