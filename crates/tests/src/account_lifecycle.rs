//! 账户生命周期场景测试

use application::{BanUserRequest, Clock, UpdateUserRequest};
use chrono::Duration;
use domain::{
    ActivityType, BanAction, Metadata, RequestContext, SubscriptionInfo, SubscriptionLevel,
    SubscriptionStatus, UserFilter, UserRepository, UserRole, UserStatus,
};
use tests::{TestEnvironment, TEST_PASSWORD};

#[tokio::test]
async fn register_login_and_resolve_token() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("alice@example.com", "alice").await;
    assert!(user.password_hash.is_empty());
    assert_eq!(user.metadata.get("source").map(String::as_str), Some("test"));

    let auth = env
        .service
        .authenticate(&ctx, "alice@example.com", TEST_PASSWORD)
        .await
        .unwrap();
    assert_eq!(auth.user.id, user.id);
    assert!(auth.user.last_login_at.is_some());

    let resolved = env.service.validate_token(&ctx, &auth.token).await.unwrap();
    assert_eq!(resolved.id, user.id);
    assert_eq!(resolved.metadata.get("source").map(String::as_str), Some("test"));

    let activities = env
        .service
        .get_user_activities(&ctx, user.id, None)
        .await
        .unwrap();
    assert_eq!(activities.len(), 2);
    assert!(activities
        .iter()
        .all(|a| a.activity_type == ActivityType::Login));
}

#[tokio::test]
async fn wrong_password_and_unknown_email_are_indistinguishable() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    env.register("alice@example.com", "alice").await;

    let wrong = env
        .service
        .authenticate(&ctx, "alice@example.com", "not-the-password")
        .await
        .unwrap_err();
    let unknown = env
        .service
        .authenticate(&ctx, "nobody@example.com", TEST_PASSWORD)
        .await
        .unwrap_err();

    assert_eq!(wrong.code(), "INVALID_CREDENTIALS");
    assert_eq!(wrong.code(), unknown.code());
    assert_eq!(wrong.to_string(), unknown.to_string());
}

#[tokio::test]
async fn duplicate_email_or_name_is_rejected() {
    let env = TestEnvironment::new();
    env.register("alice@example.com", "alice").await;

    let by_email = env
        .service
        .register(
            &RequestContext::new(),
            application::RegisterUserRequest {
                email: "alice@example.com".into(),
                password: TEST_PASSWORD.into(),
                name: "someone-else".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(by_email.code(), "USER_ALREADY_EXISTS");

    let by_name = env
        .service
        .register(
            &RequestContext::new(),
            application::RegisterUserRequest {
                email: "other@example.com".into(),
                password: TEST_PASSWORD.into(),
                name: "alice".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(by_name.code(), "USER_ALREADY_EXISTS");
}

#[tokio::test]
async fn temporary_ban_expires_lazily() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("bob@example.com", "bob").await;

    let banned = env
        .service
        .ban_user(
            &ctx,
            BanUserRequest {
                user_id: user.id,
                reason: "spam".into(),
                banned_by: "moderator-1".into(),
                duration: Some(Duration::hours(1)),
            },
        )
        .await
        .unwrap();
    assert_eq!(banned.status, UserStatus::BannedTemporarily);

    let err = env
        .service
        .authenticate(&ctx, "bob@example.com", TEST_PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "USER_BANNED");
    assert_eq!(env.service.get_user(&ctx, user.id).await.unwrap_err().code(), "USER_BANNED");

    env.clock.advance(Duration::hours(1) + Duration::seconds(1));
    let auth = env
        .service
        .authenticate(&ctx, "bob@example.com", TEST_PASSWORD)
        .await
        .unwrap();
    assert_eq!(auth.user.status, UserStatus::Active);

    let history = env.service.get_ban_history(&ctx, user.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, BanAction::Ban);
    assert_eq!(history[0].duration(), Some(Duration::hours(1)));
}

#[tokio::test]
async fn lapsed_temporary_ban_is_not_listed_as_banned() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("frank@example.com", "frank").await;

    env.service
        .ban_user(
            &ctx,
            BanUserRequest {
                user_id: user.id,
                reason: "spam".into(),
                banned_by: "moderator-1".into(),
                duration: Some(Duration::hours(1)),
            },
        )
        .await
        .unwrap();
    let banned = UserFilter {
        is_banned: Some(true),
        ..UserFilter::new(1, 20)
    };
    assert_eq!(env.service.list_users(&ctx, banned.clone()).await.unwrap().total, 1);

    env.clock.advance(Duration::hours(2));
    let fetched = env.service.get_user(&ctx, user.id).await.unwrap();
    assert_eq!(fetched.status, UserStatus::Active);

    assert_eq!(env.service.list_users(&ctx, banned).await.unwrap().total, 0);
    let temporary = UserFilter {
        status: Some(UserStatus::BannedTemporarily),
        ..UserFilter::new(1, 20)
    };
    assert_eq!(env.service.list_users(&ctx, temporary.clone()).await.unwrap().total, 0);

    let page = env
        .service
        .list_users(
            &ctx,
            UserFilter {
                is_banned: Some(false),
                ..UserFilter::new(1, 20)
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    let listed = &page.users[0];
    assert_eq!(listed.status, UserStatus::Active);
    assert_eq!(listed.ban_info.as_ref().map(|ban| ban.is_banned), Some(false));

    // 解封到期的封禁仍报告 BAN_NOT_FOUND，但存储中的标记被清除
    let err = env.service.unban_user(&ctx, user.id, "moderator-1").await.unwrap_err();
    assert_eq!(err.code(), "BAN_NOT_FOUND");
    let stored = env.users.raw(user.id).await.unwrap();
    assert_eq!(stored.status, UserStatus::Active);
    assert!(!stored.ban_info.unwrap().is_banned);
}

#[tokio::test]
async fn permanent_ban_then_unban() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("carol@example.com", "carol").await;

    env.service
        .ban_user(
            &ctx,
            BanUserRequest {
                user_id: user.id,
                reason: "fraud".into(),
                banned_by: "admin".into(),
                duration: None,
            },
        )
        .await
        .unwrap();
    env.clock.advance(Duration::days(3650));
    assert_eq!(
        env.service.get_user(&ctx, user.id).await.unwrap_err().code(),
        "USER_BANNED"
    );

    let unbanned = env.service.unban_user(&ctx, user.id, "admin").await.unwrap();
    assert_eq!(unbanned.status, UserStatus::Active);
    let again = env.service.unban_user(&ctx, user.id, "admin").await.unwrap_err();
    assert_eq!(again.code(), "BAN_NOT_FOUND");

    let history = env.service.get_ban_history(&ctx, user.id).await.unwrap();
    let actions: Vec<_> = history.iter().map(|entry| entry.action).collect();
    assert_eq!(actions, vec![BanAction::Unban, BanAction::Ban]);
}

#[tokio::test]
async fn admins_cannot_be_banned() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("root@example.com", "root").await;

    let mut admin = env.users.raw(user.id).await.unwrap();
    admin.role = UserRole::Admin;
    env.users.update(&ctx, &admin).await.unwrap();

    let err = env
        .service
        .ban_user(
            &ctx,
            BanUserRequest {
                user_id: user.id,
                reason: "test".into(),
                banned_by: "someone".into(),
                duration: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ADMIN_BAN_NOT_ALLOWED");

    let stored = env.users.raw(user.id).await.unwrap();
    assert_eq!(stored.status, UserStatus::Active);
    assert!(stored.ban_info.is_none());
    assert!(env.service.get_ban_history(&ctx, user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn subscription_lifecycle_and_access_checks() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("dave@example.com", "dave").await;

    let no_sub = env
        .service
        .check_subscription_access(&ctx, user.id, SubscriptionLevel::Free, None)
        .await
        .unwrap_err();
    assert_eq!(no_sub.code(), "SUBSCRIPTION_REQUIRED");

    let updated = env
        .service
        .activate_subscription(&ctx, user.id, SubscriptionLevel::Pro, 29.0, "USD")
        .await
        .unwrap();
    assert_eq!(
        updated.subscription.as_ref().map(|s| s.status),
        Some(SubscriptionStatus::Active)
    );

    env.service
        .check_subscription_access(&ctx, user.id, SubscriptionLevel::Basic, None)
        .await
        .unwrap();
    let too_low = env
        .service
        .check_subscription_access(&ctx, user.id, SubscriptionLevel::Enterprise, None)
        .await
        .unwrap_err();
    assert_eq!(too_low.code(), "SUBSCRIPTION_REQUIRED");

    let canceled = env
        .service
        .cancel_subscription(&ctx, user.id, "switching provider", true)
        .await
        .unwrap();
    assert_eq!(
        canceled.subscription.as_ref().map(|s| s.status),
        Some(SubscriptionStatus::Canceled)
    );
    let after_cancel = env
        .service
        .check_subscription_access(&ctx, user.id, SubscriptionLevel::Free, None)
        .await
        .unwrap_err();
    assert_eq!(after_cancel.code(), "SUBSCRIPTION_REQUIRED");

    let history = env
        .service
        .get_subscription_history(&ctx, user.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].new_status, SubscriptionStatus::Canceled);
    assert_eq!(history[0].old_status, Some(SubscriptionStatus::Active));
    assert_eq!(history[1].old_level, None);
}

#[tokio::test]
async fn subscription_changes_are_read_back_from_the_store() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("gina@example.com", "gina").await;

    let mut subscription = SubscriptionInfo::new_trial(SubscriptionLevel::Business, 0, env.clock.now());
    subscription.status = SubscriptionStatus::Active;
    env.service
        .update_subscription(&ctx, user.id, subscription)
        .await
        .unwrap();

    let fetched = env.service.get_user(&ctx, user.id).await.unwrap();
    let stored = fetched.subscription.expect("subscription stored");
    assert_eq!(stored.level, SubscriptionLevel::Business);
    assert_eq!(stored.status, SubscriptionStatus::Active);

    env.clock.advance(Duration::minutes(5));
    env.service
        .cancel_subscription(&ctx, user.id, "", true)
        .await
        .unwrap();

    let fetched = env.service.get_user(&ctx, user.id).await.unwrap();
    let canceled = fetched.subscription.expect("subscription kept");
    assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    assert_eq!(canceled.canceled_at, Some(env.clock.now()));
    assert_eq!(canceled.subscription_end, canceled.canceled_at);
}

#[tokio::test]
async fn cancel_without_subscription_is_not_found() {
    let env = TestEnvironment::new();
    let user = env.register("erin@example.com", "erin").await;

    let err = env
        .service
        .cancel_subscription(&RequestContext::new(), user.id, "none", false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SUBSCRIPTION_NOT_FOUND");
}

#[tokio::test]
async fn soft_delete_is_idempotent_and_revokes_token() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("frank@example.com", "frank").await;
    let auth = env
        .service
        .authenticate(&ctx, "frank@example.com", TEST_PASSWORD)
        .await
        .unwrap();

    env.service.delete_user(&ctx, user.id).await.unwrap();
    env.service.delete_user(&ctx, user.id).await.unwrap();

    assert_eq!(
        env.service.get_user(&ctx, user.id).await.unwrap_err().code(),
        "USER_NOT_FOUND"
    );
    assert_eq!(
        env.service.validate_token(&ctx, &auth.token).await.unwrap_err().code(),
        "INVALID_TOKEN"
    );
    assert_eq!(
        env.service
            .authenticate(&ctx, "frank@example.com", TEST_PASSWORD)
            .await
            .unwrap_err()
            .code(),
        "INVALID_CREDENTIALS"
    );

    // 删除后邮箱可以重新注册
    let again = env.register("frank@example.com", "frank").await;
    assert_ne!(again.id, user.id);
}

#[tokio::test]
async fn update_user_and_change_password() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    let user = env.register("grace@example.com", "grace").await;

    let mut request = UpdateUserRequest::new(user.id);
    request.name = Some("Grace H.".into());
    request.metadata = Metadata::from([("locale".to_string(), "zh-CN".to_string())]);
    let updated = env.service.update_user(&ctx, request).await.unwrap();
    assert_eq!(updated.name, "Grace H.");

    let fetched = env.service.get_user(&ctx, user.id).await.unwrap();
    assert_eq!(fetched.metadata.get("source").map(String::as_str), Some("test"));
    assert_eq!(fetched.metadata.get("locale").map(String::as_str), Some("zh-CN"));

    let err = env
        .service
        .change_password(&ctx, user.id, "wrong-current", "new-password-1")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_CREDENTIALS");

    env.service
        .change_password(&ctx, user.id, TEST_PASSWORD, "new-password-1")
        .await
        .unwrap();
    env.service
        .authenticate(&ctx, "grace@example.com", "new-password-1")
        .await
        .unwrap();
    assert_eq!(
        env.service
            .authenticate(&ctx, "grace@example.com", TEST_PASSWORD)
            .await
            .unwrap_err()
            .code(),
        "INVALID_CREDENTIALS"
    );
}

#[tokio::test]
async fn list_users_filters_and_paginates() {
    let env = TestEnvironment::new();
    let ctx = RequestContext::new();
    for i in 0..5 {
        env.register(&format!("user{i}@example.com"), &format!("user{i}"))
            .await;
        env.clock.advance(Duration::seconds(1));
    }
    let target = env.register("zed@example.com", "zed").await;
    env.service
        .ban_user(
            &ctx,
            BanUserRequest {
                user_id: target.id,
                reason: "abuse".into(),
                banned_by: "mod".into(),
                duration: None,
            },
        )
        .await
        .unwrap();

    let page = env
        .service
        .list_users(&ctx, UserFilter::new(1, 4))
        .await
        .unwrap();
    assert_eq!(page.total, 6);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.users.len(), 4);
    assert_eq!(page.users[0].email, "zed@example.com");
    assert!(page.users.iter().all(|u| u.password_hash.is_empty()));

    let banned = env
        .service
        .list_users(
            &ctx,
            UserFilter {
                is_banned: Some(true),
                ..UserFilter::new(1, 20)
            },
        )
        .await
        .unwrap();
    assert_eq!(banned.total, 1);

    let search = env
        .service
        .list_users(
            &ctx,
            UserFilter {
                search: Some("USER3".into()),
                ..UserFilter::new(0, 0)
            },
        )
        .await
        .unwrap();
    assert_eq!(search.page, 1);
    assert_eq!(search.page_size, 20);
    assert_eq!(search.users.len(), 1);
}
