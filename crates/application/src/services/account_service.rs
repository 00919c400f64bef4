use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use domain::{
    ActivityType, AuditRepository, BanHistoryEntry, DomainError, DomainResult,
    Metadata, RequestContext, SubscriptionHistoryEntry, SubscriptionInfo, SubscriptionLevel,
    User, UserActivity, UserFilter, UserId, UserPage, UserRepository,
};
use tracing::{debug, info, warn};
use validator::ValidateEmail;

use crate::{
    audit::{AuditDispatch, AuditOp, AuditWriter},
    clock::Clock,
    error::ApplicationError,
    password::PasswordHasher,
    token::TokenService,
};

pub const MIN_EMAIL_LENGTH: usize = 3;
pub const MAX_EMAIL_LENGTH: usize = 255;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// 系统发起的变更使用的操作者
const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Default)]
pub struct RegisterUserRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: String,
    /// 为空时与 `email` 相同
    pub service_email: Option<String>,
    pub metadata: Metadata,
}

/// 部分更新，`None` 表示保持不变
#[derive(Debug, Clone)]
pub struct UpdateUserRequest {
    pub id: UserId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub service_email: Option<String>,
    /// 非空时重新哈希
    pub password: Option<String>,
    pub metadata: Metadata,
}

impl UpdateUserRequest {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            name: None,
            email: None,
            phone: None,
            service_email: None,
            password: None,
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BanUserRequest {
    pub user_id: UserId,
    pub reason: String,
    pub banned_by: String,
    /// 为空表示永久封禁
    pub duration: Option<Duration>,
}

/// 认证结果
#[derive(Debug, Clone)]
pub struct Authentication {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentHealth {
    Healthy,
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub record_store: ComponentHealth,
    pub audit_store: ComponentHealth,
}

impl HealthReport {
    pub fn is_degraded(&self) -> bool {
        self.record_store != ComponentHealth::Healthy || self.audit_store != ComponentHealth::Healthy
    }
}

pub struct AccountServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub audit_repository: Arc<dyn AuditRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub token_service: Arc<dyn TokenService>,
    pub clock: Arc<dyn Clock>,
    pub audit_dispatch: AuditDispatch,
}

/// 账户服务：协调记录存储与审计存储，是传输适配器唯一的入口。
///
/// 写入顺序固定：先写记录存储，成功后再尽力写审计存储。
/// 记录存储失败立即返回；审计存储失败只记录日志。
pub struct AccountService {
    deps: AccountServiceDependencies,
    audit: AuditWriter,
}

impl AccountService {
    pub fn new(deps: AccountServiceDependencies) -> Self {
        let audit = AuditWriter::new(Arc::clone(&deps.audit_repository), deps.audit_dispatch);
        Self { deps, audit }
    }

    /// 在上下文约束下执行存储调用
    async fn store<T, F>(&self, ctx: &RequestContext, fut: F) -> Result<T, ApplicationError>
    where
        F: Future<Output = DomainResult<T>>,
    {
        Ok(ctx.run(fut).await??)
    }

    /// 加载未删除的用户，不存在时返回 `USER_NOT_FOUND`
    async fn load_user(&self, ctx: &RequestContext, id: UserId) -> Result<User, ApplicationError> {
        self.store(ctx, self.deps.user_repository.find_by_id(ctx, id))
            .await?
            .ok_or_else(|| DomainError::user_not_found(id.to_string()).into())
    }

    async fn hash_password(
        &self,
        ctx: &RequestContext,
        password: &str,
    ) -> Result<String, ApplicationError> {
        Ok(ctx.run(self.deps.password_hasher.hash(password)).await??)
    }

    /// 原样保留已是哈希格式的输入，否则校验后哈希
    async fn normalize_password(
        &self,
        ctx: &RequestContext,
        password: &str,
    ) -> Result<String, ApplicationError> {
        if self.deps.password_hasher.is_hashed(password) {
            return Ok(password.to_owned());
        }
        self.validate_password(password)?;
        self.hash_password(ctx, password).await
    }

    async fn password_matches(
        &self,
        ctx: &RequestContext,
        password: &str,
        user: &User,
    ) -> Result<bool, ApplicationError> {
        match ctx
            .run(self.deps.password_hasher.verify(password, &user.password_hash))
            .await?
        {
            Ok(matched) => Ok(matched),
            Err(err) => {
                // 存储的哈希无法解析时按凭据错误处理
                warn!(user_id = %user.id, error = %err, "密码校验失败");
                Ok(false)
            }
        }
    }

    fn banned_error(user: &User) -> ApplicationError {
        let (reason, banned_until) = user
            .ban_info
            .as_ref()
            .map(|ban| (ban.reason.clone(), ban.banned_until))
            .unwrap_or_default();
        DomainError::UserBanned {
            reason,
            banned_until,
        }
        .into()
    }

    pub fn validate_email(&self, email: &str) -> DomainResult<()> {
        let len = email.chars().count();
        if !(MIN_EMAIL_LENGTH..=MAX_EMAIL_LENGTH).contains(&len) {
            return Err(DomainError::invalid_length(
                "email",
                MIN_EMAIL_LENGTH,
                MAX_EMAIL_LENGTH,
                len,
            ));
        }
        if !email.validate_email() {
            return Err(DomainError::validation_error("email", "邮箱格式不正确"));
        }
        Ok(())
    }

    pub fn validate_password(&self, password: &str) -> DomainResult<()> {
        let len = password.chars().count();
        if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len) {
            return Err(DomainError::invalid_length(
                "password",
                MIN_PASSWORD_LENGTH,
                MAX_PASSWORD_LENGTH,
                len,
            ));
        }
        Ok(())
    }

    pub async fn register(
        &self,
        ctx: &RequestContext,
        request: RegisterUserRequest,
    ) -> Result<User, ApplicationError> {
        let email = request.email.trim().to_owned();
        self.validate_email(&email)?;
        if request.password.is_empty() {
            return Err(DomainError::validation_error("password", "密码不能为空").into());
        }
        let name = match request.name.trim() {
            "" => email.clone(),
            name => name.to_owned(),
        };

        if self
            .store(ctx, self.deps.user_repository.exists(ctx, &email, &name))
            .await?
        {
            return Err(DomainError::user_already_exists(email).into());
        }

        let password_hash = self.normalize_password(ctx, &request.password).await?;
        let now = self.deps.clock.now();
        let mut user = User::new(email, password_hash, name, now);
        user.phone = request.phone;
        if let Some(service_email) = request.service_email.filter(|s| !s.trim().is_empty()) {
            user.service_email = service_email;
        }
        user.validate()?;

        let mut created = self
            .store(ctx, self.deps.user_repository.create(ctx, &user))
            .await?;
        info!(user_id = %created.id, "用户注册成功: {}", created.email);

        let activity = UserActivity::new(created.id, ActivityType::Login, now)
            .with_detail("event", "register");
        self.audit
            .submit(
                ctx,
                vec![
                    AuditOp::SaveMetadata(created.id, request.metadata.clone()),
                    AuditOp::Activity(activity),
                ],
            )
            .await;

        created.metadata = request.metadata;
        Ok(created.sanitized())
    }

    pub async fn get_user(&self, ctx: &RequestContext, id: UserId) -> Result<User, ApplicationError> {
        let mut user = self.load_user(ctx, id).await?;
        if user.is_banned(self.deps.clock.now()) {
            return Err(Self::banned_error(&user));
        }

        match ctx
            .run(self.deps.audit_repository.get_metadata(ctx, id))
            .await?
        {
            Ok(metadata) => user.metadata.extend(metadata),
            Err(err) => warn!(user_id = %id, error = %err, "读取用户元数据失败，已忽略"),
        }

        debug!(user_id = %id, "读取用户");
        Ok(user.sanitized())
    }

    pub async fn update_user(
        &self,
        ctx: &RequestContext,
        request: UpdateUserRequest,
    ) -> Result<User, ApplicationError> {
        let mut user = self.load_user(ctx, request.id).await?;
        let mut updated_fields = Vec::new();

        if let Some(name) = request.name {
            user.name = name;
            updated_fields.push("name");
        }
        if let Some(email) = request.email {
            self.validate_email(&email)?;
            user.email = email;
            updated_fields.push("email");
        }
        if let Some(phone) = request.phone {
            user.phone = phone;
            updated_fields.push("phone");
        }
        if let Some(service_email) = request.service_email {
            user.service_email = service_email;
            updated_fields.push("service_email");
        }
        if let Some(password) = request.password.filter(|p| !p.is_empty()) {
            user.password_hash = self.normalize_password(ctx, &password).await?;
            updated_fields.push("password");
        }
        let now = self.deps.clock.now();
        user.touch(now);

        let mut updated = self
            .store(ctx, self.deps.user_repository.update(ctx, &user))
            .await?;
        info!(user_id = %updated.id, "用户资料已更新");

        let mut ops = Vec::with_capacity(2);
        if !request.metadata.is_empty() {
            ops.push(AuditOp::UpdateMetadata(updated.id, request.metadata.clone()));
        }
        ops.push(AuditOp::Activity(
            UserActivity::new(updated.id, ActivityType::ProfileUpdate, now)
                .with_detail("fields_updated", updated_fields.join(", ")),
        ));
        self.audit.submit(ctx, ops).await;

        updated.metadata.extend(request.metadata);
        Ok(updated.sanitized())
    }

    /// 软删除，对已删除的用户幂等
    pub async fn delete_user(&self, ctx: &RequestContext, id: UserId) -> Result<(), ApplicationError> {
        let now = self.deps.clock.now();
        self.store(ctx, self.deps.user_repository.delete(ctx, id, now))
            .await?;
        info!(user_id = %id, "用户已删除");
        Ok(())
    }

    pub async fn list_users(
        &self,
        ctx: &RequestContext,
        filter: UserFilter,
    ) -> Result<UserPage, ApplicationError> {
        let filter = filter.normalized();
        let now = self.deps.clock.now();
        let (users, total) = self
            .store(ctx, self.deps.user_repository.list(ctx, &filter, now))
            .await?;
        let users = users
            .into_iter()
            .map(|mut user| {
                user.is_banned(now);
                user.sanitized()
            })
            .collect();
        debug!(total, page = filter.page, "查询用户列表");
        Ok(UserPage::new(users, total, filter.page, filter.page_size))
    }

    /// 用户不存在与密码错误返回同一个错误码
    pub async fn authenticate(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<Authentication, ApplicationError> {
        let mut user = self
            .store(ctx, self.deps.user_repository.find_by_email(ctx, email.trim()))
            .await?
            .ok_or(DomainError::InvalidCredentials)?;

        if !self.password_matches(ctx, password, &user).await? {
            return Err(DomainError::InvalidCredentials.into());
        }

        let now = self.deps.clock.now();
        if user.is_banned(now) {
            return Err(Self::banned_error(&user));
        }

        let token = self
            .deps
            .token_service
            .issue(user.id, &user.email, user.role)
            .map_err(|err| DomainError::TokenGeneration {
                message: err.to_string(),
            })?;

        match ctx
            .run(self.deps.user_repository.update_last_login(ctx, user.id, now))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(user_id = %user.id, error = %err, "更新最后登录时间失败，已忽略"),
            Err(interrupted) => {
                warn!(user_id = %user.id, reason = %interrupted, "更新最后登录时间被中断")
            }
        }
        user.last_login_at = Some(now);

        self.audit
            .submit(
                ctx,
                vec![AuditOp::Activity(UserActivity::new(
                    user.id,
                    ActivityType::Login,
                    now,
                ))],
            )
            .await;

        info!(user_id = %user.id, "用户登录成功");
        Ok(Authentication {
            user: user.sanitized(),
            token,
        })
    }

    /// 校验令牌并重新解析用户。令牌或用户查找的任何失败都返回 `INVALID_TOKEN`，
    /// 存储故障与取消除外
    pub async fn validate_token(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> Result<User, ApplicationError> {
        let claims = self.deps.token_service.verify(token).map_err(|err| {
            debug!(error = %err, "令牌校验失败");
            DomainError::InvalidToken
        })?;

        match self.get_user(ctx, claims.user_id).await {
            Ok(user) => Ok(user),
            Err(err) if err.is_interrupted() => Err(err),
            Err(ApplicationError::Domain(err @ DomainError::Storage { .. })) => Err(err.into()),
            Err(err) => {
                debug!(user_id = %claims.user_id, code = err.code(), "令牌对应的用户不可用");
                Err(DomainError::InvalidToken.into())
            }
        }
    }

    pub async fn change_password(
        &self,
        ctx: &RequestContext,
        id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApplicationError> {
        let mut user = self.load_user(ctx, id).await?;
        if !self.password_matches(ctx, current_password, &user).await? {
            return Err(DomainError::InvalidCredentials.into());
        }

        self.validate_password(new_password)?;
        user.password_hash = self.hash_password(ctx, new_password).await?;
        let now = self.deps.clock.now();
        user.touch(now);

        self.store(ctx, self.deps.user_repository.update(ctx, &user))
            .await?;
        info!(user_id = %id, "用户密码已修改");

        self.audit
            .submit(
                ctx,
                vec![AuditOp::Activity(UserActivity::new(
                    id,
                    ActivityType::PasswordChange,
                    now,
                ))],
            )
            .await;
        Ok(())
    }

    pub async fn ban_user(
        &self,
        ctx: &RequestContext,
        request: BanUserRequest,
    ) -> Result<User, ApplicationError> {
        if request.duration.is_some_and(|d| d <= Duration::zero()) {
            return Err(DomainError::validation_error("duration", "封禁时长必须大于 0").into());
        }

        let mut user = self.load_user(ctx, request.user_id).await?;
        if user.is_admin() {
            return Err(DomainError::AdminBanNotAllowed { role: user.role }.into());
        }

        let now = self.deps.clock.now();
        let ban = user
            .ban(&request.reason, &request.banned_by, request.duration, now)
            .clone();

        self.store(
            ctx,
            self.deps
                .user_repository
                .ban(ctx, user.id, &ban, user.status, now),
        )
        .await?;
        info!(
            user_id = %user.id,
            banned_by = %request.banned_by,
            permanent = request.duration.is_none(),
            "用户已被封禁: {}", request.reason
        );

        let mut activity = UserActivity::new(user.id, ActivityType::Ban, now)
            .with_detail("reason", request.reason.clone())
            .with_detail("banned_by", request.banned_by.clone());
        if let Some(duration) = request.duration {
            activity = activity.with_detail("duration_seconds", duration.num_seconds());
        }
        self.audit
            .submit(
                ctx,
                vec![
                    AuditOp::BanChange(BanHistoryEntry::banned(
                        user.id,
                        request.reason,
                        request.banned_by,
                        request.duration,
                        now,
                    )),
                    AuditOp::Activity(activity),
                ],
            )
            .await;

        Ok(user.sanitized())
    }

    pub async fn unban_user(
        &self,
        ctx: &RequestContext,
        id: UserId,
        unbanned_by: &str,
    ) -> Result<User, ApplicationError> {
        let mut user = self.load_user(ctx, id).await?;
        let now = self.deps.clock.now();
        if user.ban_has_lapsed(now) {
            // 到期的临时封禁顺带写回存储
            match self
                .store(ctx, self.deps.user_repository.unban(ctx, id, now))
                .await
            {
                Ok(()) => debug!(user_id = %id, "已清除到期的临时封禁"),
                Err(err) if err.domain().is_none() => return Err(err),
                Err(err) => warn!(user_id = %id, error = %err, "清除到期封禁失败，已忽略"),
            }
        }
        if !user.is_banned(now) {
            return Err(DomainError::BanNotFound {
                user_id: id.to_string(),
            }
            .into());
        }

        user.unban(now);
        self.store(ctx, self.deps.user_repository.unban(ctx, id, now))
            .await?;
        info!(user_id = %id, unbanned_by, "用户已解封");

        self.audit
            .submit(
                ctx,
                vec![
                    AuditOp::BanChange(BanHistoryEntry::unbanned(id, unbanned_by, now)),
                    AuditOp::Activity(
                        UserActivity::new(id, ActivityType::Unban, now)
                            .with_detail("unbanned_by", unbanned_by),
                    ),
                ],
            )
            .await;

        Ok(user.sanitized())
    }

    pub async fn update_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        subscription: SubscriptionInfo,
    ) -> Result<User, ApplicationError> {
        let user = self.load_user(ctx, id).await?;
        self.persist_subscription(ctx, user, subscription, "subscription updated")
            .await
    }

    /// 按默认计费周期激活订阅
    pub async fn activate_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        level: SubscriptionLevel,
        amount: f64,
        currency: &str,
    ) -> Result<User, ApplicationError> {
        let user = self.load_user(ctx, id).await?;
        let now = self.deps.clock.now();
        let mut subscription = user
            .subscription
            .clone()
            .unwrap_or_else(|| SubscriptionInfo::new_trial(level, 0, now));
        subscription.activate(level, amount, currency, now);
        subscription.features = level.default_features();

        self.persist_subscription(ctx, user, subscription, "subscription activated")
            .await
    }

    async fn persist_subscription(
        &self,
        ctx: &RequestContext,
        mut user: User,
        subscription: SubscriptionInfo,
        reason: &str,
    ) -> Result<User, ApplicationError> {
        let previous = user.subscription.as_ref().map(|s| (s.level, s.status));
        let now = self.deps.clock.now();

        self.store(
            ctx,
            self.deps
                .user_repository
                .update_subscription(ctx, user.id, &subscription, now),
        )
        .await?;
        info!(
            user_id = %user.id,
            level = %subscription.level,
            status = %subscription.status,
            "订阅已更新"
        );

        let entry = SubscriptionHistoryEntry::new(
            user.id,
            previous.map(|(level, _)| level),
            subscription.level,
            previous.map(|(_, status)| status),
            subscription.status,
            reason,
            SYSTEM_ACTOR,
            now,
        );
        let activity_type = if subscription.status.grants_access() {
            ActivityType::SubscriptionStart
        } else {
            ActivityType::SubscriptionEnd
        };
        let activity = UserActivity::new(user.id, activity_type, now)
            .with_detail("level", subscription.level.as_str())
            .with_detail("status", subscription.status.as_str());
        self.audit
            .submit(
                ctx,
                vec![
                    AuditOp::SubscriptionChange(entry),
                    AuditOp::Activity(activity),
                ],
            )
            .await;

        user.subscription = Some(subscription);
        user.touch(now);
        Ok(user.sanitized())
    }

    pub async fn cancel_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        reason: &str,
        immediate: bool,
    ) -> Result<User, ApplicationError> {
        let mut user = self.load_user(ctx, id).await?;
        let Some(previous) = user.subscription.as_ref().map(|s| (s.level, s.status)) else {
            return Err(DomainError::SubscriptionNotFound {
                user_id: id.to_string(),
            }
            .into());
        };

        let now = self.deps.clock.now();
        let canceled = self
            .store(
                ctx,
                self.deps
                    .user_repository
                    .cancel_subscription(ctx, id, reason, immediate, now),
            )
            .await?;
        info!(user_id = %id, immediate, "订阅已取消");

        let entry = SubscriptionHistoryEntry::new(
            id,
            Some(previous.0),
            canceled.level,
            Some(previous.1),
            canceled.status,
            reason,
            SYSTEM_ACTOR,
            now,
        )
        .with_metadata("immediate", immediate);
        let activity = UserActivity::new(id, ActivityType::SubscriptionEnd, now)
            .with_detail("reason", reason)
            .with_detail("immediate", immediate);
        self.audit
            .submit(
                ctx,
                vec![
                    AuditOp::SubscriptionChange(entry),
                    AuditOp::Activity(activity),
                ],
            )
            .await;

        user.subscription = Some(canceled);
        user.touch(now);
        Ok(user.sanitized())
    }

    /// 检查订阅是否满足要求的级别和功能，不满足时返回 `SUBSCRIPTION_REQUIRED`
    pub async fn check_subscription_access(
        &self,
        ctx: &RequestContext,
        id: UserId,
        required_level: SubscriptionLevel,
        feature: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let user = self.get_user(ctx, id).await?;
        let now = self.deps.clock.now();

        let subscription = user
            .subscription
            .as_ref()
            .ok_or_else(|| DomainError::subscription_required("用户没有订阅"))?;
        if !subscription.is_valid_at(now) {
            return Err(DomainError::subscription_required("订阅已失效").into());
        }
        if subscription.level < required_level {
            return Err(DomainError::subscription_required(format!(
                "需要 {} 及以上级别，当前为 {}",
                required_level, subscription.level
            ))
            .into());
        }
        if let Some(feature) = feature.filter(|f| !f.is_empty()) {
            if !subscription.has_feature(feature) {
                return Err(
                    DomainError::subscription_required(format!("当前订阅不包含功能 {feature}"))
                        .into(),
                );
            }
        }
        Ok(())
    }

    pub async fn get_user_activities(
        &self,
        ctx: &RequestContext,
        id: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<UserActivity>, ApplicationError> {
        self.store(
            ctx,
            self.deps.audit_repository.get_user_activities(ctx, id, limit),
        )
        .await
    }

    pub async fn get_subscription_history(
        &self,
        ctx: &RequestContext,
        id: UserId,
    ) -> Result<Vec<SubscriptionHistoryEntry>, ApplicationError> {
        self.store(ctx, self.deps.audit_repository.get_subscription_history(ctx, id))
            .await
    }

    pub async fn get_ban_history(
        &self,
        ctx: &RequestContext,
        id: UserId,
    ) -> Result<Vec<BanHistoryEntry>, ApplicationError> {
        self.store(ctx, self.deps.audit_repository.get_ban_history(ctx, id))
            .await
    }

    /// 记录存储不可用视为失败，审计存储不可用只标记为降级
    pub async fn health_check(&self, ctx: &RequestContext) -> Result<HealthReport, ApplicationError> {
        self.store(ctx, self.deps.user_repository.ping(ctx)).await?;

        let audit_store = match ctx.run(self.deps.audit_repository.ping(ctx)).await? {
            Ok(()) => ComponentHealth::Healthy,
            Err(err) => {
                warn!(error = %err, "审计存储不可用");
                ComponentHealth::Degraded {
                    reason: err.to_string(),
                }
            }
        };

        Ok(HealthReport {
            record_store: ComponentHealth::Healthy,
            audit_store,
        })
    }
}
