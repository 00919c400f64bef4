//! PostgreSQL 记录存储

use chrono::{DateTime, Utc};
use domain::{
    BanInfo, DomainError, DomainResult, RequestContext, StorageErrorKind, SubscriptionInfo,
    Timestamp, User, UserFilter, UserId, UserRepository, UserStatus,
};
use sqlx::{
    postgres::PgPoolOptions, types::Json, FromRow, PgPool, Postgres, QueryBuilder,
};
use std::time::Duration;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, service_email, name, phone, password_hash, status, role, \
     created_at, updated_at, last_login_at, ban_info, subscription";

const DELETED: &str = "DELETED";

/// 将 sqlx 错误映射为存储错误；唯一性冲突单独映射为 `USER_ALREADY_EXISTS`
fn map_sqlx_err(err: sqlx::Error, identifier: &str) -> DomainError {
    let sqlstate = match &err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    };
    match sqlstate.as_deref() {
        Some("23505") => return DomainError::user_already_exists(identifier),
        Some(code) if code.starts_with("23") => {
            return DomainError::storage_with_cause(
                StorageErrorKind::Constraint,
                err.to_string(),
                err,
            );
        }
        _ => {}
    }

    let kind = match &err {
        sqlx::Error::PoolTimedOut => StorageErrorKind::Timeout,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
            StorageErrorKind::Connection
        }
        _ => StorageErrorKind::Query,
    };
    DomainError::storage_with_cause(kind, err.to_string(), err)
}

fn invalid_data(message: impl Into<String>) -> DomainError {
    DomainError::storage(StorageErrorKind::Query, message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    service_email: String,
    name: String,
    phone: String,
    password_hash: String,
    status: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
    ban_info: Option<Json<BanInfo>>,
    subscription: Option<Json<SubscriptionInfo>>,
}

impl TryFrom<UserRecord> for User {
    type Error = DomainError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse()
            .map_err(|err: DomainError| invalid_data(err.to_string()))?;
        let role = value
            .role
            .parse()
            .map_err(|err: DomainError| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            email: value.email,
            service_email: value.service_email,
            name: value.name,
            phone: value.phone,
            password_hash: value.password_hash,
            status,
            role,
            created_at: value.created_at,
            updated_at: value.updated_at,
            last_login_at: value.last_login_at,
            ban_info: value.ban_info.map(|json| json.0),
            subscription: value.subscription.map(|json| json.0),
            metadata: Default::default(),
        })
    }
}

/// 订阅的冗余过滤列
fn subscription_columns(
    subscription: Option<&SubscriptionInfo>,
) -> (Option<&'static str>, Option<&'static str>, Option<Timestamp>) {
    match subscription {
        Some(sub) => (
            Some(sub.status.as_str()),
            Some(sub.level.as_str()),
            sub.subscription_end,
        ),
        None => (None, None, None),
    }
}

/// 转义 LIKE 通配符，配合 `ESCAPE '\'` 使用
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for ch in search.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// 存储中仍标记封禁、但 `banned_until` 已早于 `now` 的临时封禁
fn push_ban_lapsed(builder: &mut QueryBuilder<'_, Postgres>, now: Timestamp) {
    builder
        .push("COALESCE(is_banned AND (ban_info->>'banned_until')::timestamptz < ")
        .push_bind(now)
        .push(", FALSE)");
}

/// 追加过滤条件：所有已设置的条件以 AND 组合，未设置的条件不出现在查询中
///
/// 状态与封禁条件按 `now` 时刻的有效封禁判断，与读取单个用户时的过期规则一致。
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter, now: Timestamp) {
    builder.push(" WHERE status <> ").push_bind(DELETED);

    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR phone ILIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    match filter.status {
        Some(UserStatus::Active) => {
            let banned: Vec<String> = UserStatus::BANNED
                .iter()
                .map(|status| status.as_str().to_owned())
                .collect();
            builder
                .push(" AND (status = ")
                .push_bind(UserStatus::Active.as_str())
                .push(" OR (status = ANY(")
                .push_bind(banned)
                .push(") AND ");
            push_ban_lapsed(builder, now);
            builder.push("))");
        }
        Some(status) if status.is_banned_status() => {
            builder
                .push(" AND status = ")
                .push_bind(status.as_str())
                .push(" AND NOT ");
            push_ban_lapsed(builder, now);
        }
        Some(status) => {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        None => {}
    }
    if let Some(role) = filter.role {
        builder.push(" AND role = ").push_bind(role.as_str());
    }
    match filter.is_banned {
        Some(true) => {
            builder.push(" AND is_banned AND NOT ");
            push_ban_lapsed(builder, now);
        }
        Some(false) => {
            builder.push(" AND (NOT is_banned OR ");
            push_ban_lapsed(builder, now);
            builder.push(")");
        }
        None => {}
    }
    if let Some(sub_status) = filter.sub_status {
        builder
            .push(" AND subscription_status = ")
            .push_bind(sub_status.as_str());
    }
    if let Some(sub_level) = filter.sub_level {
        builder
            .push(" AND subscription_level = ")
            .push_bind(sub_level.as_str());
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_one(&self, column: &str, value: &str) -> DomainResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1 AND status <> $2"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(value)
            .bind(DELETED)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx_err(err, value))?;
        record.map(User::try_from).transpose()
    }

    /// 仅更新未删除的用户，受影响行数为 0 时返回 `USER_NOT_FOUND`
    fn ensure_affected(rows: u64, id: UserId) -> DomainResult<()> {
        if rows == 0 {
            return Err(DomainError::user_not_found(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, ctx: &RequestContext, user: &User) -> DomainResult<User> {
        let (sub_status, sub_level, sub_end) = subscription_columns(user.subscription.as_ref());
        let sql = format!(
            "INSERT INTO users (id, email, service_email, name, phone, password_hash, status, role, \
             created_at, updated_at, last_login_at, ban_info, is_banned, subscription, \
             subscription_status, subscription_level, subscription_end) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(user.id))
            .bind(&user.email)
            .bind(&user.service_email)
            .bind(&user.name)
            .bind(&user.phone)
            .bind(&user.password_hash)
            .bind(user.status.as_str())
            .bind(user.role.as_str())
            .bind(user.created_at)
            .bind(user.updated_at)
            .bind(user.last_login_at)
            .bind(user.ban_info.as_ref().map(Json))
            .bind(user.ban_info.as_ref().is_some_and(|ban| ban.is_banned))
            .bind(user.subscription.as_ref().map(Json))
            .bind(sub_status)
            .bind(sub_level)
            .bind(sub_end)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_sqlx_err(err, &user.email))?;

        tracing::debug!(request_id = %ctx.request_id(), user_id = %user.id, "插入用户记录");
        User::try_from(record)
    }

    async fn find_by_id(&self, _ctx: &RequestContext, id: UserId) -> DomainResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND status <> $2");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(id))
            .bind(DELETED)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx_err(err, &id.to_string()))?;
        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, _ctx: &RequestContext, email: &str) -> DomainResult<Option<User>> {
        self.find_one("email", email).await
    }

    async fn find_by_phone(&self, _ctx: &RequestContext, phone: &str) -> DomainResult<Option<User>> {
        self.find_one("phone", phone).await
    }

    async fn update(&self, ctx: &RequestContext, user: &User) -> DomainResult<User> {
        let (sub_status, sub_level, sub_end) = subscription_columns(user.subscription.as_ref());
        let sql = format!(
            "UPDATE users SET email = $2, service_email = $3, name = $4, phone = $5, \
             password_hash = $6, status = $7, role = $8, updated_at = $9, last_login_at = $10, \
             ban_info = $11, is_banned = $12, subscription = $13, subscription_status = $14, \
             subscription_level = $15, subscription_end = $16 \
             WHERE id = $1 AND status <> $17 \
             RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(user.id))
            .bind(&user.email)
            .bind(&user.service_email)
            .bind(&user.name)
            .bind(&user.phone)
            .bind(&user.password_hash)
            .bind(user.status.as_str())
            .bind(user.role.as_str())
            .bind(user.updated_at)
            .bind(user.last_login_at)
            .bind(user.ban_info.as_ref().map(Json))
            .bind(user.ban_info.as_ref().is_some_and(|ban| ban.is_banned))
            .bind(user.subscription.as_ref().map(Json))
            .bind(sub_status)
            .bind(sub_level)
            .bind(sub_end)
            .bind(DELETED)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx_err(err, &user.email))?
            .ok_or_else(|| DomainError::user_not_found(user.id.to_string()))?;

        tracing::debug!(request_id = %ctx.request_id(), user_id = %user.id, "更新用户记录");
        User::try_from(record)
    }

    async fn delete(&self, ctx: &RequestContext, id: UserId, at: Timestamp) -> DomainResult<()> {
        // 已删除的记录同样匹配，保证幂等
        let result = sqlx::query(
            "UPDATE users SET status = $2, updated_at = GREATEST(updated_at, $3) WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(DELETED)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_err(err, &id.to_string()))?;

        tracing::debug!(request_id = %ctx.request_id(), user_id = %id, "软删除用户记录");
        Self::ensure_affected(result.rows_affected(), id)
    }

    async fn list(
        &self,
        _ctx: &RequestContext,
        filter: &UserFilter,
        now: Timestamp,
    ) -> DomainResult<(Vec<User>, u64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut count, filter, now);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_sqlx_err(err, "users"))?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filters(&mut select, filter, now);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(filter.page_size))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset()).unwrap_or(i64::MAX));

        let records = select
            .build_query_as::<UserRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_err(err, "users"))?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok((users, u64::try_from(total).unwrap_or_default()))
    }

    async fn exists(&self, _ctx: &RequestContext, email: &str, name: &str) -> DomainResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE (email = $1 OR name = $2) AND status <> $3)",
        )
        .bind(email)
        .bind(name)
        .bind(DELETED)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_sqlx_err(err, email))
    }

    async fn ban(
        &self,
        ctx: &RequestContext,
        id: UserId,
        ban: &BanInfo,
        status: UserStatus,
        at: Timestamp,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE users SET ban_info = $2, is_banned = $3, status = $4, \
             updated_at = GREATEST(updated_at, $5) \
             WHERE id = $1 AND status <> $6",
        )
        .bind(Uuid::from(id))
        .bind(Json(ban))
        .bind(ban.is_banned)
        .bind(status.as_str())
        .bind(at)
        .bind(DELETED)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_err(err, &id.to_string()))?;

        tracing::debug!(request_id = %ctx.request_id(), user_id = %id, "写入封禁信息");
        Self::ensure_affected(result.rows_affected(), id)
    }

    async fn unban(&self, ctx: &RequestContext, id: UserId, at: Timestamp) -> DomainResult<()> {
        // 封禁记录保留，只清除生效标记和截止时间
        let result = sqlx::query(
            "UPDATE users SET \
             ban_info = CASE WHEN ban_info IS NULL THEN NULL \
                 ELSE ban_info || '{\"is_banned\": false, \"banned_until\": null}'::jsonb END, \
             is_banned = FALSE, status = $2, updated_at = GREATEST(updated_at, $3) \
             WHERE id = $1 AND status <> $4",
        )
        .bind(Uuid::from(id))
        .bind(UserStatus::Active.as_str())
        .bind(at)
        .bind(DELETED)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_err(err, &id.to_string()))?;

        tracing::debug!(request_id = %ctx.request_id(), user_id = %id, "清除封禁信息");
        Self::ensure_affected(result.rows_affected(), id)
    }

    async fn update_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        subscription: &SubscriptionInfo,
        at: Timestamp,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE users SET subscription = $2, subscription_status = $3, \
             subscription_level = $4, subscription_end = $5, \
             updated_at = GREATEST(updated_at, $6) \
             WHERE id = $1 AND status <> $7",
        )
        .bind(Uuid::from(id))
        .bind(Json(subscription))
        .bind(subscription.status.as_str())
        .bind(subscription.level.as_str())
        .bind(subscription.subscription_end)
        .bind(at)
        .bind(DELETED)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_err(err, &id.to_string()))?;

        tracing::debug!(request_id = %ctx.request_id(), user_id = %id, "写入订阅信息");
        Self::ensure_affected(result.rows_affected(), id)
    }

    async fn cancel_subscription(
        &self,
        ctx: &RequestContext,
        id: UserId,
        reason: &str,
        immediate: bool,
        at: Timestamp,
    ) -> DomainResult<SubscriptionInfo> {
        let key = id.to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| map_sqlx_err(err, &key))?;

        let current: Option<Option<Json<SubscriptionInfo>>> = sqlx::query_scalar(
            "SELECT subscription FROM users WHERE id = $1 AND status <> $2 FOR UPDATE",
        )
        .bind(Uuid::from(id))
        .bind(DELETED)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| map_sqlx_err(err, &key))?;

        let mut subscription = match current {
            None => return Err(DomainError::user_not_found(key)),
            Some(None) => return Err(DomainError::SubscriptionNotFound { user_id: key }),
            Some(Some(json)) => json.0,
        };
        subscription.cancel(reason, immediate, at);

        sqlx::query(
            "UPDATE users SET subscription = $2, subscription_status = $3, \
             subscription_end = $4, updated_at = GREATEST(updated_at, $5) WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(Json(&subscription))
        .bind(subscription.status.as_str())
        .bind(subscription.subscription_end)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|err| map_sqlx_err(err, &key))?;

        tx.commit().await.map_err(|err| map_sqlx_err(err, &key))?;
        tracing::debug!(request_id = %ctx.request_id(), user_id = %id, immediate, "取消订阅");
        Ok(subscription)
    }

    async fn update_last_login(
        &self,
        _ctx: &RequestContext,
        id: UserId,
        at: Timestamp,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = $2, updated_at = GREATEST(updated_at, $2) \
             WHERE id = $1 AND status <> $3",
        )
        .bind(Uuid::from(id))
        .bind(at)
        .bind(DELETED)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_err(err, &id.to_string()))?;
        Self::ensure_affected(result.rows_affected(), id)
    }

    async fn ping(&self, _ctx: &RequestContext) -> DomainResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| map_sqlx_err(err, "ping"))
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}
