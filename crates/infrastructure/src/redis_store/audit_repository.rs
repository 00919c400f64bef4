use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    normalize_activity_limit, AuditRepository, BanHistoryEntry, DomainResult, Metadata,
    RequestContext, SubscriptionHistoryEntry, UserActivity, UserId, MAX_ACTIVITY_LIMIT,
};
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use super::error::{map_json_err, map_redis_err};

const METADATA: &str = "metadata";
const ACTIVITIES: &str = "activities";
const SUBSCRIPTION_HISTORY: &str = "subscription_history";
const BAN_HISTORY: &str = "ban_history";

#[derive(Debug, Clone)]
pub struct RedisAuditConfig {
    pub url: String,
    pub key_prefix: String,
}

fn audit_key(prefix: &str, kind: &str, user_id: UserId) -> String {
    format!("{prefix}{kind}:{user_id}")
}

/// 头插一条记录；`cap` 为 Some 时在同一事务内截断到最新的 `cap` 条
fn push_pipeline(key: &str, payload: &str, cap: Option<usize>) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic().lpush(key, payload).ignore();
    if let Some(cap) = cap {
        let stop = isize::try_from(cap).unwrap_or(isize::MAX) - 1;
        pipe.ltrim(key, 0, stop).ignore();
    }
    pipe
}

/// 基于 Redis 的审计存储
#[derive(Clone)]
pub struct RedisAuditRepository {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisAuditRepository {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    pub async fn connect(config: &RedisAuditConfig) -> DomainResult<Self> {
        let client =
            redis::Client::open(config.url.as_str()).map_err(|e| map_redis_err(e, "open"))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| map_redis_err(e, "connect"))?;

        info!(key_prefix = %config.key_prefix, "Redis 审计存储已连接");
        Ok(Self::new(conn, config.key_prefix.clone()))
    }

    fn key(&self, kind: &str, user_id: UserId) -> String {
        audit_key(&self.key_prefix, kind, user_id)
    }

    async fn push_record<T: Serialize + Sync>(
        &self,
        kind: &str,
        user_id: UserId,
        record: &T,
        cap: Option<usize>,
    ) -> DomainResult<()> {
        let payload = serde_json::to_string(record).map_err(|e| map_json_err(e, kind))?;
        let mut conn = self.conn.clone();
        let _: () = push_pipeline(&self.key(kind, user_id), &payload, cap)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "LPUSH"))?;
        Ok(())
    }

    /// 读取列表前 `count` 条，`None` 表示全部
    async fn read_records<T: DeserializeOwned>(
        &self,
        kind: &str,
        user_id: UserId,
        count: Option<usize>,
    ) -> DomainResult<Vec<T>> {
        let stop = count
            .map(|n| isize::try_from(n).unwrap_or(isize::MAX) - 1)
            .unwrap_or(-1);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(self.key(kind, user_id))
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "LRANGE"))?;

        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(|e| map_json_err(e, kind)))
            .collect()
    }
}

#[async_trait]
impl AuditRepository for RedisAuditRepository {
    async fn save_metadata(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        metadata: &Metadata,
    ) -> DomainResult<()> {
        let key = self.key(METADATA, user_id);
        // 删除与写入在同一事务内完成，读方不会看到半替换的状态
        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !metadata.is_empty() {
            let mut hset = redis::cmd("HSET");
            hset.arg(&key);
            for (field, value) in metadata {
                hset.arg(field).arg(value);
            }
            pipe.add_command(hset).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "MULTI DEL/HSET"))?;

        debug!(request_id = %ctx.request_id(), user_id = %user_id, fields = metadata.len(), "替换用户元数据");
        Ok(())
    }

    async fn get_metadata(&self, _ctx: &RequestContext, user_id: UserId) -> DomainResult<Metadata> {
        let mut conn = self.conn.clone();
        let metadata: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.key(METADATA, user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "HGETALL"))?;
        Ok(metadata)
    }

    async fn update_metadata(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        metadata: &Metadata,
    ) -> DomainResult<()> {
        if metadata.is_empty() {
            return Ok(());
        }
        let mut hset = redis::cmd("HSET");
        hset.arg(self.key(METADATA, user_id));
        for (field, value) in metadata {
            hset.arg(field).arg(value);
        }

        let mut conn = self.conn.clone();
        let _: () = hset
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "HSET"))?;

        debug!(request_id = %ctx.request_id(), user_id = %user_id, fields = metadata.len(), "合并用户元数据");
        Ok(())
    }

    async fn delete_metadata(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        keys: &[String],
    ) -> DomainResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HDEL")
            .arg(self.key(METADATA, user_id))
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "HDEL"))?;
        Ok(())
    }

    async fn log_activity(&self, ctx: &RequestContext, activity: &UserActivity) -> DomainResult<()> {
        self.push_record(ACTIVITIES, activity.user_id, activity, Some(MAX_ACTIVITY_LIMIT))
            .await?;
        debug!(
            request_id = %ctx.request_id(),
            user_id = %activity.user_id,
            activity = activity.activity_type.as_str(),
            "记录用户活动"
        );
        Ok(())
    }

    async fn get_user_activities(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
        limit: Option<u32>,
    ) -> DomainResult<Vec<UserActivity>> {
        let limit = normalize_activity_limit(limit);
        self.read_records(ACTIVITIES, user_id, Some(limit)).await
    }

    async fn log_subscription_change(
        &self,
        _ctx: &RequestContext,
        entry: &SubscriptionHistoryEntry,
    ) -> DomainResult<()> {
        self.push_record(SUBSCRIPTION_HISTORY, entry.user_id, entry, None)
            .await
    }

    async fn get_subscription_history(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
    ) -> DomainResult<Vec<SubscriptionHistoryEntry>> {
        self.read_records(SUBSCRIPTION_HISTORY, user_id, None).await
    }

    async fn log_ban_change(&self, _ctx: &RequestContext, entry: &BanHistoryEntry) -> DomainResult<()> {
        self.push_record(BAN_HISTORY, entry.user_id, entry, None)
            .await
    }

    async fn get_ban_history(
        &self,
        _ctx: &RequestContext,
        user_id: UserId,
    ) -> DomainResult<Vec<BanHistoryEntry>> {
        self.read_records(BAN_HISTORY, user_id, None).await
    }

    async fn ping(&self, _ctx: &RequestContext) -> DomainResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err(e, "PING"))?;
        Ok(())
    }
}
