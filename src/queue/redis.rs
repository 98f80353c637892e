//! Redis-backed queue store for distributed multi-process coordination.
//!
//! Reservations are plain string keys with `SET NX EX`, the ready queue is a
//! list and the delayed set is a sorted set scored by due time.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Script;
use tokio::sync::Mutex;

use super::{QueueError, QueueResult, QueueStore};

/// Lua script for atomic promotion: only the caller that removes the member
/// from the delayed set pushes it to the ready queue.
const PROMOTE_SCRIPT: &str = r#"
    local removed = redis.call('ZREM', KEYS[1], ARGV[1])
    if removed == 1 then
        redis.call('RPUSH', KEYS[2], ARGV[1])
    end
    return removed
"#;

/// Redis-backed queue store.
pub struct RedisQueueStore {
    client: redis::Client,
    /// Shared connection for non-blocking commands.
    conn: ConnectionManager,
    /// Idle connections for BLPOP. Redis serves a blocked connection's
    /// commands in order, so each concurrent pop needs its own.
    idle_blocking: Mutex<Vec<MultiplexedConnection>>,
    ready_key: String,
    delayed_key: String,
    prefix: String,
}

impl RedisQueueStore {
    /// Create a new Redis queue store.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Namespace for every key this store touches
    pub async fn new(redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client.clone()).await.map_err(|e| {
            QueueError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        let prefix = prefix.trim_end_matches(':').to_string();
        Ok(Self {
            client,
            conn,
            idle_blocking: Mutex::new(Vec::new()),
            ready_key: format!("{}:queue:ready", prefix),
            delayed_key: format!("{}:queue:delayed", prefix),
            prefix,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn blocking_connection(&self) -> QueueResult<MultiplexedConnection> {
        if let Some(conn) = self.idle_blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(command_error)
    }
}

fn command_error(e: redis::RedisError) -> QueueError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        QueueError::Unavailable(e.to_string())
    } else {
        QueueError::Command(e.to_string())
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(reply.is_some())
    }

    async fn overwrite(&self, key: &str, ttl: Duration) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(key))
            .arg("1")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn release(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn exists(&self, key: &str) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(count > 0)
    }

    async fn push(&self, payload: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(&self.ready_key)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn pop(&self, wait: Duration) -> QueueResult<Option<String>> {
        let mut conn = self.blocking_connection().await?;
        // BLPOP takes fractional seconds; zero would block forever.
        let timeout = wait.as_secs_f64().max(0.01);
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.ready_key)
            .arg(timeout)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        // Failed connections are dropped above; only healthy ones go back.
        self.idle_blocking.lock().await.push(conn);
        Ok(reply.map(|(_, payload)| payload))
    }

    async fn schedule(&self, payload: &str, due_ms: i64) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(&self.delayed_key)
            .arg(due_ms)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn due(&self, now_ms: i64, limit: usize) -> QueueResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("ZRANGEBYSCORE")
            .arg(&self.delayed_key)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn promote(&self, payload: &str) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = Script::new(PROMOTE_SCRIPT)
            .key(&self.delayed_key)
            .key(&self.ready_key)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(removed == 1)
    }

    async fn ready_len(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(&self.ready_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn delayed_len(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCARD")
            .arg(&self.delayed_key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(command_error)
    }
}
