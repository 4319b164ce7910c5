// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! Redis-backed `Substrate`. Uses a multiplexed `ConnectionManager` so the
//! handle can be cloned freely across tasks; stream/zset/script operations
//! go through raw `redis::cmd()` because the typed `redis::Commands` API
//! doesn't cover consumer groups.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

use crate::error::DispatchError;

use super::{StreamMessage, Substrate};

/// Deletes `key` only if its current value equals `ARGV[1]`.
const DEL_IF_EQ_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Sets `key` to `ARGV[2]` (no TTL) only if its current value equals `ARGV[1]`.
const CAS_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    redis.call("SET", KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

fn map_err(e: RedisError) -> DispatchError {
    tracing::warn!(error = %e, "substrate operation failed");
    if e.is_connection_dropped() || e.is_timeout() || e.is_connection_refusal() {
        DispatchError::SubstrateUnavailable
    } else {
        DispatchError::Internal
    }
}

#[derive(Clone)]
pub struct RedisSubstrate {
    conn: ConnectionManager,
}

impl RedisSubstrate {
    /// Connects with capped exponential backoff, matching the rest of the
    /// crate's retry behavior for substrate-transient failures.
    pub async fn connect(url: &str) -> Result<Self, DispatchError> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = crate::error::retry_with_backoff(|| {
            let client = client.clone();
            async move { client.get_connection_manager().await.map_err(map_err) }
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Substrate for RedisSubstrate {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await.map_err(map_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, field).await.map_err(map_err)
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        let mut conn = self.conn.clone();
        conn.hkeys(key).await.map_err(map_err)
    }

    async fn hkeys_batch(&self, keys: &[String]) -> Result<Vec<Vec<String>>, DispatchError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hkeys(key);
        }
        pipe.query_async(&mut conn).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(d) => conn.set_ex::<_, _, ()>(key, value, d.as_secs().max(1)).await.map_err(map_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(map_err),
        }
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, DispatchError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DispatchError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn del(&self, key: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(map_err)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, DispatchError> {
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(DEL_IF_EQ_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(result == 1)
    }

    async fn cas(&self, key: &str, expected: &str, new_value: &str) -> Result<bool, DispatchError> {
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(new_value)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(result == 1)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await.map_err(map_err)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(key, members).await.map_err(map_err)
    }

    async fn zrangebyscore_le(&self, key: &str, max_score: f64) -> Result<Vec<String>, DispatchError> {
        let mut conn = self.conn.clone();
        conn.zrangebyscore(key, "-inf", max_score).await.map_err(map_err)
    }

    async fn xadd(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, DispatchError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (k, v) in fields {
            cmd.arg(*k).arg(v);
        }
        cmd.query_async(&mut conn).await.map_err(map_err)
    }

    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn xreadgroup_block(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamMessage, DispatchError> {
        let mut conn = self.conn.clone();
        loop {
            let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group)
                .arg(consumer)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(2000)
                .arg("STREAMS")
                .arg(stream)
                .arg(">")
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;

            for key in reply.keys {
                if let Some(entry) = key.ids.into_iter().next() {
                    let mut fields = std::collections::HashMap::new();
                    for (field, value) in entry.map {
                        if let redis::Value::BulkString(bytes) = value {
                            fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                        }
                    }
                    return Ok(StreamMessage { id: entry.id, fields });
                }
            }
            // BLOCK timed out with nothing delivered; loop to re-poll, leaving
            // shutdown responsiveness to the caller's outer select!.
        }
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        redis::cmd("XACK").arg(stream).arg(group).arg(id).query_async::<()>(&mut conn).await.map_err(map_err)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await.map_err(map_err)
    }
}
