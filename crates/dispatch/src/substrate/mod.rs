// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! The coordination substrate: hashes, strings with TTL, sorted sets, and
//! streams with consumer groups, plus pub/sub. In production this is Redis
//! (`RedisSubstrate`); tests run against `FakeSubstrate`, an in-process
//! stand-in with identical semantics.

mod fake;
mod redis_substrate;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub use fake::FakeSubstrate;
pub use redis_substrate::RedisSubstrate;

use crate::error::DispatchError;

/// One delivered entry from a consumer-group read.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// The substrate's primitive operations, bit-exact to spec.md §6's key schema.
///
/// Every method is a single round trip (or, for `hkeys_batch`, a pipelined
/// batch of round trips) so callers can reason about atomicity the same way
/// regardless of backend.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// `HSET key field value` — add/update a cell-bucket or hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DispatchError>;

    /// `HDEL key field` — remove a cell-bucket member.
    async fn hdel(&self, key: &str, field: &str) -> Result<(), DispatchError>;

    /// `HKEYS key` — list hash field names (driver ids in a cell bucket).
    async fn hkeys(&self, key: &str) -> Result<Vec<String>, DispatchError>;

    /// Pipelined `HKEYS` over several keys in one round trip, preserving order.
    async fn hkeys_batch(&self, keys: &[String]) -> Result<Vec<Vec<String>>, DispatchError>;

    /// `SET key value [EX ttl]` — unconditional set, optionally with TTL.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), DispatchError>;

    /// `SET key value NX EX ttl` — set only if absent. Returns whether it was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, DispatchError>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, DispatchError>;

    /// `DEL key`, unconditionally.
    async fn del(&self, key: &str) -> Result<(), DispatchError>;

    /// Scripted compare-and-delete: delete `key` only if its value is `expected`.
    /// Returns whether the delete happened.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, DispatchError>;

    /// Scripted compare-and-set: set `key` to `new_value` (no TTL) only if its
    /// current value is `expected`. Returns whether the swap happened.
    async fn cas(&self, key: &str, expected: &str, new_value: &str) -> Result<bool, DispatchError>;

    /// `ZADD key score member`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), DispatchError>;

    /// `ZREM key member...`.
    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), DispatchError>;

    /// `ZRANGEBYSCORE key -inf max_score`.
    async fn zrangebyscore_le(
        &self,
        key: &str,
        max_score: f64,
    ) -> Result<Vec<String>, DispatchError>;

    /// `XADD stream * field value ...`. Returns the generated entry id.
    async fn xadd(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, DispatchError>;

    /// `XGROUP CREATE stream group $ MKSTREAM`, tolerating `BUSYGROUP`.
    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> Result<(), DispatchError>;

    /// `XREADGROUP GROUP group consumer COUNT 1 BLOCK 0 STREAMS stream >`.
    /// Blocks (cooperatively) until an entry is available.
    async fn xreadgroup_block(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamMessage, DispatchError>;

    /// `XACK stream group id`.
    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<(), DispatchError>;

    /// `PUBLISH channel payload`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), DispatchError>;
}
