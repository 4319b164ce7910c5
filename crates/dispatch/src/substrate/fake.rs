// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the project contributors

//! In-process stand-in for `RedisSubstrate`, used by the test suite so it
//! doesn't need a live Redis instance. Semantics match real Redis closely
//! enough to exercise every caller in this crate; it is not a general
//! Redis emulator.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::DispatchError;

use super::{StreamMessage, Substrate};

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

struct StreamEntry {
    id: String,
    fields: HashMap<String, String>,
}

#[derive(Default)]
struct GroupState {
    /// Index into `entries` of the next unread entry for this group.
    cursor: usize,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, StringEntry>,
    zsets: HashMap<String, HashMap<String, f64>>,
    streams: HashMap<String, StreamState>,
}

/// In-memory `Substrate`. Blocking stream reads are simulated with a shared
/// `Notify` woken on every `xadd`, rather than real blocking I/O.
pub struct FakeSubstrate {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for FakeSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubstrate {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), notify: Notify::new() }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop any string entry whose TTL has lapsed. Called lazily on read.
    fn expire_strings(inner: &mut Inner) {
        let now = Instant::now();
        inner.strings.retain(|_, entry| entry.expires_at.map(|exp| exp > now).unwrap_or(true));
    }
}

#[async_trait]
impl Substrate for FakeSubstrate {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), DispatchError> {
        self.lock().hashes.entry(key.to_owned()).or_default().insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), DispatchError> {
        if let Some(h) = self.lock().hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        Ok(self.lock().hashes.get(key).map(|h| h.keys().cloned().collect()).unwrap_or_default())
    }

    async fn hkeys_batch(&self, keys: &[String]) -> Result<Vec<Vec<String>>, DispatchError> {
        let inner = self.lock();
        Ok(keys
            .iter()
            .map(|k| inner.hashes.get(k).map(|h| h.keys().cloned().collect()).unwrap_or_default())
            .collect())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), DispatchError> {
        let mut inner = self.lock();
        let expires_at = ttl.map(|d| Instant::now() + d);
        inner.strings.insert(key.to_owned(), StringEntry { value: value.to_owned(), expires_at });
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, DispatchError> {
        let mut inner = self.lock();
        Self::expire_strings(&mut inner);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_owned(),
            StringEntry { value: value.to_owned(), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DispatchError> {
        let mut inner = self.lock();
        Self::expire_strings(&mut inner);
        Ok(inner.strings.get(key).map(|e| e.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), DispatchError> {
        self.lock().strings.remove(key);
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, DispatchError> {
        let mut inner = self.lock();
        Self::expire_strings(&mut inner);
        match inner.strings.get(key) {
            Some(e) if e.value == expected => {
                inner.strings.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cas(&self, key: &str, expected: &str, new_value: &str) -> Result<bool, DispatchError> {
        let mut inner = self.lock();
        Self::expire_strings(&mut inner);
        match inner.strings.get(key) {
            Some(e) if e.value == expected => {
                inner.strings.insert(
                    key.to_owned(),
                    StringEntry { value: new_value.to_owned(), expires_at: None },
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), DispatchError> {
        self.lock().zsets.entry(key.to_owned()).or_default().insert(member.to_owned(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), DispatchError> {
        if let Some(z) = self.lock().zsets.get_mut(key) {
            for m in members {
                z.remove(m);
            }
        }
        Ok(())
    }

    async fn zrangebyscore_le(&self, key: &str, max_score: f64) -> Result<Vec<String>, DispatchError> {
        let inner = self.lock();
        let mut out: Vec<(String, f64)> = inner
            .zsets
            .get(key)
            .map(|z| z.iter().filter(|(_, &s)| s <= max_score).map(|(m, &s)| (m.clone(), s)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out.into_iter().map(|(m, _)| m).collect())
    }

    async fn xadd(&self, stream: &str, fields: &[(&str, String)]) -> Result<String, DispatchError> {
        let id = {
            let mut inner = self.lock();
            let state = inner.streams.entry(stream.to_owned()).or_default();
            state.next_seq += 1;
            let id = format!("{}-0", state.next_seq);
            let entry_fields = fields.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect();
            state.entries.push(StreamEntry { id: id.clone(), fields: entry_fields });
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn ensure_consumer_group(&self, stream: &str, group: &str) -> Result<(), DispatchError> {
        let mut inner = self.lock();
        let state = inner.streams.entry(stream.to_owned()).or_default();
        state.groups.entry(group.to_owned()).or_insert_with(|| GroupState { cursor: state.entries.len() });
        Ok(())
    }

    async fn xreadgroup_block(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
    ) -> Result<StreamMessage, DispatchError> {
        loop {
            {
                let mut inner = self.lock();
                let state = inner.streams.entry(stream.to_owned()).or_default();
                let group_state = state.groups.entry(group.to_owned()).or_insert_with(GroupState::default);
                if let Some(entry) = state.entries.get(group_state.cursor) {
                    let msg = StreamMessage { id: entry.id.clone(), fields: entry.fields.clone() };
                    group_state.cursor += 1;
                    return Ok(msg);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn xack(&self, _stream: &str, _group: &str, _id: &str) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), DispatchError> {
        // Pub/sub fan-out in tests goes through the in-process broadcast bus
        // directly (see notify::bus), not through the substrate.
        Ok(())
    }
}
