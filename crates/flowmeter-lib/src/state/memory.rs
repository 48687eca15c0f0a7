//! In-process state store backed by concurrent maps

use super::StateStore;
use crate::error::ConsoleResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// `StateStore` for a single console process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
    counters: DashMap<String, AtomicI64>,
    leases: DashMap<String, Lease>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> ConsoleResult<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> ConsoleResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> ConsoleResult<()> {
        self.values.remove(key);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> ConsoleResult<i64> {
        if let Some(counter) = self.counters.get(key) {
            return Ok(counter.fetch_add(delta, Ordering::AcqRel) + delta);
        }
        let counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicI64::new(0));
        Ok(counter.fetch_add(delta, Ordering::AcqRel) + delta)
    }

    async fn take(&self, key: &str) -> ConsoleResult<i64> {
        Ok(self
            .counters
            .get(key)
            .map(|counter| counter.swap(0, Ordering::AcqRel))
            .unwrap_or(0))
    }

    async fn try_acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> ConsoleResult<bool> {
        let now = Instant::now();
        let lease = Lease {
            owner: owner.to_string(),
            expires_at: now + ttl,
        };
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    debug!(key, holder = %held.get().owner, requested_by = owner, "Lease held");
                    return Ok(false);
                }
                held.insert(lease);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(lease);
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, key: &str, owner: &str) -> ConsoleResult<()> {
        self.leases.remove_if(key, |_, lease| lease.owner == owner);
        Ok(())
    }
}
