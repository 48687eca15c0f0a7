//! Process-shared model state
//!
//! This module provides:
//! - A key-value `StateStore` seam with whole-record writes, atomic
//!   per-field counters and TTL-bounded leases
//! - An in-process `MemoryStore` implementation
//! - `ModelStateStore`, the typed view used by the model manager

mod counters;
mod memory;


pub use counters::{CounterField, CounterSnapshot};
pub use memory::MemoryStore;

use crate::error::{ConsoleError, ConsoleResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const ACTIVE_MODEL_KEY: &str = "flowmeter:model:active";
const LOADED_MODELS_KEY: &str = "flowmeter:model:loaded";
const STATS_LEASE_KEY: &str = "flowmeter:stats:lease";
const STATS_PERIOD_KEY: &str = "flowmeter:stats:period_start";

/// Shared key-value store used across console workers
///
/// Records are last-writer-wins at whole-value granularity. Counters are
/// atomic per key. Leases are acquired without blocking and expire on their
/// own.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> ConsoleResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> ConsoleResult<()>;

    async fn delete(&self, key: &str) -> ConsoleResult<()>;

    /// Add `delta` to a counter, returning the new value
    async fn incr_by(&self, key: &str, delta: i64) -> ConsoleResult<i64>;

    /// Read a counter and reset it to zero in one step
    async fn take(&self, key: &str) -> ConsoleResult<i64>;

    /// Set-if-absent with TTL. Returns false when another owner holds an
    /// unexpired lease.
    async fn try_acquire_lease(&self, key: &str, owner: &str, ttl: Duration)
        -> ConsoleResult<bool>;

    /// Drop a lease if `owner` still holds it
    async fn release_lease(&self, key: &str, owner: &str) -> ConsoleResult<()>;
}

/// Typed access to the active/loaded model records and counters
#[derive(Clone)]
pub struct ModelStateStore {
    store: Arc<dyn StateStore>,
}

impl ModelStateStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn active_model(&self) -> ConsoleResult<Option<String>> {
        self.store.get(ACTIVE_MODEL_KEY).await
    }

    /// Replace the active record. Every other model becomes inactive by
    /// construction since only one name is stored.
    pub async fn set_active(&self, model_name: &str) -> ConsoleResult<()> {
        debug!(model = %model_name, "Writing active model record");
        self.store
            .set(ACTIVE_MODEL_KEY, model_name.to_string())
            .await
    }

    /// Clear the active record if it still names `model_name`
    pub async fn clear_active_if(&self, model_name: &str) -> ConsoleResult<bool> {
        match self.active_model().await? {
            Some(active) if active == model_name => {
                self.store.delete(ACTIVE_MODEL_KEY).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn loaded_models(&self) -> ConsoleResult<BTreeSet<String>> {
        match self.store.get(LOADED_MODELS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Add a model to the loaded record. Returns false if it was already
    /// present, in which case nothing is written.
    pub async fn mark_loaded(&self, model_name: &str) -> ConsoleResult<bool> {
        let mut loaded = self.loaded_models().await?;
        if !loaded.insert(model_name.to_string()) {
            return Ok(false);
        }
        self.write_loaded(&loaded).await?;
        Ok(true)
    }

    pub async fn mark_unloaded(&self, model_name: &str) -> ConsoleResult<bool> {
        let mut loaded = self.loaded_models().await?;
        if !loaded.remove(model_name) {
            return Ok(false);
        }
        self.write_loaded(&loaded).await?;
        Ok(true)
    }

    async fn write_loaded(&self, loaded: &BTreeSet<String>) -> ConsoleResult<()> {
        self.store
            .set(LOADED_MODELS_KEY, serde_json::to_string(loaded)?)
            .await
    }

    pub async fn incr(&self, model_name: &str, field: CounterField, delta: i64) -> ConsoleResult<()> {
        if delta == 0 {
            return Ok(());
        }
        self.store.incr_by(&field.key(model_name), delta).await?;
        Ok(())
    }

    /// Drain every counter of a model. Each field is reset atomically, so an
    /// increment racing the drain lands in this snapshot or the next one.
    pub async fn drain_counters(&self, model_name: &str) -> ConsoleResult<CounterSnapshot> {
        let mut snapshot = CounterSnapshot::default();
        for field in CounterField::ALL {
            let value = self.store.take(&field.key(model_name)).await?;
            snapshot.set(field, value.max(0) as u64);
        }
        Ok(snapshot)
    }

    pub async fn try_acquire_stats_lease(&self, owner: &str, ttl: Duration) -> ConsoleResult<bool> {
        self.store.try_acquire_lease(STATS_LEASE_KEY, owner, ttl).await
    }

    pub async fn release_stats_lease(&self, owner: &str) -> ConsoleResult<()> {
        self.store.release_lease(STATS_LEASE_KEY, owner).await
    }

    /// Start of the period the next stats drain covers
    pub async fn stats_period_start(&self) -> ConsoleResult<Option<DateTime<Utc>>> {
        match self.store.get(STATS_PERIOD_KEY).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| ConsoleError::Internal(format!("corrupt period start: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn set_stats_period_start(&self, at: DateTime<Utc>) -> ConsoleResult<()> {
        self.store.set(STATS_PERIOD_KEY, at.to_rfc3339()).await
    }
}
