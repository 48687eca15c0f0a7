//! Meter policy storage
//!
//! Writes go through a [`MeterTxn`], which holds the writer lock for its
//! whole lifetime and edits a private copy of the table. Validation, id
//! allocation and insert therefore observe one consistent table, and
//! concurrent writers serialize. Readers never take the writer lock: they
//! see the snapshot published by the last `commit`.

use crate::error::{ConsoleError, ConsoleResult};
use crate::models::MeterPolicy;
use crate::persist;
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct MeterTable {
    policies: BTreeMap<u64, MeterPolicy>,
    next_id: u64,
}

impl MeterTable {
    fn from_policies(policies: Vec<MeterPolicy>) -> Self {
        let next_id = policies.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        Self {
            policies: policies.into_iter().map(|p| (p.id, p)).collect(),
            next_id,
        }
    }
}

pub struct MeterRepository {
    writer: Mutex<()>,
    committed: ArcSwap<MeterTable>,
    path: Option<PathBuf>,
}

impl MeterRepository {
    pub fn in_memory() -> Self {
        Self::with_table(MeterTable::from_policies(Vec::new()), None)
    }

    /// Open a file-backed repository, loading persisted policies
    pub fn open(path: PathBuf) -> ConsoleResult<Self> {
        let policies: Vec<MeterPolicy> = persist::load_json(&path)?.unwrap_or_default();
        info!(path = %path.display(), policies = policies.len(), "Loaded meter policies");
        Ok(Self::with_table(MeterTable::from_policies(policies), Some(path)))
    }

    fn with_table(table: MeterTable, path: Option<PathBuf>) -> Self {
        Self {
            writer: Mutex::new(()),
            committed: ArcSwap::from_pointee(table),
            path,
        }
    }

    /// Start a write transaction
    pub async fn begin(&self) -> MeterTxn<'_> {
        let guard = self.writer.lock().await;
        MeterTxn {
            working: MeterTable::clone(&self.committed.load()),
            repository: self,
            _guard: guard,
        }
    }

    /// Committed policies, ordered by id
    pub fn list(&self) -> Vec<MeterPolicy> {
        self.committed.load().policies.values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<MeterPolicy> {
        self.committed.load().policies.get(&id).cloned()
    }
}

/// Exclusive write access to the policy table. Changes stay private to the
/// transaction until `commit`; dropping it discards them.
pub struct MeterTxn<'a> {
    working: MeterTable,
    repository: &'a MeterRepository,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> MeterTxn<'a> {
    pub fn policies(&self) -> impl Iterator<Item = &MeterPolicy> {
        self.working.policies.values()
    }

    pub fn get(&self, id: u64) -> ConsoleResult<MeterPolicy> {
        self.working
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| ConsoleError::not_found(format!("meter policy {}", id)))
    }

    /// Policy using a controller meter id, if any
    pub fn find_meter(&self, controller: &str, switch_id: &str, meter_id: u32) -> Option<&MeterPolicy> {
        self.working.policies.values().find(|p| {
            p.controller == controller && p.switch_id == switch_id && p.meter_id == meter_id
        })
    }

    /// `max(meter_id) + 1` over one switch, 1 when the switch has none
    pub fn next_meter_id(&self, controller: &str, switch_id: &str) -> ConsoleResult<u32> {
        let max = self
            .working
            .policies
            .values()
            .filter(|p| p.controller == controller && p.switch_id == switch_id)
            .map(|p| p.meter_id)
            .max()
            .unwrap_or(0);
        max.checked_add(1)
            .ok_or_else(|| ConsoleError::conflict(format!("meter ids exhausted on {}/{}", controller, switch_id)))
    }

    /// Record id the next new policy gets; only `put` consumes it
    pub fn next_record_id(&self) -> u64 {
        self.working.next_id
    }

    /// Insert or replace by id
    pub fn put(&mut self, policy: MeterPolicy) {
        debug!(id = policy.id, meter_id = policy.meter_id, "Storing meter policy");
        self.working.next_id = self.working.next_id.max(policy.id + 1);
        self.working.policies.insert(policy.id, policy);
    }

    pub fn remove(&mut self, id: u64) -> Option<MeterPolicy> {
        self.working.policies.remove(&id)
    }

    /// Persist the table if file-backed, publish it to readers and release
    /// the writer lock
    pub fn commit(self) -> ConsoleResult<()> {
        if let Some(path) = &self.repository.path {
            let policies: Vec<&MeterPolicy> = self.working.policies.values().collect();
            persist::save_json(path, &policies)?;
            debug!(path = %path.display(), policies = policies.len(), "Meter policies flushed to disk");
        }
        self.repository.committed.store(Arc::new(self.working));
        Ok(())
    }
}
