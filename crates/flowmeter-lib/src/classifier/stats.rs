//! Classification stats rollups
//!
//! The repository is append-only. The worker drains live counters into it
//! on a fixed interval until shutdown.

use super::{ModelManager, StatsOutcome};
use crate::error::ConsoleResult;
use crate::health::{components, HealthRegistry};
use crate::models::ClassificationStats;
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default interval between stats drains
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Filter for persisted rollups; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub model: Option<String>,
    /// Rollups whose period ends at or after this instant
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Rollups whose period starts at or before this instant
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl StatsQuery {
    fn matches(&self, stats: &ClassificationStats) -> bool {
        self.model
            .as_deref()
            .map_or(true, |m| stats.model_name == m)
            && self.since.map_or(true, |t| stats.period_end >= t)
            && self.until.map_or(true, |t| stats.period_start <= t)
    }
}

/// Append-only store of rollups, optionally mirrored to a JSON file
pub struct StatsRepository {
    records: RwLock<Vec<ClassificationStats>>,
    path: Option<PathBuf>,
}

impl StatsRepository {
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Open a file-backed repository, loading any earlier rollups
    pub fn open(path: PathBuf) -> ConsoleResult<Self> {
        let records: Vec<ClassificationStats> = persist::load_json(&path)?.unwrap_or_default();
        info!(path = %path.display(), records = records.len(), "Loaded classification stats");
        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    /// Append rollups. They are kept in memory even when writing the file
    /// fails; the error is returned so the caller can report it.
    pub async fn append(&self, stats: Vec<ClassificationStats>) -> ConsoleResult<()> {
        if stats.is_empty() {
            return Ok(());
        }
        let mut records = self.records.write().await;
        records.extend(stats);

        if let Some(path) = &self.path {
            persist::save_json(path, &*records)?;
            debug!(path = %path.display(), records = records.len(), "Stats flushed to disk");
        }
        Ok(())
    }

    /// Matching rollups, oldest period first
    pub async fn query(&self, query: &StatsQuery) -> Vec<ClassificationStats> {
        let records = self.records.read().await;
        let mut matched: Vec<ClassificationStats> =
            records.iter().filter(|s| query.matches(s)).cloned().collect();
        matched.sort_by(|a, b| {
            a.period_start
                .cmp(&b.period_start)
                .then_with(|| a.model_name.cmp(&b.model_name))
        });
        matched
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

/// Periodic stats drain
pub struct StatsWorker {
    manager: Arc<ModelManager>,
    health: HealthRegistry,
    interval: Duration,
}

impl StatsWorker {
    pub fn new(manager: Arc<ModelManager>, health: HealthRegistry, interval: Duration) -> Self {
        Self {
            manager,
            health,
            interval,
        }
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Starting stats worker");

        let mut ticker = interval(self.interval);
        // The first tick completes immediately; skip it so the first drain
        // covers a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down stats worker");
                    break;
                }
            }
        }
    }

    async fn drain_once(&self) {
        match self.manager.snapshot_and_reset_stats().await {
            Ok(StatsOutcome::Persisted(stats)) => {
                debug!(models = stats.len(), "Stats drain complete");
                self.health.set_healthy(components::STATS).await;
            }
            Ok(StatsOutcome::Skipped) => {
                debug!("Stats drain skipped, another worker holds the lease");
            }
            Err(e) => {
                warn!(error = %e, "Stats drain failed");
                self.health
                    .set_degraded(components::STATS, format!("stats drain failed: {}", e))
                    .await;
            }
        }
    }
}
