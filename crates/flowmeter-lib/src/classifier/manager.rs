//! Model lifecycle, inference and stats drain
//!
//! The active/loaded records live in the shared `ModelStateStore`, so every
//! worker agrees on which model serves requests. Resident models are local
//! to a worker and loaded lazily on first use.

use super::{
    decide, flatten_payload, CategoryRegistry, Classifier, Disambiguator, LoadedModel,
    StatsQuery, StatsRepository,
};
use crate::error::{ConsoleError, ConsoleResult};
use crate::models::{
    Category, ClassificationOutcome, ClassificationStats, ConfidenceLevel, FallbackSource,
    ModelConfiguration, ModelSummary, UNKNOWN_LABEL,
};
use crate::observability::{ConsoleMetrics, StructuredLogger};
use crate::state::{CounterField, ModelStateStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Timeouts and lease settings for the model manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on loading one artifact
    pub load_timeout: Duration,
    /// Bound on one inference call
    pub inference_timeout: Duration,
    /// Upper bound on how long a stats drain holds its lease
    pub stats_lease_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            inference_timeout: Duration::from_millis(500),
            stats_lease_ttl: Duration::from_secs(30),
        }
    }
}

/// Result of a stats drain attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StatsOutcome {
    /// Counters were drained; rollups for models with traffic
    Persisted(Vec<ClassificationStats>),
    /// Another caller holds the drain lease
    Skipped,
}

pub struct ModelManager {
    configs: RwLock<BTreeMap<String, ModelConfiguration>>,
    resident: DashMap<String, Arc<dyn Classifier>>,
    state: ModelStateStore,
    categories: CategoryRegistry,
    disambiguator: Disambiguator,
    stats: Arc<StatsRepository>,
    config: ManagerConfig,
    metrics: ConsoleMetrics,
    logger: StructuredLogger,
    started_at: DateTime<Utc>,
    lease_seq: AtomicU64,
}

impl ModelManager {
    pub fn new(
        state: ModelStateStore,
        disambiguator: Disambiguator,
        stats: Arc<StatsRepository>,
        config: ManagerConfig,
        metrics: ConsoleMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            configs: RwLock::new(BTreeMap::new()),
            resident: DashMap::new(),
            state,
            categories: CategoryRegistry::new(),
            disambiguator,
            stats,
            config,
            metrics,
            logger,
            started_at: Utc::now(),
            lease_seq: AtomicU64::new(0),
        }
    }

    /// Import model configurations from a JSON array file
    pub async fn import_file(&self, path: &Path) -> ConsoleResult<usize> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ConsoleError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        let configs: Vec<ModelConfiguration> = serde_json::from_str(&raw)
            .map_err(|e| ConsoleError::validation(format!("invalid model file: {}", e)))?;
        self.import_configs(configs).await
    }

    /// Create or replace model configurations. A replaced model that was
    /// resident is evicted and reloaded on next use.
    pub async fn import_configs(&self, configs: Vec<ModelConfiguration>) -> ConsoleResult<usize> {
        for config in &configs {
            validate_config(config)?;
        }
        for config in &configs {
            self.categories.register_model(config)?;
        }

        let mut current = self.configs.write().await;
        for config in &configs {
            if self.resident.remove(&config.name).is_some() {
                debug!(model = %config.name, "Evicted resident model after config import");
            }
            current.insert(config.name.clone(), config.clone());
        }

        info!(imported = configs.len(), total = current.len(), "Imported model configurations");
        Ok(configs.len())
    }

    async fn config_for(&self, name: &str) -> ConsoleResult<ModelConfiguration> {
        self.configs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConsoleError::not_found(format!("model {}", name)))
    }

    pub async fn list(&self) -> ConsoleResult<Vec<ModelSummary>> {
        let active = self.state.active_model().await?;
        let loaded = self.state.loaded_models().await?;
        let configs = self.configs.read().await;

        Ok(configs
            .values()
            .map(|c| ModelSummary {
                name: c.name.clone(),
                backend: c.backend,
                input_shape: c.input_shape.clone(),
                categories: c.wire_categories(),
                confidence_threshold: c.confidence_threshold,
                is_active: active.as_deref() == Some(c.name.as_str()),
                is_loaded: loaded.contains(&c.name),
            })
            .collect())
    }

    pub async fn active_model(&self) -> ConsoleResult<Option<String>> {
        self.state.active_model().await
    }

    /// Wire categories of a model with their cookies
    pub async fn categories(&self, name: &str) -> ConsoleResult<Vec<Category>> {
        let config = self.config_for(name).await?;
        self.categories.register_model(&config)
    }

    /// Make a model resident and add it to the shared loaded record
    pub async fn load(&self, name: &str) -> ConsoleResult<()> {
        let config = self.config_for(name).await?;
        if !self.resident.contains_key(name) {
            let started = Instant::now();
            let model = self.load_blocking(config).await?;
            self.resident.insert(name.to_string(), model);
            info!(
                model = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Model loaded"
            );
        }
        self.state.mark_loaded(name).await?;
        Ok(())
    }

    async fn load_blocking(&self, config: ModelConfiguration) -> ConsoleResult<Arc<dyn Classifier>> {
        let name = config.name.clone();
        let task = tokio::task::spawn_blocking(move || LoadedModel::load(config));

        match tokio::time::timeout(self.config.load_timeout, task).await {
            Err(_) => {
                warn!(model = %name, "Model load timed out");
                Err(ConsoleError::Timeout(self.config.load_timeout))
            }
            Ok(Err(e)) => Err(ConsoleError::Internal(format!("load task failed: {}", e))),
            Ok(Ok(Err(e))) => Err(ConsoleError::Load(format!("{}: {:#}", name, e))),
            Ok(Ok(Ok(model))) => Ok(Arc::new(model)),
        }
    }

    /// Drop a resident model. Unloading the active model clears the active
    /// record.
    pub async fn unload(&self, name: &str) -> ConsoleResult<()> {
        self.config_for(name).await?;
        self.resident.remove(name);
        self.state.mark_unloaded(name).await?;

        if self.state.clear_active_if(name).await? {
            self.metrics.set_active_model(None);
            info!(model = %name, "Unloaded the active model, no model is active now");
        } else {
            info!(model = %name, "Model unloaded");
        }
        Ok(())
    }

    /// Load a model if needed and make it the only active one
    pub async fn activate(&self, name: &str) -> ConsoleResult<()> {
        self.load(name).await?;

        let previous = self.state.active_model().await?;
        if previous.as_deref() == Some(name) {
            debug!(model = %name, "Model already active");
            return Ok(());
        }

        self.state.set_active(name).await?;
        self.metrics.set_active_model(Some(name));
        self.logger.log_model_activated(previous.as_deref(), name);
        Ok(())
    }

    async fn ensure_resident(&self, name: &str) -> ConsoleResult<Arc<dyn Classifier>> {
        if let Some(model) = self.resident.get(name) {
            return Ok(model.clone());
        }
        self.load(name).await?;
        self.resident
            .get(name)
            .map(|m| m.clone())
            .ok_or_else(|| ConsoleError::Internal(format!("model {} evicted during load", name)))
    }

    /// Classify one flow with the active model. `remote_ip` is the address
    /// the client talks to; uncertain labels are resolved against it.
    pub async fn classify(
        &self,
        payload: &[Vec<f32>],
        remote_ip: Option<IpAddr>,
    ) -> ConsoleResult<ClassificationOutcome> {
        let result = self.classify_inner(payload, remote_ip).await;
        if let Err(e) = &result {
            self.metrics.inc_classification_error(e.code());
        }
        result
    }

    async fn classify_inner(
        &self,
        payload: &[Vec<f32>],
        remote_ip: Option<IpAddr>,
    ) -> ConsoleResult<ClassificationOutcome> {
        let started = Instant::now();

        let model_name = self
            .state
            .active_model()
            .await?
            .ok_or_else(|| ConsoleError::not_found("active model"))?;
        let config = self.config_for(&model_name).await?;
        let input = flatten_payload(payload, &config.input_shape)?;
        let model = self.ensure_resident(&model_name).await?;

        let probabilities = self.infer(model, input).await?;
        let decision = decide(&probabilities, config.confidence_threshold)
            .ok_or_else(|| ConsoleError::Internal("model produced no output".into()))?;

        let mut category = match decision.level {
            ConfidenceLevel::High => config
                .categories
                .get(decision.index)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            _ => UNKNOWN_LABEL.to_string(),
        };

        let mut fallback = FallbackSource::None;
        if let Some(ip) = remote_ip.filter(|_| Disambiguator::applies_to(&category)) {
            let offered = config.wire_categories();
            if let Some((label, source)) = self.disambiguator.resolve(&category, ip, &offered).await {
                debug!(from = %category, to = %label, source = ?source, "Label rewritten by fallback");
                category = label;
                fallback = source;
            }
        }

        let cookie = match self.categories.cookie(&model_name, &category) {
            Some(cookie) => Some(cookie),
            None => match self.categories.register(&model_name, &category) {
                Ok(c) => Some(c.cookie),
                Err(e) => {
                    warn!(model = %model_name, category = %category, error = %e, "No cookie for category");
                    None
                }
            },
        };

        let elapsed = started.elapsed();
        let elapsed_us = elapsed.as_micros() as u64;
        self.record_counters(&model_name, decision.level, fallback, elapsed_us)
            .await;

        let fallback_name = fallback_name(fallback);
        if fallback != FallbackSource::None {
            self.metrics.inc_fallback(fallback_name);
        }
        self.metrics.observe_classification(
            &model_name,
            decision.level.as_str(),
            elapsed.as_secs_f64(),
        );
        self.logger.log_classification(
            &model_name,
            &category,
            decision.level.as_str(),
            decision.top,
            fallback_name,
            elapsed_us,
        );

        Ok(ClassificationOutcome {
            model_name,
            category,
            cookie,
            confidence: decision.level,
            top_probability: decision.top,
            fallback,
            elapsed_us,
        })
    }

    async fn infer(&self, model: Arc<dyn Classifier>, input: Vec<f32>) -> ConsoleResult<Vec<f32>> {
        let task = tokio::task::spawn_blocking(move || model.predict(&input));

        match tokio::time::timeout(self.config.inference_timeout, task).await {
            Err(_) => Err(ConsoleError::Timeout(self.config.inference_timeout)),
            Ok(Err(e)) => Err(ConsoleError::Internal(format!("inference task failed: {}", e))),
            Ok(Ok(Err(e))) => Err(ConsoleError::Internal(format!("inference failed: {:#}", e))),
            Ok(Ok(Ok(probabilities))) => Ok(probabilities),
        }
    }

    /// Counter writes never fail a classification
    async fn record_counters(
        &self,
        model_name: &str,
        level: ConfidenceLevel,
        fallback: FallbackSource,
        elapsed_us: u64,
    ) {
        let mut updates = vec![
            (CounterField::Total, 1),
            (CounterField::for_confidence(level), 1),
            (CounterField::LatencyMicrosSum, elapsed_us as i64),
            (CounterField::LatencySamples, 1),
        ];
        if let Some(field) = CounterField::for_fallback(fallback) {
            updates.push((field, 1));
        }

        for (field, delta) in updates {
            if let Err(e) = self.state.incr(model_name, field, delta).await {
                warn!(model = %model_name, field = ?field, error = %e, "Failed to increment counter");
            }
        }
    }

    /// Drain live counters into stats rollups. Concurrent callers are
    /// excluded by a lease held for the duration of the drain; the TTL
    /// bounds how long a crashed holder can block the next drain.
    pub async fn snapshot_and_reset_stats(&self) -> ConsoleResult<StatsOutcome> {
        let owner = format!(
            "{}-{}",
            self.logger.instance(),
            self.lease_seq.fetch_add(1, Ordering::Relaxed)
        );
        if !self
            .state
            .try_acquire_stats_lease(&owner, self.config.stats_lease_ttl)
            .await?
        {
            self.metrics.inc_stats_drain("skipped");
            return Ok(StatsOutcome::Skipped);
        }

        let result = self.drain_counters().await;
        if let Err(e) = self.state.release_stats_lease(&owner).await {
            warn!(owner = %owner, error = %e, "Failed to release stats lease");
        }
        let stats = result?;

        let total: u64 = stats.iter().map(|s| s.total).sum();
        self.metrics.inc_stats_drain("persisted");
        self.logger.log_stats_persisted(stats.len(), total);
        Ok(StatsOutcome::Persisted(stats))
    }

    async fn drain_counters(&self) -> ConsoleResult<Vec<ClassificationStats>> {
        let period_end = Utc::now();
        let period_start = self
            .state
            .stats_period_start()
            .await?
            .unwrap_or(self.started_at);

        let names: Vec<String> = self.configs.read().await.keys().cloned().collect();
        let mut stats = Vec::new();
        for name in names {
            let snapshot = self.state.drain_counters(&name).await?;
            if snapshot.is_empty() {
                continue;
            }
            stats.push(ClassificationStats {
                model_name: name,
                period_start,
                period_end,
                total: snapshot.total,
                high_confidence: snapshot.high,
                low_confidence: snapshot.low,
                uncertain: snapshot.uncertain,
                multiple_candidates: snapshot.multiple_candidates,
                dns_fallbacks: snapshot.dns_used,
                asn_fallbacks: snapshot.asn_used,
                avg_latency_ms: snapshot.avg_latency_ms(),
            });
        }
        self.state.set_stats_period_start(period_end).await?;

        if let Err(e) = self.stats.append(stats.clone()).await {
            warn!(error = %e, "Failed to write stats file, rollups kept in memory");
        }
        Ok(stats)
    }

    pub async fn query_stats(&self, query: &StatsQuery) -> Vec<ClassificationStats> {
        self.stats.query(query).await
    }
}

fn fallback_name(source: FallbackSource) -> &'static str {
    match source {
        FallbackSource::None => "none",
        FallbackSource::Dns => "dns",
        FallbackSource::Vpn => "vpn",
        FallbackSource::Asn => "asn",
    }
}

fn validate_config(config: &ModelConfiguration) -> ConsoleResult<()> {
    if config.name.trim().is_empty() {
        return Err(ConsoleError::validation("model name is empty"));
    }
    if !(config.confidence_threshold > 0.0 && config.confidence_threshold <= 1.0) {
        return Err(ConsoleError::validation(format!(
            "model {}: confidence_threshold must be in (0, 1], got {}",
            config.name, config.confidence_threshold
        )));
    }
    if config.input_shape.is_empty() || config.input_shape.contains(&0) {
        return Err(ConsoleError::validation(format!(
            "model {}: input_shape must be non-empty with positive dimensions",
            config.name
        )));
    }
    if config.categories.is_empty() {
        return Err(ConsoleError::validation(format!(
            "model {}: no categories",
            config.name
        )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = config.categories.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(ConsoleError::validation(format!(
            "model {}: duplicate category {}",
            config.name, dup
        )));
    }
    Ok(())
}
