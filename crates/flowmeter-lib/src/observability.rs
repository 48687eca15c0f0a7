//! Observability infrastructure for the console
//!
//! Provides:
//! - Prometheus metrics (classification latency and outcomes, fallback use,
//!   flow pushes, active model, lookup set sizes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge_vec,
    GaugeVec, Histogram, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for classification latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ConsoleMetricsInner> = OnceLock::new();

struct ConsoleMetricsInner {
    classification_latency_seconds: Histogram,
    classifications: IntCounterVec,
    classification_errors: IntCounterVec,
    fallbacks: IntCounterVec,
    flow_pushes: IntCounterVec,
    meter_pushes: IntCounterVec,
    active_model_info: GaugeVec,
    lookup_entries: IntGaugeVec,
    stats_drains: IntCounterVec,
}

impl ConsoleMetricsInner {
    fn new() -> Self {
        Self {
            classification_latency_seconds: register_histogram!(
                "flowmeter_classification_latency_seconds",
                "Time spent classifying one flow, fallbacks included",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register classification_latency_seconds"),

            classifications: register_int_counter_vec!(
                "flowmeter_classifications_total",
                "Classifications by model and confidence level",
                &["model", "confidence"]
            )
            .expect("Failed to register classifications_total"),

            classification_errors: register_int_counter_vec!(
                "flowmeter_classification_errors_total",
                "Classification requests that failed",
                &["reason"]
            )
            .expect("Failed to register classification_errors_total"),

            fallbacks: register_int_counter_vec!(
                "flowmeter_fallbacks_total",
                "Uncertain labels rewritten by a deterministic lookup",
                &["source"]
            )
            .expect("Failed to register fallbacks_total"),

            flow_pushes: register_int_counter_vec!(
                "flowmeter_flow_pushes_total",
                "Flow rule writes to the controller",
                &["direction", "status"]
            )
            .expect("Failed to register flow_pushes_total"),

            meter_pushes: register_int_counter_vec!(
                "flowmeter_meter_pushes_total",
                "Meter writes and deletes against the controller",
                &["operation", "status"]
            )
            .expect("Failed to register meter_pushes_total"),

            active_model_info: register_gauge_vec!(
                "flowmeter_active_model_info",
                "Currently active classification model",
                &["model"]
            )
            .expect("Failed to register active_model_info"),

            lookup_entries: register_int_gauge_vec!(
                "flowmeter_lookup_entries",
                "Entries in each loaded lookup set",
                &["set"]
            )
            .expect("Failed to register lookup_entries"),

            stats_drains: register_int_counter_vec!(
                "flowmeter_stats_drains_total",
                "Stats snapshot attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register stats_drains_total"),
        }
    }
}

/// Console metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ConsoleMetrics {
    _private: (),
}

impl Default for ConsoleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ConsoleMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ConsoleMetricsInner {
        GLOBAL_METRICS.get_or_init(ConsoleMetricsInner::new)
    }

    pub fn observe_classification(&self, model: &str, confidence: &str, duration_secs: f64) {
        let inner = self.inner();
        inner.classification_latency_seconds.observe(duration_secs);
        inner
            .classifications
            .with_label_values(&[model, confidence])
            .inc();
    }

    pub fn inc_classification_error(&self, reason: &str) {
        self.inner()
            .classification_errors
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_fallback(&self, source: &str) {
        self.inner().fallbacks.with_label_values(&[source]).inc();
    }

    pub fn inc_flow_push(&self, direction: &str, status: &str) {
        self.inner()
            .flow_pushes
            .with_label_values(&[direction, status])
            .inc();
    }

    pub fn inc_meter_push(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.inner()
            .meter_pushes
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Replace the active model gauge
    pub fn set_active_model(&self, model: Option<&str>) {
        let inner = self.inner();
        inner.active_model_info.reset();
        if let Some(model) = model {
            inner.active_model_info.with_label_values(&[model]).set(1.0);
        }
    }

    pub fn set_lookup_entries(&self, set: &str, count: usize) {
        self.inner()
            .lookup_entries
            .with_label_values(&[set])
            .set(count as i64);
    }

    pub fn inc_stats_drain(&self, outcome: &str) {
        self.inner().stats_drains.with_label_values(&[outcome]).inc();
    }
}

/// Structured logger for console events
///
/// Provides consistent JSON-formatted logging for classifications,
/// policy pushes, model lifecycle and lookup reloads.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a classification outcome
    pub fn log_classification(
        &self,
        model: &str,
        category: &str,
        confidence: &str,
        top_probability: f32,
        fallback: &str,
        elapsed_us: u64,
    ) {
        info!(
            event = "classification",
            instance = %self.instance,
            model = %model,
            category = %category,
            confidence = %confidence,
            top_probability = top_probability,
            fallback = %fallback,
            elapsed_us = elapsed_us,
            "Flow classified"
        );
    }

    /// Log the meter policy chosen for a classified flow
    pub fn log_meter_applied(
        &self,
        controller: &str,
        switch_id: &str,
        category: &str,
        client: &str,
        meter_id: Option<u32>,
    ) {
        info!(
            event = "meter_applied",
            instance = %self.instance,
            controller = %controller,
            switch_id = %switch_id,
            category = %category,
            client = %client,
            meter_id = ?meter_id,
            "Meter policy selected"
        );
    }

    /// Log one flow rule write
    pub fn log_flow_push(
        &self,
        switch_id: &str,
        flow_id: &str,
        direction: &str,
        status: &str,
        response_code: Option<u16>,
    ) {
        if status == "failed" {
            warn!(
                event = "flow_push",
                instance = %self.instance,
                switch_id = %switch_id,
                flow_id = %flow_id,
                direction = %direction,
                status = %status,
                response_code = ?response_code,
                "Flow rule write failed"
            );
        } else {
            info!(
                event = "flow_push",
                instance = %self.instance,
                switch_id = %switch_id,
                flow_id = %flow_id,
                direction = %direction,
                status = %status,
                response_code = ?response_code,
                "Flow rule write"
            );
        }
    }

    pub fn log_model_activated(&self, previous: Option<&str>, model: &str) {
        info!(
            event = "model_activated",
            instance = %self.instance,
            previous = ?previous,
            model = %model,
            "Active model switched"
        );
    }

    pub fn log_stats_persisted(&self, models: usize, total: u64) {
        info!(
            event = "stats_persisted",
            instance = %self.instance,
            models = models,
            total = total,
            "Classification stats persisted"
        );
    }

    pub fn log_lookup_reloaded(&self, set: &str, success: bool, count: usize, message: &str) {
        if success {
            info!(
                event = "lookup_reloaded",
                instance = %self.instance,
                set = %set,
                count = count,
                "Lookup set reloaded"
            );
        } else {
            warn!(
                event = "lookup_reload_failed",
                instance = %self.instance,
                set = %set,
                message = %message,
                "Lookup set reload failed, keeping previous set"
            );
        }
    }

    pub fn log_startup(&self, version: &str, active_model: Option<&str>) {
        info!(
            event = "console_started",
            instance = %self.instance,
            console_version = %version,
            active_model = ?active_model,
            "Flowmeter console started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "console_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Flowmeter console shutting down"
        );
    }
}
