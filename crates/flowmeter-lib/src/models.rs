//! Core data models for the classification and meter pipeline

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Label assigned when the model cannot decide
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Label assigned when the client IP is a known DNS resolver
pub const DNS_LABEL: &str = "DNS";

/// Label whose traffic is re-resolved through the narrower QUIC organization table
pub const QUIC_LABEL: &str = "QUIC";

/// Label assigned when the client IP belongs to a known VPN range
pub const VPN_LABEL: &str = "VPN";

/// Categories appended to every model's category list, in this order
pub const FALLBACK_CATEGORIES: [&str; 3] = [UNKNOWN_LABEL, DNS_LABEL, "Apple"];

/// Inference backend for a model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    /// ONNX graph executed with tract
    Onnx,
    /// JSON softmax-regression weights
    Linear,
}

/// A classification model as imported from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfiguration {
    pub name: String,
    pub artifact: PathBuf,
    pub backend: ModelBackend,
    /// Shape of one input sample, without the batch dimension
    pub input_shape: Vec<usize>,
    /// Output labels in model index order
    pub categories: Vec<String>,
    pub confidence_threshold: f32,
}

impl ModelConfiguration {
    /// Category list as exposed to callers, with fallback labels appended
    pub fn wire_categories(&self) -> Vec<String> {
        let mut categories = self.categories.clone();
        for fallback in FALLBACK_CATEGORIES {
            if !categories.iter().any(|c| c == fallback) {
                categories.push(fallback.to_string());
            }
        }
        categories
    }

    /// Number of scalar inputs one sample carries
    pub fn input_len(&self) -> usize {
        self.input_shape.iter().product()
    }
}

/// Model listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub backend: ModelBackend,
    pub input_shape: Vec<usize>,
    pub categories: Vec<String>,
    pub confidence_threshold: f32,
    pub is_active: bool,
    pub is_loaded: bool,
}

/// A category of a model with its flow cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub model_name: String,
    pub cookie: u64,
}

/// How sure the model was about its top label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Uncertain,
    Low,
    MultipleCandidates,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Uncertain => "uncertain",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::MultipleCandidates => "multiple_candidates",
        }
    }
}

/// Which deterministic lookup rewrote an uncertain label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    None,
    Dns,
    Vpn,
    Asn,
}

/// Result of classifying one flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub model_name: String,
    pub category: String,
    pub cookie: Option<u64>,
    pub confidence: ConfidenceLevel,
    pub top_probability: f32,
    pub fallback: FallbackSource,
    pub elapsed_us: u64,
}

/// Recurring window a meter policy is eligible in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationPeriod {
    Weekday,
    Weekend,
    AllWeek,
}

/// A rate-limiting policy bound to a controller-side meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterPolicy {
    pub id: u64,
    pub controller: String,
    pub switch_id: String,
    pub meter_id: u32,
    pub rate_kbps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u64>,
    pub categories: BTreeSet<String>,
    /// Client device the policy is scoped to; unset applies to every client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub activation_period: ActivationPeriod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

impl MeterPolicy {
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

/// Create/update payload for a meter policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterPolicyDraft {
    pub controller: String,
    pub switch_id: String,
    /// Explicit controller meter id; allocated when absent
    #[serde(default)]
    pub meter_id: Option<u32>,
    pub rate_kbps: u64,
    #[serde(default)]
    pub burst_size: Option<u64>,
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub client: Option<String>,
    pub activation_period: ActivationPeriod,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
}

/// Periodic rollup of classification counters for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    pub model_name: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total: u64,
    pub high_confidence: u64,
    pub low_confidence: u64,
    pub uncertain: u64,
    pub multiple_candidates: u64,
    pub dns_fallbacks: u64,
    pub asn_fallbacks: u64,
    pub avg_latency_ms: f64,
}

/// Classification request as posted by the capture agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_mac: String,
    #[serde(default)]
    pub dst_mac: Option<String>,
    /// Packet feature matrix, one row per packet
    pub payload: Vec<Vec<f32>>,
    /// 1 when the source endpoint is the managed client
    pub src: u8,
    /// 1 for TCP, 0 for UDP
    pub tcp: u8,
    pub switch_id: String,
    pub inbound_port: u32,
    pub outbound_port: u32,
    pub controller_ip: String,
}

/// Outcome of one controller flow write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Success,
    Failed,
    Skipped,
}

/// Direction of a flow rule relative to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    ClientToServer,
    ServerToClient,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::ClientToServer => "client_to_server",
            FlowDirection::ServerToClient => "server_to_client",
        }
    }
}

/// Per-direction result reported back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub direction: FlowDirection,
    pub status: FlowStatus,
    pub flow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Overall status of a classification request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Both directions written
    Success,
    /// Forward written, reverse failed
    Partial,
    /// Forward write failed
    Failed,
    /// No applicable meter policy
    Unmetered,
}

/// Response to a classification request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub status: PipelineStatus,
    pub classification: String,
    pub confidence: ConfidenceLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<u64>,
    pub applied_meter_id: Option<u32>,
    pub flow_results: Vec<FlowResult>,
}
