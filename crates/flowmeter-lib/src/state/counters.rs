//! Classification counter fields

use crate::models::{ConfidenceLevel, FallbackSource};
use serde::{Deserialize, Serialize};

/// One live counter tracked per model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    Total,
    High,
    Low,
    Uncertain,
    MultipleCandidates,
    DnsUsed,
    AsnUsed,
    LatencyMicrosSum,
    LatencySamples,
}

impl CounterField {
    pub const ALL: [CounterField; 9] = [
        CounterField::Total,
        CounterField::High,
        CounterField::Low,
        CounterField::Uncertain,
        CounterField::MultipleCandidates,
        CounterField::DnsUsed,
        CounterField::AsnUsed,
        CounterField::LatencyMicrosSum,
        CounterField::LatencySamples,
    ];

    fn name(&self) -> &'static str {
        match self {
            CounterField::Total => "total",
            CounterField::High => "high",
            CounterField::Low => "low",
            CounterField::Uncertain => "uncertain",
            CounterField::MultipleCandidates => "multiple_candidates",
            CounterField::DnsUsed => "dns_used",
            CounterField::AsnUsed => "asn_used",
            CounterField::LatencyMicrosSum => "latency_us_sum",
            CounterField::LatencySamples => "latency_samples",
        }
    }

    pub fn key(&self, model_name: &str) -> String {
        format!("flowmeter:counters:{}:{}", model_name, self.name())
    }

    pub fn for_confidence(level: ConfidenceLevel) -> Self {
        match level {
            ConfidenceLevel::High => CounterField::High,
            ConfidenceLevel::Low => CounterField::Low,
            ConfidenceLevel::Uncertain => CounterField::Uncertain,
            ConfidenceLevel::MultipleCandidates => CounterField::MultipleCandidates,
        }
    }

    pub fn for_fallback(source: FallbackSource) -> Option<Self> {
        match source {
            FallbackSource::Dns => Some(CounterField::DnsUsed),
            FallbackSource::Asn => Some(CounterField::AsnUsed),
            FallbackSource::Vpn | FallbackSource::None => None,
        }
    }
}

/// Values drained from the live counters of one model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total: u64,
    pub high: u64,
    pub low: u64,
    pub uncertain: u64,
    pub multiple_candidates: u64,
    pub dns_used: u64,
    pub asn_used: u64,
    pub latency_us_sum: u64,
    pub latency_samples: u64,
}

impl CounterSnapshot {
    pub(crate) fn set(&mut self, field: CounterField, value: u64) {
        let slot = match field {
            CounterField::Total => &mut self.total,
            CounterField::High => &mut self.high,
            CounterField::Low => &mut self.low,
            CounterField::Uncertain => &mut self.uncertain,
            CounterField::MultipleCandidates => &mut self.multiple_candidates,
            CounterField::DnsUsed => &mut self.dns_used,
            CounterField::AsnUsed => &mut self.asn_used,
            CounterField::LatencyMicrosSum => &mut self.latency_us_sum,
            CounterField::LatencySamples => &mut self.latency_samples,
        };
        *slot = value;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.latency_samples == 0
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_samples == 0 {
            return 0.0;
        }
        self.latency_us_sum as f64 / self.latency_samples as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_scoped_per_model() {
        assert_eq!(
            CounterField::Total.key("app-v2"),
            "flowmeter:counters:app-v2:total"
        );
        assert_ne!(CounterField::High.key("a"), CounterField::High.key("b"));
    }

    #[test]
    fn test_avg_latency() {
        let snapshot = CounterSnapshot {
            latency_us_sum: 3000,
            latency_samples: 2,
            ..Default::default()
        };
        assert!((snapshot.avg_latency_ms() - 1.5).abs() < f64::EPSILON);
        assert_eq!(CounterSnapshot::default().avg_latency_ms(), 0.0);
    }

    #[test]
    fn test_vpn_fallback_has_no_counter() {
        assert_eq!(CounterField::for_fallback(FallbackSource::Vpn), None);
        assert_eq!(
            CounterField::for_fallback(FallbackSource::Dns),
            Some(CounterField::DnsUsed)
        );
    }
}
