//! Deterministic relabeling of uncertain classifications
//!
//! Applies to `Unknown` and `QUIC` labels when the remote address is known:
//! DNS resolver set first, then VPN ranges (only for `Unknown`), then the
//! ASN owner mapped through an organization table.

use crate::lookup::{AsnResolver, DnsServerSet, OrgCategoryTable, VpnRangeSet};
use crate::models::{FallbackSource, DNS_LABEL, QUIC_LABEL, UNKNOWN_LABEL, VPN_LABEL};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on one ASN lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(50);

pub struct Disambiguator {
    dns: Arc<DnsServerSet>,
    vpn: Arc<VpnRangeSet>,
    asn: Arc<dyn AsnResolver>,
    organizations: OrgCategoryTable,
    quic_organizations: OrgCategoryTable,
    lookup_timeout: Duration,
}

impl Disambiguator {
    pub fn new(dns: Arc<DnsServerSet>, vpn: Arc<VpnRangeSet>, asn: Arc<dyn AsnResolver>) -> Self {
        Self {
            dns,
            vpn,
            asn,
            organizations: OrgCategoryTable::default_organizations(),
            quic_organizations: OrgCategoryTable::default_quic(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Whether a label is eligible for relabeling
    pub fn applies_to(label: &str) -> bool {
        label == UNKNOWN_LABEL || label == QUIC_LABEL
    }

    /// Replacement label for `label`, restricted to `allowed` categories.
    /// Lookup failures are logged and treated as no match.
    pub async fn resolve(
        &self,
        label: &str,
        remote_ip: IpAddr,
        allowed: &[String],
    ) -> Option<(String, FallbackSource)> {
        if !Self::applies_to(label) {
            return None;
        }
        let is_allowed = |category: &str| allowed.iter().any(|c| c == category);

        if self.dns.contains(remote_ip) && is_allowed(DNS_LABEL) {
            return Some((DNS_LABEL.to_string(), FallbackSource::Dns));
        }

        if label == UNKNOWN_LABEL && is_allowed(VPN_LABEL) && self.vpn.contains(remote_ip) {
            return Some((VPN_LABEL.to_string(), FallbackSource::Vpn));
        }

        let record = match tokio::time::timeout(self.lookup_timeout, self.asn.lookup(remote_ip)).await {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(ip = %remote_ip, error = %e, "ASN lookup failed");
                return None;
            }
            Err(_) => {
                warn!(ip = %remote_ip, timeout_ms = self.lookup_timeout.as_millis() as u64, "ASN lookup timed out");
                return None;
            }
        };

        let table = if label == QUIC_LABEL {
            &self.quic_organizations
        } else {
            &self.organizations
        };

        let (category, matched) = table.resolve(&record.organization)?;
        if !is_allowed(category) {
            debug!(
                organization = %record.organization,
                category = %category,
                "Organization category not offered by the active model"
            );
            return None;
        }

        debug!(
            asn = record.asn,
            organization = %record.organization,
            category = %category,
            matched = ?matched,
            "ASN fallback matched"
        );
        Some((category.to_string(), FallbackSource::Asn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsoleResult;
    use crate::lookup::AsnRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver returning a fixed organization and counting calls
    struct StaticAsn {
        organization: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AsnResolver for StaticAsn {
        async fn lookup(&self, _ip: IpAddr) -> ConsoleResult<Option<AsnRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(AsnRecord {
                asn: 15169,
                organization: self.organization.to_string(),
            }))
        }
    }

    struct SlowAsn;

    #[async_trait]
    impl AsnResolver for SlowAsn {
        async fn lookup(&self, _ip: IpAddr) -> ConsoleResult<Option<AsnRecord>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
    }

    fn allowed(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn disambiguator(asn: Arc<dyn AsnResolver>) -> Disambiguator {
        let dns = Arc::new(DnsServerSet::from_ips(["192.0.2.53".parse().unwrap()]));
        let vpn = Arc::new(VpnRangeSet::from_networks(vec!["10.8.0.0/16".parse().unwrap()]));
        Disambiguator::new(dns, vpn, asn)
    }

    #[tokio::test]
    async fn test_dns_short_circuits_asn() {
        let asn = Arc::new(StaticAsn {
            organization: "GOOGLE",
            calls: AtomicUsize::new(0),
        });
        let d = disambiguator(asn.clone());
        let categories = allowed(&["Google", "Unknown", "DNS"]);

        let result = d
            .resolve(UNKNOWN_LABEL, "192.0.2.53".parse().unwrap(), &categories)
            .await;
        assert_eq!(result, Some(("DNS".to_string(), FallbackSource::Dns)));
        assert_eq!(asn.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_asn_maps_organization() {
        let asn = Arc::new(StaticAsn {
            organization: "Google LLC",
            calls: AtomicUsize::new(0),
        });
        let d = disambiguator(asn.clone());
        let categories = allowed(&["Google", "Unknown", "DNS"]);

        let result = d
            .resolve(UNKNOWN_LABEL, "203.0.113.5".parse().unwrap(), &categories)
            .await;
        assert_eq!(result, Some(("Google".to_string(), FallbackSource::Asn)));
        assert_eq!(asn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_quic_uses_narrow_table() {
        let d = disambiguator(Arc::new(StaticAsn {
            organization: "Netflix Streaming Services",
            calls: AtomicUsize::new(0),
        }));
        let categories = allowed(&["Netflix", "QUIC", "Unknown", "DNS"]);

        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        assert_eq!(d.resolve(QUIC_LABEL, ip, &categories).await, None);
        assert_eq!(
            d.resolve(UNKNOWN_LABEL, ip, &categories).await,
            Some(("Netflix".to_string(), FallbackSource::Asn))
        );
    }

    #[tokio::test]
    async fn test_mapped_category_must_be_offered() {
        let d = disambiguator(Arc::new(StaticAsn {
            organization: "Google LLC",
            calls: AtomicUsize::new(0),
        }));
        let categories = allowed(&["Zoom", "Unknown", "DNS"]);
        assert_eq!(
            d.resolve(UNKNOWN_LABEL, "203.0.113.5".parse().unwrap(), &categories)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn test_vpn_only_when_model_has_vpn_category() {
        let d = disambiguator(Arc::new(StaticAsn {
            organization: "Some ISP",
            calls: AtomicUsize::new(0),
        }));
        let ip: IpAddr = "10.8.1.1".parse().unwrap();

        assert_eq!(
            d.resolve(UNKNOWN_LABEL, ip, &allowed(&["VPN", "Unknown", "DNS"]))
                .await,
            Some(("VPN".to_string(), FallbackSource::Vpn))
        );
        assert_eq!(
            d.resolve(UNKNOWN_LABEL, ip, &allowed(&["Unknown", "DNS"])).await,
            None
        );
    }

    #[tokio::test]
    async fn test_confident_labels_untouched() {
        let d = disambiguator(Arc::new(StaticAsn {
            organization: "Google LLC",
            calls: AtomicUsize::new(0),
        }));
        assert_eq!(
            d.resolve("Zoom", "192.0.2.53".parse().unwrap(), &allowed(&["Zoom", "DNS"]))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn test_slow_asn_lookup_times_out() {
        let d = disambiguator(Arc::new(SlowAsn)).with_lookup_timeout(Duration::from_millis(10));
        assert_eq!(
            d.resolve(UNKNOWN_LABEL, "203.0.113.5".parse().unwrap(), &allowed(&["Unknown"]))
                .await,
            None
        );
    }
}
