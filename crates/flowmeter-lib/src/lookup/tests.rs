//! Tests for lookup set loading and membership

use super::*;
use proptest::prelude::*;
use std::io::{self, Cursor, Read};
use std::net::{IpAddr, Ipv4Addr};
use tempfile::TempDir;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Reader that yields `data` and then fails, like a dropped network mount
struct FailingReader {
    inner: Cursor<Vec<u8>>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"));
        }
        Ok(n)
    }
}

fn failing_source(data: &str) -> io::BufReader<FailingReader> {
    io::BufReader::new(FailingReader {
        inner: Cursor::new(data.as_bytes().to_vec()),
    })
}

mod dns_tests {
    use super::*;

    #[test]
    fn test_bulk_load_csv_with_header() {
        let set = DnsServerSet::new();
        let csv = "ip_address,name,country\n192.0.2.53,ns1,US\n198.51.100.53,ns2,DE\n\n# comment\n";
        let count = set.bulk_load(Cursor::new(csv), 1).unwrap();

        assert_eq!(count, 2);
        assert!(set.contains(ip("192.0.2.53")));
        assert!(set.contains(ip("198.51.100.53")));
        assert!(!set.contains(ip("203.0.113.1")));
        assert_eq!(set.generation(), 1);
    }

    #[test]
    fn test_critical_resolvers_without_primary_set() {
        let set = DnsServerSet::new();
        assert!(set.try_contains(ip("8.8.8.8")).is_err());
        assert!(set.contains(ip("8.8.8.8")));
        assert!(set.contains(ip("1.1.1.1")));
        assert!(!set.contains(ip("192.0.2.53")));
    }

    #[test]
    fn test_critical_resolvers_with_primary_set() {
        let set = DnsServerSet::from_ips([ip("192.0.2.53")]);
        assert!(set.contains(ip("9.9.9.9")));
        assert!(set.contains(ip("192.0.2.53")));
    }

    #[test]
    fn test_invalid_row_keeps_previous_set() {
        let set = DnsServerSet::new();
        set.bulk_load(Cursor::new("192.0.2.53\n"), 10).unwrap();

        let err = set
            .bulk_load(Cursor::new("198.51.100.1\nnot-an-ip\n"), 10)
            .unwrap_err();
        assert!(matches!(err, crate::error::ConsoleError::Validation(_)));

        assert!(set.contains(ip("192.0.2.53")));
        assert!(!set.contains(ip("198.51.100.1")));
        assert_eq!(set.generation(), 1);
    }

    #[test]
    fn test_stream_failure_keeps_previous_set() {
        let set = DnsServerSet::new();
        set.bulk_load(Cursor::new("192.0.2.53\n"), 10).unwrap();

        let result = set.bulk_load(failing_source("198.51.100.1\n198.51.100.2\n"), 1);
        assert!(result.is_err());

        assert_eq!(set.len(), 1);
        assert!(set.contains(ip("192.0.2.53")));
        assert!(!set.contains(ip("198.51.100.1")));
    }

    #[test]
    fn test_bulk_load_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dns.csv");
        std::fs::write(&path, "192.0.2.10\n192.0.2.11\n").unwrap();

        let set = DnsServerSet::new();
        assert_eq!(set.bulk_load_path(&path, 100).unwrap(), 2);

        let missing = set.bulk_load_path(&dir.path().join("missing.csv"), 100);
        assert!(missing.is_err());
        assert_eq!(set.len(), 2);
    }
}

mod vpn_tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_bulk_load_and_contains() {
        let set = VpnRangeSet::new();
        let list = "10.8.0.0/16\n172.16.5.0/24\n192.0.2.7\n2001:db8::/32\n";
        assert_eq!(set.bulk_load(Cursor::new(list), 2).unwrap(), 3);

        assert!(set.contains(ip("10.8.200.1")));
        assert!(set.contains(ip("172.16.5.255")));
        assert!(set.contains(ip("192.0.2.7")));
        assert!(!set.contains(ip("192.0.2.8")));
        assert!(!set.contains(ip("2001:db8::1")));
    }

    #[test]
    fn test_stale_index_falls_back_to_linear_scan() {
        let set = VpnRangeSet::from_networks(vec!["10.0.0.0/8".parse().unwrap()]);
        set.invalidate_index();
        assert!(set.contains(ip("10.1.2.3")));
        set.rebuild_index();
        assert!(set.contains(ip("10.1.2.3")));
    }

    #[test]
    fn test_failure_mid_stream_keeps_previous_ranges() {
        let set = VpnRangeSet::new();
        set.bulk_load(Cursor::new("10.0.0.0/8\n"), 10).unwrap();

        assert!(set
            .bulk_load(Cursor::new("172.16.0.0/12\n10.0.0.0/33\n"), 1)
            .is_err());
        assert!(set.bulk_load(failing_source("172.16.0.0/12\n"), 1).is_err());

        assert!(set.contains(ip("10.20.30.40")));
        assert!(!set.contains(ip("172.16.1.1")));
        assert_eq!(set.generation(), 1);
    }

    #[test]
    fn test_concurrent_loads_keep_index_in_step() {
        let set = Arc::new(VpnRangeSet::new());
        let loaders: Vec<_> = (0..8u8)
            .map(|i| {
                let set = set.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let list = format!("10.{}.0.0/16\n", i);
                        set.bulk_load(Cursor::new(list), 4).unwrap();
                    }
                })
            })
            .collect();
        for loader in loaders {
            loader.join().unwrap();
        }

        assert_eq!(set.generation(), 160);
        assert_eq!(set.len(), 1);
        for i in 0..8u8 {
            let addr = IpAddr::V4(Ipv4Addr::new(10, i, 1, 1));
            assert_eq!(set.contains(addr), set.linear_contains(addr), "10.{}.1.1", i);
        }
    }

    fn arb_network() -> impl Strategy<Value = ipnetwork::Ipv4Network> {
        (any::<u32>(), 0u8..=32).prop_map(|(addr, prefix)| {
            ipnetwork::Ipv4Network::new(Ipv4Addr::from(addr), prefix).unwrap()
        })
    }

    proptest! {
        #[test]
        fn binary_search_matches_linear_scan(
            networks in proptest::collection::vec(arb_network(), 0..64),
            probes in proptest::collection::vec(any::<u32>(), 1..64),
        ) {
            let set = VpnRangeSet::from_networks(networks.clone());
            for raw in probes {
                let addr = IpAddr::V4(Ipv4Addr::from(raw));
                prop_assert_eq!(set.contains(addr), set.linear_contains(addr));
            }
            // Probe the range edges too, where off-by-one errors live
            for n in &networks {
                for edge in [n.network(), n.broadcast()] {
                    let addr = IpAddr::V4(edge);
                    prop_assert!(set.contains(addr));
                    prop_assert_eq!(set.contains(addr), set.linear_contains(addr));
                }
            }
        }
    }
}

mod asn_tests {
    use super::*;

    const ASN_CSV: &str = "network,autonomous_system_number,autonomous_system_organization\n\
        8.8.8.0/24,15169,GOOGLE\n\
        157.240.0.0/16,32934,\"Facebook, Inc.\"\n\
        17.0.0.0/8,714,Apple Inc.\n";

    #[tokio::test]
    async fn test_lookup_quoted_organization() {
        let db = AsnDatabase::new();
        assert_eq!(db.bulk_load(Cursor::new(ASN_CSV), 2).unwrap(), 3);

        let record = db.lookup(ip("157.240.1.35")).await.unwrap().unwrap();
        assert_eq!(record.asn, 32934);
        assert_eq!(record.organization, "Facebook, Inc.");

        assert!(db.lookup(ip("203.0.113.9")).await.unwrap().is_none());
        assert!(db.lookup(ip("2001:db8::1")).await.unwrap().is_none());
    }

    #[test]
    fn test_short_row_rejected() {
        let db = AsnDatabase::new();
        db.bulk_load(Cursor::new(ASN_CSV), 10).unwrap();
        assert!(db.bulk_load(Cursor::new("8.8.8.0/24,15169\n"), 10).is_err());
        assert_eq!(db.len(), 3);
    }
}

mod support_tests {
    use super::*;

    #[test]
    fn test_split_csv_line() {
        assert_eq!(split_csv_line("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(
            split_csv_line("1,\"Amazon.com, Inc.\",x"),
            vec!["1", "Amazon.com, Inc.", "x"]
        );
        assert_eq!(split_csv_line("\"say \"\"hi\"\"\""), vec!["say \"hi\""]);
    }

    #[test]
    fn test_staging_names_are_fresh() {
        let a: Staging<u8> = Staging::new("dns_servers", 10);
        let b: Staging<u8> = Staging::new("dns_servers", 10);
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_staging_flushes_partial_batch() {
        let mut staging: Staging<u8> = Staging::new("t", 3);
        for i in 0..5 {
            staging.push(i);
        }
        assert_eq!(staging.finish(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_load_report() {
        let ok = LoadReport::from_result("dns", &Ok(3));
        assert!(ok.success);
        assert_eq!(ok.count, 3);

        let failed = LoadReport::from_result(
            "vpn",
            &Err(crate::error::ConsoleError::validation("line 2: bad")),
        );
        assert!(!failed.success);
        assert!(failed.message.contains("line 2"));
    }

    #[test]
    fn test_for_each_record_skips_comments() {
        let mut seen = Vec::new();
        for_each_record(Cursor::new("# header\n\nx\n  y  \n"), |n, line| {
            seen.push((n, line.to_string()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(3, "x".to_string()), (4, "y".to_string())]);
    }
}
