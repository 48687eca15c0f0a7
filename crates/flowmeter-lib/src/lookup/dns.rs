//! Known DNS resolver set

use super::{for_each_record, open_source, split_csv_line, Staging};
use crate::error::{ConsoleError, ConsoleResult};
use arc_swap::ArcSwapOption;
use std::collections::HashSet;
use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Public resolvers that are always treated as DNS, even when the primary
/// set has not been loaded
pub const CRITICAL_RESOLVERS: [IpAddr; 10] = [
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
    IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
    IpAddr::V4(Ipv4Addr::new(1, 0, 0, 1)),
    IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
    IpAddr::V4(Ipv4Addr::new(149, 112, 112, 112)),
    IpAddr::V4(Ipv4Addr::new(208, 67, 222, 222)),
    IpAddr::V4(Ipv4Addr::new(208, 67, 220, 220)),
    IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
    IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
];

/// Set of resolver IPs loaded from a CSV whose first column is the address
pub struct DnsServerSet {
    servers: ArcSwapOption<HashSet<IpAddr>>,
    generation: AtomicU64,
}

impl Default for DnsServerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsServerSet {
    /// Create an unloaded set; only the critical resolvers match
    pub fn new() -> Self {
        Self {
            servers: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_ips(ips: impl IntoIterator<Item = IpAddr>) -> Self {
        let set = Self::new();
        set.servers.store(Some(Arc::new(ips.into_iter().collect())));
        set.generation.store(1, Ordering::Release);
        set
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let guard = self.servers.load();
        (*guard).as_ref().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership in the primary set only
    pub fn try_contains(&self, ip: IpAddr) -> ConsoleResult<bool> {
        let guard = self.servers.load();
        match (*guard).as_ref() {
            Some(servers) => Ok(servers.contains(&ip)),
            None => Err(ConsoleError::TransientStore(
                "DNS server set not loaded".to_string(),
            )),
        }
    }

    /// Whether `ip` is a known resolver. Never fails: an unavailable primary
    /// set degrades to the critical resolver list.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match self.try_contains(ip) {
            Ok(true) => true,
            Ok(false) => CRITICAL_RESOLVERS.contains(&ip),
            Err(e) => {
                debug!(error = %e, "Falling back to critical resolver list");
                CRITICAL_RESOLVERS.contains(&ip)
            }
        }
    }

    pub fn bulk_load_path(&self, path: &Path, batch_size: usize) -> ConsoleResult<usize> {
        let reader = open_source(path)?;
        self.bulk_load(reader, batch_size)
    }

    /// Stream a CSV into a staging set and swap it in. On error the staging
    /// set is dropped and the live set is left as it was.
    pub fn bulk_load<R: BufRead>(&self, reader: R, batch_size: usize) -> ConsoleResult<usize> {
        let mut staging: Staging<IpAddr> = Staging::new("dns_servers", batch_size);

        let streamed = for_each_record(reader, |line_no, line| {
            let fields = split_csv_line(line);
            let first = fields.first().map(String::as_str).unwrap_or_default();
            match first.parse::<IpAddr>() {
                Ok(ip) => {
                    staging.push(ip);
                    Ok(())
                }
                // Header row
                Err(_) if line_no == 1 => Ok(()),
                Err(_) => Err(ConsoleError::validation(format!(
                    "line {}: invalid IP address '{}'",
                    line_no, first
                ))),
            }
        });

        if let Err(e) = streamed {
            warn!(staging = %staging.name(), error = %e, "Discarding DNS staging set");
            return Err(e);
        }

        let name = staging.name().to_string();
        let servers: HashSet<IpAddr> = staging.finish().into_iter().collect();
        let count = servers.len();
        self.servers.store(Some(Arc::new(servers)));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        info!(staging = %name, count = count, generation = generation, "DNS server set swapped in");
        Ok(count)
    }
}
