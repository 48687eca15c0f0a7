//! VPN CIDR range set

use super::ranges::{Ipv4Range, RangeIndex};
use super::{for_each_record, open_source, Staging};
use crate::error::{ConsoleError, ConsoleResult};
use arc_swap::{ArcSwap, ArcSwapOption};
use ipnetwork::{IpNetwork, Ipv4Network};
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// CIDR ranges loaded from a newline-delimited list
///
/// The network list is the source of truth; the sorted index is a cache
/// tagged with the generation it was built from. Lookups fall back to a
/// linear scan whenever the cache is missing or stale. Writers serialize on
/// `writer` so a generation always names exactly one network list.
pub struct VpnRangeSet {
    networks: ArcSwap<Vec<Ipv4Network>>,
    index: ArcSwapOption<RangeIndex<()>>,
    generation: AtomicU64,
    writer: Mutex<()>,
}

impl Default for VpnRangeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VpnRangeSet {
    pub fn new() -> Self {
        Self {
            networks: ArcSwap::from_pointee(Vec::new()),
            index: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    pub fn from_networks(networks: Vec<Ipv4Network>) -> Self {
        let set = Self::new();
        set.install(networks);
        set
    }

    pub fn len(&self) -> usize {
        self.networks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop the sorted cache; lookups scan linearly until it is rebuilt
    pub fn invalidate_index(&self) {
        self.index.store(None);
    }

    /// Rebuild the sorted cache from the current networks
    pub fn rebuild_index(&self) {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let networks = self.networks.load_full();
        let generation = self.generation();
        self.index
            .store(Some(Arc::new(Self::build_index(&networks, generation))));
    }

    fn build_index(networks: &[Ipv4Network], generation: u64) -> RangeIndex<()> {
        let items = networks
            .iter()
            .map(|n| (Ipv4Range::from_network(*n), ()))
            .collect();
        RangeIndex::build(items, generation)
    }

    fn install(&self, networks: Vec<Ipv4Network>) -> u64 {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let generation = self.generation.load(Ordering::Acquire) + 1;
        let index = Self::build_index(&networks, generation);
        // Networks go first: until the index lands, readers see a stale
        // generation and scan the new list linearly.
        self.networks.store(Arc::new(networks));
        self.generation.store(generation, Ordering::Release);
        self.index.store(Some(Arc::new(index)));
        generation
    }

    /// Whether `ip` falls inside any loaded range
    pub fn contains(&self, ip: IpAddr) -> bool {
        let IpAddr::V4(addr) = ip else {
            return false;
        };

        let guard = self.index.load();
        if let Some(index) = (*guard).as_ref() {
            if index.generation() == self.generation() {
                return index.contains(addr);
            }
        }

        debug!("VPN range index stale, scanning linearly");
        self.linear_contains(ip)
    }

    /// Brute-force membership over the network list
    pub fn linear_contains(&self, ip: IpAddr) -> bool {
        let IpAddr::V4(addr) = ip else {
            return false;
        };
        self.networks.load().iter().any(|n| n.contains(addr))
    }

    pub fn bulk_load_path(&self, path: &Path, batch_size: usize) -> ConsoleResult<usize> {
        let reader = open_source(path)?;
        self.bulk_load(reader, batch_size)
    }

    /// Stream a newline-delimited CIDR list into a staging list and swap it
    /// in. Bare addresses count as /32. IPv6 entries are skipped.
    pub fn bulk_load<R: BufRead>(&self, reader: R, batch_size: usize) -> ConsoleResult<usize> {
        let mut staging: Staging<Ipv4Network> = Staging::new("vpn_ranges", batch_size);
        let mut skipped_v6 = 0usize;

        let streamed = for_each_record(reader, |line_no, line| {
            let network = line.parse::<IpNetwork>().map_err(|e| {
                ConsoleError::validation(format!("line {}: invalid CIDR '{}': {}", line_no, line, e))
            })?;
            match network {
                IpNetwork::V4(v4) => staging.push(v4),
                IpNetwork::V6(_) => skipped_v6 += 1,
            }
            Ok(())
        });

        if let Err(e) = streamed {
            warn!(staging = %staging.name(), error = %e, "Discarding VPN staging list");
            return Err(e);
        }

        let name = staging.name().to_string();
        let networks = staging.finish();
        let count = networks.len();
        let generation = self.install(networks);

        info!(
            staging = %name,
            count = count,
            skipped_v6 = skipped_v6,
            generation = generation,
            "VPN range set swapped in"
        );
        Ok(count)
    }
}
