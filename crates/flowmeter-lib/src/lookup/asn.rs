//! Autonomous system lookup for client IPs

use super::ranges::{Ipv4Range, RangeIndex};
use super::{for_each_record, open_source, split_csv_line, Staging};
use crate::error::{ConsoleError, ConsoleResult};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Owner of a routed prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnRecord {
    pub asn: u32,
    pub organization: String,
}

/// Resolves the organization owning an address
#[async_trait]
pub trait AsnResolver: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> ConsoleResult<Option<AsnRecord>>;
}

/// ASN table loaded from a GeoLite2-ASN style CSV:
/// `network,autonomous_system_number,autonomous_system_organization`
pub struct AsnDatabase {
    index: ArcSwap<RangeIndex<AsnRecord>>,
    generation: AtomicU64,
}

impl Default for AsnDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl AsnDatabase {
    pub fn new() -> Self {
        Self {
            index: ArcSwap::from_pointee(RangeIndex::empty()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.index.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most specific record for an address
    pub fn find(&self, ip: IpAddr) -> Option<AsnRecord> {
        let IpAddr::V4(addr) = ip else {
            return None;
        };
        self.index.load().most_specific(addr).cloned()
    }

    pub fn bulk_load_path(&self, path: &Path, batch_size: usize) -> ConsoleResult<usize> {
        let reader = open_source(path)?;
        self.bulk_load(reader, batch_size)
    }

    pub fn bulk_load<R: BufRead>(&self, reader: R, batch_size: usize) -> ConsoleResult<usize> {
        let mut staging: Staging<(Ipv4Range, AsnRecord)> = Staging::new("asn_blocks", batch_size);

        let streamed = for_each_record(reader, |line_no, line| {
            let fields = split_csv_line(line);
            if fields.len() < 3 {
                return Err(ConsoleError::validation(format!(
                    "line {}: expected 3 columns, found {}",
                    line_no,
                    fields.len()
                )));
            }
            let network = match fields[0].parse::<IpNetwork>() {
                Ok(network) => network,
                Err(_) if line_no == 1 => return Ok(()),
                Err(e) => {
                    return Err(ConsoleError::validation(format!(
                        "line {}: invalid network '{}': {}",
                        line_no, fields[0], e
                    )))
                }
            };
            let asn = fields[1].parse::<u32>().map_err(|_| {
                ConsoleError::validation(format!("line {}: invalid ASN '{}'", line_no, fields[1]))
            })?;
            if let IpNetwork::V4(v4) = network {
                staging.push((
                    Ipv4Range::from_network(v4),
                    AsnRecord {
                        asn,
                        organization: fields[2].clone(),
                    },
                ));
            }
            Ok(())
        });

        if let Err(e) = streamed {
            warn!(staging = %staging.name(), error = %e, "Discarding ASN staging table");
            return Err(e);
        }

        let name = staging.name().to_string();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let index = RangeIndex::build(staging.finish(), generation);
        let count = index.len();
        self.index.store(Arc::new(index));

        info!(staging = %name, count = count, generation = generation, "ASN table swapped in");
        Ok(count)
    }
}

#[async_trait]
impl AsnResolver for AsnDatabase {
    async fn lookup(&self, ip: IpAddr) -> ConsoleResult<Option<AsnRecord>> {
        Ok(self.find(ip))
    }
}
