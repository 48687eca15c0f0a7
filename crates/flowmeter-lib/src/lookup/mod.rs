//! Reference sets used to disambiguate uncertain classifications
//!
//! This module provides:
//! - DNS resolver set with hard-coded critical resolvers
//! - VPN CIDR set with a sorted range index
//! - ASN database and the curated organization → category tables
//!
//! Every set is reloaded through a staging collection that is swapped in
//! only after the whole source was read, so readers never observe a
//! partially loaded set.

mod asn;
mod dns;
mod orgs;
mod ranges;
mod vpn;

#[cfg(test)]
mod tests;

pub use asn::{AsnDatabase, AsnRecord, AsnResolver};
pub use dns::{DnsServerSet, CRITICAL_RESOLVERS};
pub use orgs::{OrgCategoryTable, OrgMatch};
pub use ranges::{Ipv4Range, RangeIndex};
pub use vpn::VpnRangeSet;

use crate::error::{ConsoleError, ConsoleResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of records moved into a staging collection per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(1);

/// Outcome of a bulk load, as printed by the CLI and returned by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub success: bool,
    pub count: usize,
    pub message: String,
}

impl LoadReport {
    pub fn from_result(kind: &str, result: &ConsoleResult<usize>) -> Self {
        match result {
            Ok(count) => Self {
                success: true,
                count: *count,
                message: format!("Loaded {} {} records", count, kind),
            },
            Err(e) => Self {
                success: false,
                count: 0,
                message: format!("Failed to load {} records: {}", kind, e),
            },
        }
    }
}

/// Collection that records are streamed into before being swapped live
pub(crate) struct Staging<T> {
    name: String,
    records: Vec<T>,
    batch: Vec<T>,
    batch_size: usize,
    batches: usize,
}

impl<T> Staging<T> {
    pub(crate) fn new(kind: &str, batch_size: usize) -> Self {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let batch_size = batch_size.max(1);
        Self {
            name: format!("{}_staging_{}", kind, seq),
            records: Vec::new(),
            batch: Vec::with_capacity(batch_size),
            batch_size,
            batches: 0,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn push(&mut self, record: T) {
        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            self.flush_batch();
        }
    }

    fn flush_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        self.records.append(&mut self.batch);
        self.batches += 1;
        tracing::trace!(staging = %self.name, batches = self.batches, "Staged batch");
    }

    /// Finish staging and hand over every record
    pub(crate) fn finish(mut self) -> Vec<T> {
        self.flush_batch();
        self.records
    }
}

/// Open a bulk-load source file
pub(crate) fn open_source(path: &Path) -> ConsoleResult<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        ConsoleError::validation(format!("cannot open {}: {}", path.display(), e))
    })?;
    Ok(BufReader::new(file))
}

/// Read lines of a source, skipping blanks and `#` comments. The callback
/// gets the 1-based line number and the trimmed line.
pub(crate) fn for_each_record<R, F>(reader: R, mut f: F) -> ConsoleResult<()>
where
    R: BufRead,
    F: FnMut(usize, &str) -> ConsoleResult<()>,
{
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        f(idx + 1, trimmed)?;
    }
    Ok(())
}

/// Split one CSV line, honouring double-quoted fields
pub(crate) fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}
