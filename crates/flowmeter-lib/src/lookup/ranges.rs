//! Sorted IPv4 range index
//!
//! Ranges are kept sorted by start address. A lookup binary-searches the
//! rightmost range starting at or before the address, then walks backwards
//! while an earlier range could still reach it. The running maximum of range
//! ends bounds that walk, so overlapping ranges stay correct without a full
//! scan.

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Inclusive IPv4 address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Range {
    pub start: u32,
    pub end: u32,
}

impl Ipv4Range {
    pub fn from_network(network: Ipv4Network) -> Self {
        Self {
            start: u32::from(network.network()),
            end: u32::from(network.broadcast()),
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr <= self.end
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    range: Ipv4Range,
    value: T,
}

/// Sorted range index carrying a value per range
#[derive(Debug, Clone)]
pub struct RangeIndex<T> {
    entries: Vec<Entry<T>>,
    /// `max_end[i]` is the largest `end` among `entries[..=i]`
    max_end: Vec<u32>,
    generation: u64,
}

impl<T> RangeIndex<T> {
    pub fn build(items: Vec<(Ipv4Range, T)>, generation: u64) -> Self {
        let mut entries: Vec<Entry<T>> = items
            .into_iter()
            .map(|(range, value)| Entry { range, value })
            .collect();
        entries.sort_by(|a, b| {
            a.range
                .start
                .cmp(&b.range.start)
                .then(a.range.end.cmp(&b.range.end))
        });

        let mut max_end = Vec::with_capacity(entries.len());
        let mut running = 0u32;
        for entry in &entries {
            running = running.max(entry.range.end);
            max_end.push(running);
        }

        Self {
            entries,
            max_end,
            generation,
        }
    }

    pub fn empty() -> Self {
        Self::build(Vec::new(), 0)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ranges containing `addr`, nearest start first
    fn containing(&self, addr: u32) -> impl Iterator<Item = &Entry<T>> + '_ {
        // Number of entries whose start <= addr
        let upper = self.entries.partition_point(|e| e.range.start <= addr);
        (0..upper)
            .rev()
            .take_while(move |&i| self.max_end[i] >= addr)
            .map(move |i| &self.entries[i])
            .filter(move |e| e.range.contains(addr))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.containing(u32::from(addr)).next().is_some()
    }

    /// Value of the narrowest range containing `addr`
    pub fn most_specific(&self, addr: Ipv4Addr) -> Option<&T> {
        self.containing(u32::from(addr))
            .min_by_key(|e| e.range.len())
            .map(|e| &e.value)
    }

    /// Brute-force containment check over every range
    pub fn linear_contains(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        self.entries.iter().any(|e| e.range.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Range {
        Ipv4Range::from_network(s.parse().unwrap())
    }

    #[test]
    fn test_range_bounds() {
        let r = net("10.0.0.0/24");
        assert_eq!(r.start, u32::from(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(r.end, u32::from(Ipv4Addr::new(10, 0, 0, 255)));
        assert_eq!(r.len(), 256);
    }

    #[test]
    fn test_overlap_found_behind_rightmost_start() {
        // 10.0.0.0/8 contains the address, the /24 starting later does not
        let index = RangeIndex::build(
            vec![(net("10.0.0.0/8"), ()), (net("10.1.0.0/24"), ())],
            1,
        );
        let addr = Ipv4Addr::new(10, 2, 0, 1);
        assert!(index.contains(addr));
        assert!(index.linear_contains(addr));
    }

    #[test]
    fn test_most_specific_prefers_narrow_range() {
        let index = RangeIndex::build(
            vec![(net("8.0.0.0/8"), "wide"), (net("8.8.8.0/24"), "narrow")],
            1,
        );
        assert_eq!(index.most_specific(Ipv4Addr::new(8, 8, 8, 8)), Some(&"narrow"));
        assert_eq!(index.most_specific(Ipv4Addr::new(8, 1, 1, 1)), Some(&"wide"));
        assert_eq!(index.most_specific(Ipv4Addr::new(9, 1, 1, 1)), None);
    }

    #[test]
    fn test_empty_index() {
        let index: RangeIndex<()> = RangeIndex::empty();
        assert!(!index.contains(Ipv4Addr::new(1, 2, 3, 4)));
        assert!(index.is_empty());
    }
}
