//! Covered byte ranges of a transaction
//!
//! Tracks which pool bytes are already protected by the outermost
//! transaction's undo log. Intervals are half-open, disjoint and merged, so
//! that exactly the uncovered gaps of a new request are snapshotted
//! (first-write-wins).

use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Uncovered sub-ranges of one request; usually zero or one.
pub type Gaps = SmallVec<[(u64, u64); 2]>;

/// Set of disjoint half-open byte intervals.
#[derive(Debug, Clone, Default)]
pub struct RangeSet {
    // start -> end
    intervals: BTreeMap<u64, u64>,
}

impl RangeSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `[start, end)` and return the sub-ranges that were not yet covered.
    pub fn insert_uncovered(&mut self, start: u64, end: u64) -> Gaps {
        let mut gaps = Gaps::new();
        if start >= end {
            return gaps;
        }

        let mut cursor = start;
        if let Some((_, &prev_end)) = self.intervals.range(..=start).next_back() {
            cursor = cursor.max(prev_end);
        }
        for (&s, &e) in self.intervals.range(start..end) {
            if s > cursor {
                gaps.push((cursor, s));
            }
            cursor = cursor.max(e);
        }
        if cursor < end {
            gaps.push((cursor, end));
        }

        if !gaps.is_empty() {
            self.merge(start, end);
        }
        gaps
    }

    fn merge(&mut self, start: u64, end: u64) {
        let mut lo = start;
        let mut hi = end;
        if let Some((&s, &e)) = self.intervals.range(..=start).next_back() {
            if e >= start {
                lo = s;
                hi = hi.max(e);
            }
        }
        let touching: Vec<u64> = self
            .intervals
            .range(lo..=end)
            .map(|(&s, _)| s)
            .collect();
        for s in touching {
            if let Some(e) = self.intervals.remove(&s) {
                hi = hi.max(e);
            }
        }
        self.intervals.insert(lo, hi);
    }

    /// True if every byte of `[start, end)` is covered.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        match self.intervals.range(..=start).next_back() {
            Some((_, &e)) => e >= end,
            None => false,
        }
    }

    /// Iterate intervals in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.intervals.iter().map(|(&s, &e)| (s, e))
    }

    #[cfg(test)]
    fn covered_bytes(&self) -> u64 {
        self.intervals.iter().map(|(s, e)| e - s).sum()
    }

    /// Number of disjoint intervals.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// True if nothing is covered.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Forget every interval.
    pub fn clear(&mut self) {
        self.intervals.clear();
    }
}
