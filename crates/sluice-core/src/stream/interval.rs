//! Coalescing index-range set.
//!
//! Tracks which record indexes of a stream have reached a given completion
//! state, as a set of non-overlapping closed-open `[lo, hi)` ranges. Ranges
//! are only ever added; touching neighbors are merged on insert so that a
//! prefix-coverage query at a batch boundary sees contiguity.

use std::collections::BTreeMap;
use std::ops::Range;

/// A monotonically growing set of closed-open `u64` ranges.
///
/// Backed by an ordered map from range start to range end, kept fully
/// coalesced: after every [`add`](Self::add), no two stored ranges overlap
/// or touch. That invariant makes [`covers_prefix`](Self::covers_prefix) a
/// single ordered-map lookup.
///
/// # Example
///
/// ```rust
/// use sluice_core::stream::IndexRangeSet;
///
/// let mut set = IndexRangeSet::new();
/// set.add(5..10);
/// assert!(!set.covers_prefix(10));
///
/// // Out-of-order completion reports are fine; adjacency coalesces.
/// set.add(0..5);
/// assert!(set.covers_prefix(10));
/// assert_eq!(set.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct IndexRangeSet {
    /// Range start -> range end, disjoint and non-touching.
    ranges: BTreeMap<u64, u64>,
}

impl IndexRangeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `range` into the set, merging any overlapping or touching
    /// stored ranges.
    ///
    /// Empty or inverted ranges are ignored. Inserting a range that is
    /// already covered is a no-op, so concurrent writers reporting the same
    /// batch are harmless.
    pub fn add(&mut self, range: Range<u64>) {
        if range.start >= range.end {
            return;
        }
        let mut lo = range.start;
        let mut hi = range.end;

        // Begin the merge scan at the last stored range starting at or
        // before `lo`; it is the only candidate that can absorb from the
        // left. Everything after it either merges or lies past `hi`.
        let scan_from = self.ranges.range(..=lo).next_back().map_or(lo, |(&s, _)| s);

        let mut absorbed = Vec::new();
        for (&start, &end) in self.ranges.range(scan_from..) {
            if start > hi {
                break;
            }
            if end < lo {
                // Left neighbor ends strictly before us: disjoint.
                continue;
            }
            lo = lo.min(start);
            hi = hi.max(end);
            absorbed.push(start);
        }
        for start in absorbed {
            self.ranges.remove(&start);
        }
        self.ranges.insert(lo, hi);
    }

    /// Returns whether the set fully encloses `[0, n)`.
    ///
    /// `n == 0` is trivially covered. Because the set is kept coalesced,
    /// the prefix is covered iff the first stored range starts at zero and
    /// reaches at least `n`.
    #[must_use]
    pub fn covers_prefix(&self, n: u64) -> bool {
        if n == 0 {
            return true;
        }
        matches!(self.ranges.first_key_value(), Some((&0, &end)) if end >= n)
    }

    /// Returns the number of disjoint stored ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns whether no ranges have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterates the stored ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|(&start, &end)| start..end)
    }
}
