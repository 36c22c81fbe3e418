//! Sets of `u64` identifiers stored as closed ranges.

use std::fmt;

use shardline_codec::Value;

/// A set of integers kept as sorted, disjoint, non-adjacent closed ranges.
///
/// Used to report purged histories and transactions compactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The ranges, ascending.
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// Whether `n` is in the set.
    pub fn contains(&self, n: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, hi)| hi < n);
        self.ranges.get(idx).is_some_and(|&(lo, _)| lo <= n)
    }

    /// Add one value.
    pub fn insert(&mut self, n: u64) {
        self.insert_range(n, n);
    }

    /// Add the closed range `lo..=hi`. Empty when `lo > hi`.
    pub fn insert_range(&mut self, lo: u64, hi: u64) {
        if lo > hi {
            return;
        }
        // First range that ends at or after lo - 1 (touching counts).
        let start = self.ranges.partition_point(|&(_, h)| h.saturating_add(1) < lo);
        let mut new_lo = lo;
        let mut new_hi = hi;
        let mut end = start;
        while let Some(&(l, h)) = self.ranges.get(end) {
            if l > hi.saturating_add(1) {
                break;
            }
            new_lo = new_lo.min(l);
            new_hi = new_hi.max(h);
            end += 1;
        }
        self.ranges.splice(start..end, [(new_lo, new_hi)]);
    }

    /// Iterate over every member.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    /// Wire form: array of `[lo, hi]` pairs.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.ranges
                .iter()
                .map(|&(lo, hi)| Value::Array(vec![Value::from(lo), Value::from(hi)]))
                .collect(),
        )
    }

    /// Parse the wire form. Ranges are normalized on the way in.
    pub fn from_value(value: &Value) -> Option<Self> {
        let mut set = Self::new();
        for item in value.as_array()? {
            match item.as_array()? {
                [lo, hi] => set.insert_range(lo.as_u64()?, hi.as_u64()?),
                _ => return None,
            }
        }
        Some(set)
    }
}

impl FromIterator<u64> for RangeSet {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        let mut set = Self::new();
        for n in iter {
            set.insert(n);
        }
        set
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (lo, hi)) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{lo}..{hi}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn coalesces_adjacent_values() {
        let set: RangeSet = [1, 2, 3, 7, 5, 6].into_iter().collect();
        assert_eq!(set.ranges(), &[(1, 3), (5, 7)]);
        assert_eq!(set.to_string(), "[1..3, 5..7]");
    }

    #[test]
    fn bridging_range_merges_neighbours() {
        let mut set = RangeSet::new();
        set.insert_range(0, 2);
        set.insert_range(10, 12);
        set.insert_range(3, 9);
        assert_eq!(set.ranges(), &[(0, 12)]);
    }

    #[test]
    fn extremes_do_not_overflow() {
        let mut set = RangeSet::new();
        set.insert(u64::MAX);
        set.insert(u64::MAX - 1);
        set.insert(0);
        assert_eq!(set.ranges(), &[(0, 0), (u64::MAX - 1, u64::MAX)]);
        assert!(set.contains(u64::MAX));
        assert!(!set.contains(1));
    }

    #[test]
    fn wire_form() {
        let set: RangeSet = [4, 5, 9].into_iter().collect();
        assert_eq!(RangeSet::from_value(&set.to_value()), Some(set));
        assert_eq!(RangeSet::from_value(&Value::Array(vec![Value::Integer(1)])), None);
        assert_eq!(RangeSet::new().to_string(), "[]");
    }

    proptest! {
        #[test]
        fn behaves_like_a_set(values in proptest::collection::vec(0u64..200, 0..60)) {
            let set: RangeSet = values.iter().copied().collect();
            let reference: BTreeSet<u64> = values.into_iter().collect();
            prop_assert_eq!(
                set.iter().collect::<Vec<_>>(),
                reference.iter().copied().collect::<Vec<_>>()
            );
            for n in 0..200 {
                prop_assert_eq!(set.contains(n), reference.contains(&n));
            }
            for pair in set.ranges().windows(2) {
                prop_assert!(pair[0].1 + 1 < pair[1].0);
            }
        }
    }
}
