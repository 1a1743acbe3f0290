use std::ops::Range;
use thiserror::Error;

/// Default ratio of work units to executors.
pub const DEFAULT_OVERSUBSCRIPTION: usize = 3;

/// Errors raised while validating search parameters.
///
/// Every variant is detected when a search is constructed; none of them can
/// surface once executors are running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Alphabet must contain at least one symbol")]
    EmptyAlphabet,
    #[error("Alphabet symbol {0:?} appears more than once")]
    DuplicateSymbol(char),
    #[error("Candidate length must be at least 1")]
    ZeroLength,
    #[error("Keyspace of {arity}^{length} candidates does not fit in 64 bits")]
    KeyspaceOverflow { arity: usize, length: u32 },
    #[error("Executor count must be at least 1")]
    ZeroExecutors,
    #[error("Oversubscription factor must be at least 1")]
    ZeroOversubscription,
    #[error("Cancellation check interval must be at least 1 candidate")]
    ZeroCheckInterval,
    #[error("Progress interval must be longer than zero")]
    ZeroProgressInterval,
    #[error("Cannot partition a keyspace into zero work units")]
    ZeroUnits,
}

/// A half-open range `[start_index, start_index + count)` of candidate indices
/// handed to a single executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub start_index: u64,
    pub count: u64,
}

impl WorkUnit {
    pub fn new(start_index: u64, count: u64) -> Self {
        Self { start_index, count }
    }

    /// One past the last index of the unit.
    pub fn end(&self) -> u64 {
        self.start_index + self.count
    }

    pub fn range(&self) -> Range<u64> {
        self.start_index..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, index: u64) -> bool {
        self.range().contains(&index)
    }

    /// Returns the unit with its first `n` indices removed.
    pub fn skip_front(&self, n: u64) -> Self {
        let skipped = n.min(self.count);
        Self {
            start_index: self.start_index + skipped,
            count: self.count - skipped,
        }
    }
}

/// Number of units to cut for a pool of `executors`, each expected to pull
/// `oversubscription` units on average.
pub fn unit_count(executors: usize, oversubscription: usize) -> usize {
    executors.saturating_mul(oversubscription)
}

/// Splits `[0, keyspace)` into contiguous, non-overlapping work units.
///
/// At most `units` units are produced; the count is clamped to `keyspace` so
/// that no unit is empty. All units share the same size except the last one,
/// which absorbs the remainder of the division.
///
/// # Errors
/// Returns [`PartitionError::ZeroUnits`] if `units` is zero.
pub fn partition(keyspace: u64, units: usize) -> Result<Vec<WorkUnit>, PartitionError> {
    if units == 0 {
        return Err(PartitionError::ZeroUnits);
    }
    if keyspace == 0 {
        return Ok(Vec::new());
    }

    let unit_total = (units as u64).min(keyspace);
    let base = keyspace / unit_total;
    let remainder = keyspace % unit_total;

    let mut out = Vec::with_capacity(unit_total as usize);
    for i in 0..unit_total {
        let count = if i + 1 == unit_total {
            base + remainder
        } else {
            base
        };
        out.push(WorkUnit::new(i * base, count));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_exact_cover(keyspace: u64, units: &[WorkUnit]) {
        let mut next = 0u64;
        for (i, unit) in units.iter().enumerate() {
            assert!(!unit.is_empty(), "Unit {i} should not be empty: {unit:?}");
            assert_eq!(
                unit.start_index, next,
                "Unit {i} should start where the previous one ended (gap or overlap)"
            );
            next = unit.end();
        }
        assert_eq!(next, keyspace, "Units should end exactly at the keyspace size");
    }

    #[test]
    fn partition_even_division_yields_equal_units() {
        let units = partition(12, 4).unwrap();
        assert_eq!(units.len(), 4);
        assert!(units.iter().all(|u| u.count == 3), "All units should hold 3 indices: {units:?}");
        assert_exact_cover(12, &units);
    }

    #[test]
    fn partition_last_unit_absorbs_remainder() {
        let units = partition(10, 3).unwrap();
        assert_eq!(
            units,
            vec![WorkUnit::new(0, 3), WorkUnit::new(3, 3), WorkUnit::new(6, 4)],
            "The last unit should take the leftover index"
        );
    }

    #[test]
    fn partition_clamps_unit_count_to_keyspace() {
        let units = partition(3, 8).unwrap();
        assert_eq!(units.len(), 3, "A keyspace of 3 can only be cut into 3 non-empty units");
        assert_exact_cover(3, &units);
    }

    #[test]
    fn partition_rejects_zero_units() {
        assert_eq!(partition(16, 0), Err(PartitionError::ZeroUnits));
    }

    #[test]
    fn partition_of_empty_keyspace_is_empty() {
        assert!(partition(0, 4).unwrap().is_empty());
    }

    #[test]
    fn unit_count_saturates() {
        assert_eq!(unit_count(4, 3), 12);
        assert_eq!(unit_count(usize::MAX, 2), usize::MAX);
    }

    #[test]
    fn skip_front_trims_and_saturates() {
        let unit = WorkUnit::new(0, 5);
        assert_eq!(unit.skip_front(1), WorkUnit::new(1, 4));
        assert!(unit.skip_front(9).is_empty(), "Skipping past the end should leave an empty unit");
        assert!(unit.contains(4));
        assert!(!unit.contains(5));
    }

    proptest! {
        #[test]
        fn partition_covers_keyspace_exactly_once(keyspace in 1u64..50_000_000, units in 1usize..512) {
            let parts = partition(keyspace, units).unwrap();
            prop_assert_eq!(parts.len() as u64, (units as u64).min(keyspace));
            assert_exact_cover(keyspace, &parts);
        }
    }
}
