//! Sequence cursor into a watch topic's event log.

use std::sync::atomic::{AtomicI64, Ordering};

/// Anything that can hand out and record the current sequence id.
pub trait SequenceProvider: Send + Sync {
    /// Last applied sequence id (0 when nothing has been applied).
    fn get_sequence(&self) -> i64;

    /// Record that `id` has been applied.
    fn set_sequence(&self, id: i64);
}

/// Monotonic sequence cursor.
///
/// [`Sequence::advance`] never moves the cursor backwards. [`Sequence::reset`]
/// is reserved for resynchronization (initial replay, purged history) where
/// the new position is authoritative.
#[derive(Debug, Default)]
pub struct Sequence {
    current: AtomicI64,
}

impl Sequence {
    pub fn new(initial: i64) -> Self {
        Self {
            current: AtomicI64::new(initial),
        }
    }

    pub fn get(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Move forward to `id`; returns false if `id` is not after the cursor.
    pub fn advance(&self, id: i64) -> bool {
        self.current.fetch_max(id, Ordering::SeqCst) < id
    }

    /// Unconditionally position the cursor at `id`.
    pub fn reset(&self, id: i64) {
        self.current.store(id.max(0), Ordering::SeqCst);
    }
}

impl SequenceProvider for Sequence {
    fn get_sequence(&self) -> i64 {
        self.get()
    }

    fn set_sequence(&self, id: i64) {
        self.advance(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_advance_is_monotonic() {
        let seq = Sequence::new(10);
        assert!(seq.advance(11));
        assert!(!seq.advance(5));
        assert_eq!(seq.get(), 11);
    }

    #[test]
    fn test_reset_moves_backwards() {
        let seq = Sequence::new(100);
        seq.reset(41);
        assert_eq!(seq.get(), 41);
        seq.reset(-1);
        assert_eq!(seq.get(), 0);
    }

    proptest! {
        #[test]
        fn cursor_ends_at_max(ids in proptest::collection::vec(0i64..10_000, 0..64)) {
            let seq = Sequence::default();
            for id in &ids {
                seq.set_sequence(*id);
            }
            prop_assert_eq!(seq.get_sequence(), ids.iter().copied().max().unwrap_or(0));
        }
    }
}
