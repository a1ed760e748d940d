//! Per-fact flag bytes for one maintenance transaction
//!
//! Flags are kept in fixed-size segments of atomic bytes. Growing the store
//! takes a write lock only to append segments, so readers and CAS writers on
//! existing segments never wait on each other. Reading a flag that was never
//! written returns `0`.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;

use crate::error::{CwmError, CwmResult};
use crate::store::TupleIndex;

/// A flag byte
pub type TupleFlags = u8;

pub const GF_DELETED_NEW: TupleFlags = 0x01;
pub const GF_DELETED: TupleFlags = 0x02;
pub const GF_ADDED_NEW: TupleFlags = 0x04;
pub const GF_ADDED: TupleFlags = 0x08;
pub const GF_ADDED_MERGED: TupleFlags = 0x10;
pub const GF_DISPROVED: TupleFlags = 0x20;
pub const GF_NORM_PROVED: TupleFlags = 0x40;

pub const LF_PROVED_NEW: TupleFlags = 0x01;
pub const LF_PROVED: TupleFlags = 0x02;
pub const LF_PROVED_MERGED: TupleFlags = 0x04;
pub const LF_CHECKED: TupleFlags = 0x08;
pub const LF_DELAYED: TupleFlags = 0x10;

const SEGMENT_SHIFT: u32 = 12;
const SEGMENT_SIZE: usize = 1 << SEGMENT_SHIFT;
const SEGMENT_MASK: u64 = SEGMENT_SIZE as u64 - 1;

fn new_segment() -> Box<[AtomicU8]> {
    (0..SEGMENT_SIZE).map(|_| AtomicU8::new(0)).collect()
}

/// Growable array of atomic flag bytes indexed by `TupleIndex`
#[derive(Default)]
pub struct TupleFlagStore {
    segments: RwLock<Vec<Box<[AtomicU8]>>>,
}

impl TupleFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags of `index`; `0` past the allocated region
    pub fn get(&self, index: TupleIndex) -> TupleFlags {
        let segments = self.segments.read();
        segments
            .get((index >> SEGMENT_SHIFT) as usize)
            .map(|segment| segment[(index & SEGMENT_MASK) as usize].load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// OR `flags` into the flags of `index`.
    ///
    /// Returns true iff this call changed the stored value, so among
    /// concurrent callers setting the same bit exactly one sees `true`.
    pub fn add(&self, index: TupleIndex, flags: TupleFlags) -> CwmResult<bool> {
        let segment = (index >> SEGMENT_SHIFT) as usize;
        self.ensure_segments(segment + 1)?;

        let segments = self.segments.read();
        let slot = &segments[segment][(index & SEGMENT_MASK) as usize];
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let updated = current | flags;
            if updated == current {
                return Ok(false);
            }
            match slot.compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(true),
                Err(actual) => current = actual,
            }
        }
    }

    fn ensure_segments(&self, count: usize) -> CwmResult<()> {
        if self.segments.read().len() >= count {
            return Ok(());
        }
        let mut segments = self.segments.write();
        let missing = count.saturating_sub(segments.len());
        if missing > 0 {
            segments
                .try_reserve(missing)
                .map_err(|_| CwmError::resource_exhausted("tuple flag store", count * SEGMENT_SIZE))?;
            segments.extend((0..missing).map(|_| new_segment()));
        }
        Ok(())
    }

    /// Reset every flag to `0`, keeping the allocation
    pub fn clear(&mut self) {
        for segment in self.segments.get_mut().iter() {
            for slot in segment.iter() {
                slot.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Number of flag slots currently allocated
    pub fn capacity(&self) -> usize {
        self.segments.read().len() * SEGMENT_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_unallocated_reads_zero() {
        let store = TupleFlagStore::new();
        assert_eq!(store.get(1_000_000), 0);
        assert_eq!(store.capacity(), 0);
    }

    #[test]
    fn test_add_reports_first_writer() {
        let store = TupleFlagStore::new();
        assert!(store.add(7, GF_DELETED_NEW).unwrap());
        assert!(!store.add(7, GF_DELETED_NEW).unwrap());
        assert!(store.add(7, GF_DELETED).unwrap());
        assert_eq!(store.get(7), GF_DELETED_NEW | GF_DELETED);
        assert!(store.capacity() >= 8);
    }

    #[test]
    fn test_grows_across_segments() {
        let store = TupleFlagStore::new();
        let far = (SEGMENT_SIZE * 3 + 5) as TupleIndex;
        assert!(store.add(far, LF_CHECKED).unwrap());
        assert_eq!(store.get(far), LF_CHECKED);
        assert_eq!(store.get(far - 1), 0);
    }

    #[test]
    fn test_clear() {
        let mut store = TupleFlagStore::new();
        store.add(3, LF_PROVED).unwrap();
        store.clear();
        assert_eq!(store.get(3), 0);
        assert!(store.add(3, LF_PROVED).unwrap());
    }

    #[test]
    fn test_concurrent_single_winner() {
        let store = Arc::new(TupleFlagStore::new());
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || (1..500).filter(|&i| store.add(i, GF_DELETED_NEW).unwrap()).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 499);
    }

    proptest! {
        #[test]
        fn prop_flags_accumulate(ops in proptest::collection::vec((0u64..10_000, any::<u8>()), 1..200)) {
            let store = TupleFlagStore::new();
            let mut expected = std::collections::HashMap::new();
            for &(index, flags) in &ops {
                let before = *expected.get(&index).unwrap_or(&0u8);
                let changed = store.add(index, flags).unwrap();
                prop_assert_eq!(changed, before | flags != before);
                expected.insert(index, before | flags);
            }
            for (index, flags) in expected {
                prop_assert_eq!(store.get(index), flags);
            }
        }
    }
}
