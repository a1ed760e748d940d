//! In-memory triple table
//!
//! Every fact ever seen during the lifetime of a store gets a stable
//! `TupleIndex`. Rows are never removed; membership in the EDB and in the
//! materialization is recorded in per-row status bits that are updated
//! atomically, so concurrent maintenance workers can flip them without
//! holding the table lock for writing.

use std::sync::atomic::{AtomicU8, Ordering};

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::term::{ResourceId, Triple};

/// Handle of a row in the triple table
pub type TupleIndex = u64;

/// The handle no row ever receives
pub const INVALID_TUPLE_INDEX: TupleIndex = 0;

/// Persistent per-row status bits
pub type TupleStatus = u8;

pub const TUPLE_STATUS_COMPLETE: TupleStatus = 0x01;
pub const TUPLE_STATUS_EDB: TupleStatus = 0x02;
pub const TUPLE_STATUS_IDB: TupleStatus = 0x04;
pub const TUPLE_STATUS_IDB_MERGED: TupleStatus = 0x08;

/// A triple pattern; `None` positions match anything
pub type TriplePattern = [Option<ResourceId>; 3];

struct TupleRecord {
    triple: Triple,
    status: AtomicU8,
}

#[derive(Default)]
struct TableInner {
    tuples: Vec<TupleRecord>,
    lookup: FnvHashMap<Triple, TupleIndex>,
    by_position: [FnvHashMap<ResourceId, Vec<TupleIndex>>; 3],
}

impl TableInner {
    fn record(&self, index: TupleIndex) -> Option<&TupleRecord> {
        if index == INVALID_TUPLE_INDEX {
            return None;
        }
        self.tuples.get(index as usize - 1)
    }
}

/// A table of triples with atomic status bits and positional indexes
#[derive(Default)]
pub struct TripleTable {
    inner: RwLock<TableInner>,
}

impl TripleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the row holding `triple`
    pub fn get_tuple_index(&self, triple: &Triple) -> Option<TupleIndex> {
        self.inner.read().lookup.get(triple).copied()
    }

    /// Add `triple` if absent and OR `status` into its status bits.
    ///
    /// Returns whether the row was created or any bit of `status` was newly
    /// set, together with the row's index.
    pub fn add_tuple(&self, triple: &Triple, status: TupleStatus) -> (bool, TupleIndex) {
        if let Some(index) = self.get_tuple_index(triple) {
            return (self.delete_add_status(index, 0, status), index);
        }

        let mut inner = self.inner.write();
        if let Some(&index) = inner.lookup.get(triple) {
            drop(inner);
            return (self.delete_add_status(index, 0, status), index);
        }

        let index = inner.tuples.len() as TupleIndex + 1;
        inner.tuples.push(TupleRecord {
            triple: *triple,
            status: AtomicU8::new(TUPLE_STATUS_COMPLETE | status),
        });
        inner.lookup.insert(*triple, index);
        for (position, &resource) in triple.iter().enumerate() {
            inner.by_position[position]
                .entry(resource)
                .or_default()
                .push(index);
        }
        (true, index)
    }

    /// Atomically clear `delete_mask` then set `add_mask` on a row.
    ///
    /// Returns true iff the stored status changed.
    pub fn delete_add_status(
        &self,
        index: TupleIndex,
        delete_mask: TupleStatus,
        add_mask: TupleStatus,
    ) -> bool {
        let inner = self.inner.read();
        let Some(record) = inner.record(index) else {
            return false;
        };
        let mut current = record.status.load(Ordering::Acquire);
        loop {
            let updated = (current & !delete_mask) | add_mask;
            if updated == current {
                return false;
            }
            match record.status.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Status bits of a row; `0` for unknown rows
    pub fn get_tuple_status(&self, index: TupleIndex) -> TupleStatus {
        self.inner
            .read()
            .record(index)
            .map(|r| r.status.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Status bits and contents of a row
    pub fn get_status_and_tuple(&self, index: TupleIndex) -> Option<(TupleStatus, Triple)> {
        self.inner
            .read()
            .record(index)
            .map(|r| (r.status.load(Ordering::Acquire), r.triple))
    }

    /// Contents of a row
    pub fn triple(&self, index: TupleIndex) -> Option<Triple> {
        self.inner.read().record(index).map(|r| r.triple)
    }

    /// Snapshot of all rows matching `pattern`, using the most selective index
    pub fn match_pattern(&self, pattern: &TriplePattern) -> Vec<(TupleIndex, Triple)> {
        let inner = self.inner.read();

        let candidates = pattern
            .iter()
            .enumerate()
            .filter_map(|(position, bound)| {
                bound.map(|resource| {
                    inner.by_position[position]
                        .get(&resource)
                        .map(Vec::as_slice)
                        .unwrap_or(&[])
                })
            })
            .min_by_key(|rows| rows.len());

        let matches = |triple: &Triple| {
            pattern
                .iter()
                .zip(triple.iter())
                .all(|(bound, value)| bound.map_or(true, |b| b == *value))
        };

        match candidates {
            Some(rows) => rows
                .iter()
                .filter_map(|&index| inner.record(index).map(|r| (index, r.triple)))
                .filter(|(_, triple)| matches(triple))
                .collect(),
            None => inner
                .tuples
                .iter()
                .enumerate()
                .map(|(i, r)| (i as TupleIndex + 1, r.triple))
                .collect(),
        }
    }

    /// Rows whose `position` holds `resource`
    pub fn tuples_with_resource_at(&self, resource: ResourceId, position: usize) -> Vec<TupleIndex> {
        self.inner.read().by_position[position]
            .get(&resource)
            .cloned()
            .unwrap_or_default()
    }

    /// Rows mentioning `resource` at any position, without duplicates
    pub fn tuples_mentioning(&self, resource: ResourceId) -> Vec<TupleIndex> {
        let inner = self.inner.read();
        let mut rows: Vec<TupleIndex> = inner
            .by_position
            .iter()
            .filter_map(|index| index.get(&resource))
            .flatten()
            .copied()
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    /// Rows whose status satisfies `predicate`
    pub fn select(&self, predicate: impl Fn(TupleStatus) -> bool) -> Vec<(TupleIndex, Triple)> {
        self.inner
            .read()
            .tuples
            .iter()
            .enumerate()
            .filter(|(_, r)| predicate(r.status.load(Ordering::Acquire)))
            .map(|(i, r)| (i as TupleIndex + 1, r.triple))
            .collect()
    }

    /// Facts currently in the materialization (IDB and not merged)
    pub fn materialized(&self) -> Vec<Triple> {
        self.select(|s| s & (TUPLE_STATUS_IDB | TUPLE_STATUS_IDB_MERGED) == TUPLE_STATUS_IDB)
            .into_iter()
            .map(|(_, t)| t)
            .collect()
    }

    /// Number of rows ever created
    pub fn len(&self) -> usize {
        self.inner.read().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let table = TripleTable::new();
        let (added, index) = table.add_tuple(&[10, 1, 20], TUPLE_STATUS_EDB);
        assert!(added);
        assert_ne!(index, INVALID_TUPLE_INDEX);
        assert_eq!(table.get_tuple_index(&[10, 1, 20]), Some(index));
        assert_eq!(
            table.get_status_and_tuple(index),
            Some((TUPLE_STATUS_COMPLETE | TUPLE_STATUS_EDB, [10, 1, 20]))
        );
    }

    #[test]
    fn test_add_existing_reports_new_bits_only() {
        let table = TripleTable::new();
        let (_, index) = table.add_tuple(&[1, 2, 3], TUPLE_STATUS_EDB);
        assert_eq!(table.add_tuple(&[1, 2, 3], TUPLE_STATUS_EDB), (false, index));
        assert_eq!(table.add_tuple(&[1, 2, 3], 0), (false, index));
        assert_eq!(table.add_tuple(&[1, 2, 3], TUPLE_STATUS_IDB), (true, index));
    }

    #[test]
    fn test_delete_add_status() {
        let table = TripleTable::new();
        let (_, index) = table.add_tuple(&[1, 2, 3], TUPLE_STATUS_IDB_MERGED);
        assert!(table.delete_add_status(index, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB));
        assert!(!table.delete_add_status(index, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB));
        assert_eq!(
            table.get_tuple_status(index),
            TUPLE_STATUS_COMPLETE | TUPLE_STATUS_IDB
        );
        assert_eq!(table.get_tuple_status(99), 0);
    }

    #[test]
    fn test_match_pattern() {
        let table = TripleTable::new();
        table.add_tuple(&[1, 5, 2], 0);
        table.add_tuple(&[1, 5, 3], 0);
        table.add_tuple(&[4, 5, 3], 0);
        table.add_tuple(&[1, 6, 3], 0);

        let rows = table.match_pattern(&[Some(1), Some(5), None]);
        let triples: Vec<Triple> = rows.into_iter().map(|(_, t)| t).collect();
        assert_eq!(triples, vec![[1, 5, 2], [1, 5, 3]]);

        assert_eq!(table.match_pattern(&[None, None, None]).len(), 4);
        assert!(table.match_pattern(&[Some(9), None, None]).is_empty());
    }

    #[test]
    fn test_tuples_mentioning() {
        let table = TripleTable::new();
        let (_, a) = table.add_tuple(&[7, 7, 7], 0);
        let (_, b) = table.add_tuple(&[1, 2, 7], 0);
        table.add_tuple(&[1, 2, 3], 0);
        assert_eq!(table.tuples_mentioning(7), vec![a, b]);
        assert_eq!(table.tuples_with_resource_at(7, 2), vec![a, b]);
    }

    #[test]
    fn test_materialized_skips_merged() {
        let table = TripleTable::new();
        table.add_tuple(&[1, 2, 3], TUPLE_STATUS_IDB);
        table.add_tuple(&[4, 2, 3], TUPLE_STATUS_IDB | TUPLE_STATUS_IDB_MERGED);
        table.add_tuple(&[5, 2, 3], TUPLE_STATUS_EDB);
        assert_eq!(table.materialized(), vec![[1, 2, 3]]);
    }
}
