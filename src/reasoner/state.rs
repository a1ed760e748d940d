//! Shared state of one maintenance transaction
//!
//! Holds the flag stores and work queues that the deletion, insertion and
//! propagation tasks communicate through. Nothing here runs an algorithm.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CwmResult;
use crate::store::{TupleIndex, TupleStatus, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED};

use super::flags::{TupleFlagStore, TupleFlags, GF_ADDED, GF_ADDED_MERGED, GF_DELETED};
use super::queue::LockFreeQueue;

/// `I`: the fact is in the materialization before the update
pub fn in_i(status: TupleStatus) -> bool {
    status & (TUPLE_STATUS_IDB | TUPLE_STATUS_IDB_MERGED) == TUPLE_STATUS_IDB
}

/// `I\(D\A)`: in `I`, unless deleted without being added back
pub fn in_i_minus_deleted(status: TupleStatus, flags: TupleFlags) -> bool {
    in_i(status) && flags & (GF_ADDED | GF_DELETED) != GF_DELETED
}

/// `I+A`: in `I`, or added by this update
pub fn in_i_plus_added(status: TupleStatus, flags: TupleFlags) -> bool {
    in_i(status) || flags & (GF_ADDED | GF_ADDED_MERGED) == GF_ADDED
}

/// `(I\D)+A`: the materialization after the update
pub fn in_i_minus_deleted_plus_added(status: TupleStatus, flags: TupleFlags) -> bool {
    (in_i(status) && flags & (GF_DELETED | GF_ADDED_MERGED) == 0)
        || flags & (GF_ADDED | GF_ADDED_MERGED) == GF_ADDED
}

#[derive(Default)]
pub struct IncrementalReasoningState {
    global_flags: TupleFlagStore,
    current_level_flags: TupleFlagStore,
    delete_list: LockFreeQueue,
    added_list: LockFreeQueue,
    proved_list: LockFreeQueue,
    initially_deleted: Vec<LockFreeQueue>,
    initially_added: Vec<LockFreeQueue>,
    delete_list_end: Vec<AtomicU64>,
    added_list_end: Vec<AtomicU64>,
}

impl IncrementalReasoningState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything and size the per-level queues for levels
    /// `0..=max_level`; `None` means a single unlevelled pass.
    pub fn initialize_global(&mut self, max_level: Option<usize>) {
        let levels = max_level.map_or(1, |max| max + 1);
        self.global_flags.clear();
        self.current_level_flags.clear();
        self.delete_list.clear();
        self.added_list.clear();
        self.proved_list.clear();
        self.initially_deleted = (0..levels).map(|_| LockFreeQueue::new()).collect();
        self.initially_added = (0..levels).map(|_| LockFreeQueue::new()).collect();
        self.delete_list_end = (0..levels).map(|_| AtomicU64::new(0)).collect();
        self.added_list_end = (0..levels).map(|_| AtomicU64::new(0)).collect();
    }

    /// Reset the level-scoped flags and the proved-list
    pub fn initialize_current_level(&mut self) {
        self.current_level_flags.clear();
        self.proved_list.clear();
    }

    pub fn level_count(&self) -> usize {
        self.initially_deleted.len()
    }

    pub fn global_flags(&self, tuple: TupleIndex) -> TupleFlags {
        self.global_flags.get(tuple)
    }

    pub fn add_global_flags(&self, tuple: TupleIndex, flags: TupleFlags) -> CwmResult<bool> {
        self.global_flags.add(tuple, flags)
    }

    pub fn current_level_flags(&self, tuple: TupleIndex) -> TupleFlags {
        self.current_level_flags.get(tuple)
    }

    pub fn add_current_level_flags(&self, tuple: TupleIndex, flags: TupleFlags) -> CwmResult<bool> {
        self.current_level_flags.add(tuple, flags)
    }

    pub fn delete_list(&self) -> &LockFreeQueue {
        &self.delete_list
    }

    pub fn added_list(&self) -> &LockFreeQueue {
        &self.added_list
    }

    pub fn proved_list(&self) -> &LockFreeQueue {
        &self.proved_list
    }

    pub fn initially_deleted(&self, level: usize) -> &LockFreeQueue {
        &self.initially_deleted[level]
    }

    pub fn initially_added(&self, level: usize) -> &LockFreeQueue {
        &self.initially_added[level]
    }

    pub fn delete_list_end(&self, level: usize) -> u64 {
        self.delete_list_end[level].load(Ordering::Acquire)
    }

    pub fn set_delete_list_end(&self, level: usize, position: u64) {
        self.delete_list_end[level].store(position, Ordering::Release);
    }

    pub fn added_list_end(&self, level: usize) -> u64 {
        self.added_list_end[level].load(Ordering::Acquire)
    }

    pub fn set_added_list_end(&self, level: usize, position: u64) {
        self.added_list_end[level].store(position, Ordering::Release);
    }

    /// Delete-list end of the level below `level`, `0` at the bottom
    pub fn delete_list_end_before(&self, level: Option<usize>) -> u64 {
        match level {
            Some(level) if level > 0 => self.delete_list_end(level - 1),
            _ => 0,
        }
    }

    /// Added-list end of the level below `level`, `0` at the bottom
    pub fn added_list_end_before(&self, level: Option<usize>) -> u64 {
        match level {
            Some(level) if level > 0 => self.added_list_end(level - 1),
            _ => 0,
        }
    }
}
