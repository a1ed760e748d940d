//! Incremental maintenance of a materialized triple store
//!
//! Given a materialization of base facts under a rule set, the reasoner
//! brings it up to date after a batch of base-fact deletions and insertions
//! without recomputing it from scratch:
//!
//! - `changes` seeds the transaction and writes the outcome back
//! - `deletion` runs the per-level deletion skeleton, parameterized by a
//!   [`DeletionStrategy`](deletion::DeletionStrategy): `dred` over-deletes
//!   then re-derives, `fbf` proves facts backward before deleting them
//! - `insertion` propagates additions forward
//! - `incremental` drives all of it level by level
//!
//! Tasks share an [`IncrementalReasoningState`](state::IncrementalReasoningState)
//! and run on a [`WorkerPool`](parallel::WorkerPool).

pub mod changes;
pub mod deletion;
pub mod dred;
pub mod fbf;
pub mod flags;
pub mod incremental;
pub mod insertion;
pub mod materialize;
pub mod monitor;
pub mod parallel;
pub mod queue;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EqualityMode;
use crate::equality::EqualityManager;
use crate::rules::{ComponentScope, RuleIndex};
use crate::store::TripleTable;
use crate::term::Dictionary;

pub use incremental::{IncrementalEngine, MaintenanceStats};
pub use monitor::{IncrementalMonitor, MonitorEvent, RecordingMonitor, TracingMonitor};
pub use parallel::{ParallelConfig, WorkerPool};
pub use state::IncrementalReasoningState;

/// How equality and stratification are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningMode {
    pub equality: EqualityMode,
    pub by_levels: bool,
}

impl ReasoningMode {
    pub fn new(equality: EqualityMode, by_levels: bool) -> Self {
        Self { equality, by_levels }
    }

    pub fn equality_enabled(&self) -> bool {
        self.equality.is_enabled()
    }

    pub fn unique_name_assumption(&self) -> bool {
        self.equality.unique_name_assumption()
    }

    /// Levels are only processed one by one without equality
    pub fn uses_levels(&self) -> bool {
        self.by_levels && !self.equality_enabled()
    }
}

impl Default for ReasoningMode {
    fn default() -> Self {
        Self::new(EqualityMode::Off, true)
    }
}

/// Cooperative cancellation of a running update
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running tasks to stop at their next dequeue
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.stopped.store(false, Ordering::Release);
    }
}

/// Everything a maintenance task reads or writes
#[derive(Clone, Copy)]
pub struct MaintenanceContext<'a> {
    pub dictionary: &'a Dictionary,
    pub table: &'a TripleTable,
    pub rules: &'a RuleIndex,
    /// Equivalence classes as they were before the update
    pub equality: &'a EqualityManager,
    pub mode: ReasoningMode,
    pub monitor: Option<&'a dyn IncrementalMonitor>,
    pub state: &'a IncrementalReasoningState,
    pub stop: &'a StopHandle,
}

impl<'a> MaintenanceContext<'a> {
    /// The steady equality manager if equality reasoning is on
    pub fn equality_manager(&self) -> Option<&'a EqualityManager> {
        self.mode.equality_enabled().then_some(self.equality)
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_stopped()
    }
}

/// Rule scope for a task level; `None` means no levels
pub fn scope_of(level: Option<usize>) -> ComponentScope {
    ComponentScope::from_level(level)
}
