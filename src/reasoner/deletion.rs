//! Deletion propagation skeleton
//!
//! One [`DeletionTask`] runs per level. Every worker first replays the effects
//! of facts deleted (or, for negation, added) at earlier levels, then all
//! workers meet at a barrier and drain the delete-list together. Each fact
//! taken from the list is handed to the strategy's
//! [`check`](DeletionStrategy::check); a fact that cannot be kept is
//! confirmed deleted and its consequences are pushed onto the same list.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Barrier;

use parking_lot::Mutex;

use crate::error::{CwmError, CwmResult};
use crate::rules::{BodyLiteralInfo, ComponentScope, Evaluation, LiteralRole};
use crate::store::{TupleIndex, TupleStatus};
use crate::term::{is_same_as, same_as, ResourceId, Triple};

use super::flags::{GF_ADDED, GF_DELETED, GF_DELETED_NEW};
use super::monitor::IncrementalMonitor;
use super::parallel::WorkerPool;
use super::state::{in_i, in_i_minus_deleted, in_i_plus_added, in_i_minus_deleted_plus_added};
use super::{scope_of, MaintenanceContext};

/// Decides whether a possibly deleted fact survives
pub trait DeletionStrategy {
    /// Whether several workers may drain the delete-list at once
    const MULTITHREADED: bool;
    /// Reflexivity bits tracked per resource
    const REFLEXIVITY_BITS: u8;

    /// Return true if the fact is still derivable and must be kept
    fn check(
        &mut self,
        task: &DeletionTask<'_>,
        worker: usize,
        tuple: TupleIndex,
        triple: &Triple,
    ) -> CwmResult<bool>;
}

/// Packed bitset with `bits` flags per resource
pub struct ReflexivityTracker {
    bits: u8,
    words: Vec<AtomicU8>,
}

impl ReflexivityTracker {
    pub fn new(max_resource: ResourceId, bits: u8) -> Self {
        let total = (max_resource as usize + 1) * bits as usize;
        Self {
            bits,
            words: (0..total.div_ceil(8)).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Set bit `kind` of `resource`; true if this call set it
    pub fn check(&self, resource: ResourceId, kind: u8) -> bool {
        debug_assert!(kind < self.bits);
        let bit = resource as usize * self.bits as usize + kind as usize;
        match self.words.get(bit / 8) {
            Some(word) => {
                let mask = 1u8 << (bit % 8);
                word.fetch_or(mask, Ordering::AcqRel) & mask == 0
            }
            None => true,
        }
    }
}

pub struct DeletionTask<'a> {
    ctx: MaintenanceContext<'a>,
    level: Option<usize>,
    after_last_deleted_in_previous_levels: u64,
    process_previous_levels: bool,
    reflexivity: ReflexivityTracker,
}

impl<'a> DeletionTask<'a> {
    /// Seed the delete-list for `level` and position the queue cursors
    pub fn new(ctx: MaintenanceContext<'a>, level: Option<usize>, reflexivity_bits: u8) -> CwmResult<Self> {
        let state = ctx.state;
        let scope = scope_of(level);

        let mut after_last = 0;
        if let Some(level) = level {
            after_last = state.delete_list().first_free_position();
            state
                .delete_list()
                .append_unprocessed(state.initially_deleted(level))?;
        }

        let process_previous_levels = matches!(level, Some(l) if l > 0) && ctx.rules.has_rules(scope);
        state.delete_list().reset_dequeue_position(if process_previous_levels {
            0
        } else {
            after_last
        });
        if ctx.rules.has_rules_with_negation(scope) {
            state.added_list().reset_dequeue_position(0);
        }

        Ok(Self {
            ctx,
            level,
            after_last_deleted_in_previous_levels: after_last,
            process_previous_levels,
            reflexivity: ReflexivityTracker::new(ctx.dictionary.max_resource_id(), reflexivity_bits),
        })
    }

    pub fn context(&self) -> &MaintenanceContext<'a> {
        &self.ctx
    }

    pub fn level(&self) -> Option<usize> {
        self.level
    }

    pub fn scope(&self) -> ComponentScope {
        scope_of(self.level)
    }

    pub fn monitor(&self) -> Option<&'a dyn IncrementalMonitor> {
        self.ctx.monitor
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    /// Cooperatively cancel all workers of this task
    pub fn stop(&self) {
        self.ctx.stop.stop();
    }

    /// Set reflexivity bit `kind` of `resource`; true if newly set
    pub fn check_reflexivity(&self, resource: ResourceId, kind: u8) -> bool {
        self.reflexivity.check(resource, kind)
    }

    /// Queue a fact that may have lost its support. Concurrent calls for the
    /// same fact enqueue it once.
    pub fn delete_tuple(&self, worker: usize, triple: &Triple) -> CwmResult<()> {
        let tuple = self.ctx.table.get_tuple_index(triple).ok_or_else(|| {
            CwmError::invariant_violation(
                "a derived fact is missing from the store; the rules do not seem to match the current data",
            )
            .with_context("fact", self.ctx.dictionary.display_triple(triple))
        })?;
        let is_new = self.ctx.state.add_global_flags(tuple, GF_DELETED_NEW)?;
        if is_new {
            self.ctx.state.delete_list().enqueue(tuple)?;
        }
        if let Some(monitor) = self.monitor() {
            monitor.tuple_derived(worker, triple, is_new);
        }
        Ok(())
    }

    fn process_previous_levels(&self, worker: usize) -> CwmResult<()> {
        if let Some(monitor) = self.monitor() {
            monitor.tuple_deletion_previous_levels_started(worker);
        }
        let ctx = &self.ctx;
        let state = ctx.state;
        let scope = self.scope();

        let positive = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
            let flags = state.global_flags(tuple);
            match role {
                LiteralRole::PositiveBeforePivot => in_i_minus_deleted(status, flags),
                _ => in_i(status),
            }
        };
        let eval = Evaluation::new(ctx.table, &positive).with_equality(ctx.equality_manager());
        loop {
            let tuple = state
                .delete_list()
                .dequeue_before(self.after_last_deleted_in_previous_levels);
            if tuple == 0 {
                break;
            }
            if state.global_flags(tuple) & (GF_ADDED | GF_DELETED) != GF_DELETED {
                continue;
            }
            let triple = self.triple(tuple)?;
            ctx.rules
                .apply_rules_to_positive_literal(&eval, tuple, &triple, scope, &mut |_, head| {
                    self.delete_tuple(worker, &head)
                })?;
        }

        if ctx.rules.has_rules_with_negation(scope) {
            let negative = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
                let flags = state.global_flags(tuple);
                match role {
                    LiteralRole::PositiveBeforePivot | LiteralRole::UnderlyingBeforePivot => {
                        in_i_minus_deleted(status, flags)
                    }
                    LiteralRole::NegativeSingleAtomBeforePivot => in_i_plus_added(status, flags),
                    LiteralRole::UnderlyingAfterPivot => in_i_minus_deleted_plus_added(status, flags),
                    _ => in_i(status),
                }
            };
            let eval = Evaluation::new(ctx.table, &negative).with_equality(ctx.equality_manager());
            loop {
                let tuple = state.added_list().dequeue();
                if tuple == 0 {
                    break;
                }
                if state.global_flags(tuple) & (GF_ADDED | GF_DELETED) != GF_ADDED {
                    continue;
                }
                let triple = self.triple(tuple)?;
                ctx.rules
                    .apply_rules_to_negation_literal(&eval, &triple, scope, &mut |_, head| {
                        self.delete_tuple(worker, &head)
                    })?;
            }
        }
        Ok(())
    }

    fn propagate_deletions<S: DeletionStrategy>(&self, worker: usize, strategy: &mut S) -> CwmResult<()> {
        if let Some(monitor) = self.monitor() {
            monitor.tuple_deletion_recursive_started(worker);
        }
        let ctx = &self.ctx;
        let state = ctx.state;
        let scope = self.scope();
        let recursive = ctx.rules.has_recursive_rules(scope);

        while self.is_running() {
            let tuple = state.delete_list().dequeue();
            if tuple == 0 {
                break;
            }
            let triple = self.triple(tuple)?;
            let flags = state.global_flags(tuple);
            debug_assert!(flags & (GF_DELETED_NEW | GF_DELETED) == GF_DELETED_NEW);
            if let Some(monitor) = self.monitor() {
                monitor.possibly_deleted_tuple_extracted(worker, &triple);
            }

            let keep = strategy.check(self, worker, tuple, &triple)?;
            if !keep {
                if let Some(monitor) = self.monitor() {
                    monitor.deletion_propagation_started(worker, &triple);
                }
                if let Some(equality) = ctx.equality_manager() {
                    if is_same_as(&triple) && triple[0] == triple[2] && !equality.is_singleton(triple[0]) {
                        self.delete_replacements(worker, triple[0])?;
                    }
                    for resource in triple {
                        if self.check_reflexivity(resource, 0) {
                            self.delete_tuple(worker, &same_as(resource, resource))?;
                        }
                    }
                }
                if recursive {
                    let current = tuple;
                    let filter = move |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
                        let flags = state.global_flags(tuple);
                        match role {
                            LiteralRole::PositiveBeforePivot => {
                                tuple != current && in_i_minus_deleted(status, flags)
                            }
                            LiteralRole::PositiveAfterPivot => in_i_minus_deleted(status, flags),
                            _ => in_i_plus_added(status, flags),
                        }
                    };
                    let eval = Evaluation::new(ctx.table, &filter).with_equality(ctx.equality_manager());
                    ctx.rules
                        .apply_rules_to_positive_literal(&eval, tuple, &triple, scope, &mut |_, head| {
                            self.delete_tuple(worker, &head)
                        })?;
                }
                state.add_global_flags(tuple, GF_DELETED)?;
                if let Some(monitor) = self.monitor() {
                    monitor.deletion_propagation_finished(worker);
                }
            }
            if let Some(monitor) = self.monitor() {
                monitor.possibly_deleted_tuple_processed(worker, &triple, !keep);
            }
        }

        if let Some(monitor) = self.monitor() {
            monitor.tuple_deletion_finished(worker);
        }
        Ok(())
    }

    /// Once `x sameAs x` is gone, every fact mentioning `x` may have been
    /// derived by replacing another member of its class.
    fn delete_replacements(&self, worker: usize, resource: ResourceId) -> CwmResult<()> {
        let ctx = &self.ctx;
        for tuple in ctx.table.tuples_mentioning(resource) {
            if !in_i(ctx.table.get_tuple_status(tuple)) {
                continue;
            }
            if ctx.state.add_global_flags(tuple, GF_DELETED_NEW)? {
                ctx.state.delete_list().enqueue(tuple)?;
                if let Some(monitor) = self.monitor() {
                    monitor.propagated_deletion_via_replacement(worker, &self.triple(tuple)?);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn triple(&self, tuple: TupleIndex) -> CwmResult<Triple> {
        self.ctx
            .table
            .triple(tuple)
            .ok_or_else(|| CwmError::invariant_violation(format!("tuple {} is not in the store", tuple)))
    }

    /// Run both phases on one worker
    pub fn run_worker<S: DeletionStrategy>(
        &self,
        worker: usize,
        strategy: &mut S,
        barrier: &Barrier,
    ) -> CwmResult<()> {
        let previous = if self.process_previous_levels {
            self.process_previous_levels(worker)
        } else {
            Ok(())
        };
        if previous.is_err() {
            self.stop();
        }
        barrier.wait();
        previous?;

        self.propagate_deletions(worker, strategy).inspect_err(|_| self.stop())
    }

    /// Run the task on one worker per strategy instance, or on the first one
    /// only for single-threaded strategies
    pub fn run<S: DeletionStrategy + Send>(&self, pool: &WorkerPool, strategies: &mut [S]) -> CwmResult<()> {
        let workers = if S::MULTITHREADED { strategies.len() } else { 1 };
        let slots: Vec<Mutex<&mut S>> = strategies.iter_mut().take(workers).map(Mutex::new).collect();
        if slots.is_empty() {
            return Err(CwmError::internal("deletion task started without a strategy"));
        }
        pool.run(slots.len(), |worker, barrier| {
            let mut strategy = slots[worker].lock();
            self.run_worker(worker, &mut **strategy, barrier)
        })
    }
}
