//! Forward propagation of insertions
//!
//! One [`InsertionTask`] runs per level after deletion. Workers first fire
//! the level's rules on what changed at lower levels, then saturate the
//! added-list with the level's recursive rules. Facts are matched against
//! the materialization as it will be after the update, `(I\D)+A`.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::equality::merge_direction;
use crate::error::{CwmError, CwmResult};
use crate::rules::{BodyLiteralInfo, ComponentScope, Evaluation, LiteralRole};
use crate::store::{TupleIndex, TupleStatus, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED};
use crate::term::{is_same_as, same_as, ResourceId, Triple, OWL_NOTHING_ID, RDF_TYPE_ID};

use super::deletion::ReflexivityTracker;
use super::flags::{
    GF_ADDED, GF_ADDED_MERGED, GF_ADDED_NEW, GF_DELETED, LF_PROVED, LF_PROVED_MERGED,
};
use super::monitor::TaskKind;
use super::parallel::WorkerPool;
use super::state::{in_i, in_i_minus_deleted, in_i_minus_deleted_plus_added, in_i_plus_added};
use super::{scope_of, MaintenanceContext};

pub struct InsertionTask<'a> {
    ctx: MaintenanceContext<'a>,
    level: Option<usize>,
    process_previous_levels: bool,
    after_last_added_in_previous_levels: u64,
    reflexive: ReflexivityTracker,
    inserted: AtomicUsize,
}

impl<'a> InsertionTask<'a> {
    /// Queue the facts inserted at `level` and position the queue cursors
    pub fn new(ctx: MaintenanceContext<'a>, level: Option<usize>) -> CwmResult<Self> {
        let state = ctx.state;
        let scope = scope_of(level);
        if let Some(level) = level {
            state.added_list().append_unprocessed(state.initially_added(level))?;
        }
        state.added_list().reset_dequeue_position(0);
        if ctx.rules.has_rules_with_negation(scope) {
            state.delete_list().reset_dequeue_position(0);
        }
        Ok(Self {
            ctx,
            level,
            process_previous_levels: matches!(level, Some(l) if l > 0) && ctx.rules.has_rules(scope),
            after_last_added_in_previous_levels: state.added_list_end_before(level),
            reflexive: ReflexivityTracker::new(ctx.dictionary.max_resource_id(), 1),
            inserted: AtomicUsize::new(0),
        })
    }

    fn scope(&self) -> ComponentScope {
        scope_of(self.level)
    }

    fn triple(&self, tuple: TupleIndex) -> CwmResult<Triple> {
        self.ctx
            .table
            .triple(tuple)
            .ok_or_else(|| CwmError::invariant_violation(format!("tuple {} is not in the store", tuple)))
    }

    /// `(I\D)+A`, plus facts proved during deletion when equality is on
    fn in_ida(&self, tuple: TupleIndex, status: TupleStatus) -> bool {
        let state = self.ctx.state;
        let flags = state.global_flags(tuple);
        in_i_minus_deleted_plus_added(status, flags)
            || (self.ctx.mode.equality_enabled()
                && state.current_level_flags(tuple) & (LF_PROVED | LF_PROVED_MERGED) == LF_PROVED
                && flags & GF_ADDED_MERGED == 0)
    }

    /// Add a derived fact; under equality only normal facts are kept
    fn derive(&self, worker: usize, triple: &Triple) -> CwmResult<()> {
        let ctx = &self.ctx;
        let equality = ctx.equality_manager();
        if equality.is_some_and(|em| !em.is_normal_triple(triple)) {
            return Ok(());
        }
        let (_, tuple) = ctx.table.add_tuple(triple, 0);
        let is_new = ctx.state.add_global_flags(tuple, GF_ADDED_NEW)?;
        if is_new {
            ctx.state.added_list().enqueue(tuple)?;
        }
        if let Some(monitor) = ctx.monitor {
            monitor.tuple_derived(worker, triple, is_new);
        }
        if is_new && equality.is_some() && is_same_as(triple) && triple[0] != triple[2] {
            self.rewrite(worker, triple[0], triple[2])?;
        }
        Ok(())
    }

    /// The fact is replaced by its normal form
    fn mark_merged(&self, tuple: TupleIndex) -> CwmResult<bool> {
        let merged = self.ctx.state.add_global_flags(tuple, GF_ADDED_MERGED)?;
        if self.ctx.table.get_tuple_status(tuple) & TUPLE_STATUS_IDB != 0 {
            self.ctx
                .table
                .delete_add_status(tuple, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED);
        }
        Ok(merged)
    }

    /// Merge two resources in the steady equality manager and renormalize
    /// the facts and rules that mention the absorbed one
    fn rewrite(&self, worker: usize, first: ResourceId, second: ResourceId) -> CwmResult<()> {
        let ctx = &self.ctx;
        let equality = ctx.equality;
        let (source, target, clash) =
            merge_direction(ctx.dictionary, ctx.mode.unique_name_assumption(), first, second);

        if equality.merge(source, target) {
            if let Some(monitor) = ctx.monitor {
                monitor.constant_merged(worker, source, target);
            }
            for position in 0..3 {
                for tuple in ctx.table.tuples_with_resource_at(source, position) {
                    if !self.in_ida(tuple, ctx.table.get_tuple_status(tuple)) {
                        continue;
                    }
                    let (normal, changed) = equality.normalize_triple(&self.triple(tuple)?);
                    if changed && self.mark_merged(tuple)? {
                        self.derive(worker, &normal)?;
                    }
                }
            }

            let filter = |_: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
                self.in_ida(tuple, status)
            };
            let eval = Evaluation::new(ctx.table, &filter).with_equality(Some(equality));
            for rule in ctx.rules.rules_mentioning(source, self.scope(), Some(equality)) {
                ctx.rules
                    .evaluate_rule(&eval, rule, &mut |_, head| self.derive(worker, &head))?;
            }
        }

        if clash {
            if let Some(monitor) = ctx.monitor {
                monitor.inconsistency_detected(worker, target);
            }
            let nothing = [
                equality.normalize(target),
                equality.normalize(RDF_TYPE_ID),
                equality.normalize(OWL_NOTHING_ID),
            ];
            self.derive(worker, &nothing)?;
        }
        Ok(())
    }

    /// Fire this level's rules on facts added at lower levels
    fn apply_previous_level_rules_positive(&self, worker: usize) -> CwmResult<()> {
        let ctx = &self.ctx;
        let state = ctx.state;
        let filter = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| match role {
            LiteralRole::PositiveBeforePivot => in_i_minus_deleted(status, state.global_flags(tuple)),
            _ => self.in_ida(tuple, status),
        };
        let eval = Evaluation::new(ctx.table, &filter).with_equality(ctx.equality_manager());
        while ctx.is_running() {
            let tuple = state
                .added_list()
                .dequeue_before(self.after_last_added_in_previous_levels);
            if tuple == 0 {
                break;
            }
            if state.global_flags(tuple) & (GF_ADDED | GF_ADDED_MERGED | GF_DELETED) != GF_ADDED {
                continue;
            }
            let triple = self.triple(tuple)?;
            ctx.rules
                .apply_rules_to_positive_literal(&eval, tuple, &triple, self.scope(), &mut |_, head| {
                    self.derive(worker, &head)
                })?;
        }
        Ok(())
    }

    /// Fire this level's rules whose negated atoms lost a match at lower levels
    fn apply_previous_level_rules_negative(&self, worker: usize) -> CwmResult<()> {
        let ctx = &self.ctx;
        let state = ctx.state;
        let filter = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
            let flags = state.global_flags(tuple);
            match role {
                LiteralRole::PositiveBeforePivot | LiteralRole::UnderlyingBeforePivot => {
                    in_i_minus_deleted(status, flags)
                }
                LiteralRole::NegativeSingleAtomBeforePivot => in_i_plus_added(status, flags),
                LiteralRole::UnderlyingAfterPivot => in_i(status),
                _ => self.in_ida(tuple, status),
            }
        };
        let eval = Evaluation::new(ctx.table, &filter).with_equality(ctx.equality_manager());
        while ctx.is_running() {
            let tuple = state.delete_list().dequeue();
            if tuple == 0 {
                break;
            }
            if state.global_flags(tuple) & (GF_ADDED | GF_ADDED_MERGED | GF_DELETED) != GF_DELETED {
                continue;
            }
            let triple = self.triple(tuple)?;
            ctx.rules
                .apply_rules_to_negation_literal(&eval, &triple, self.scope(), &mut |_, head| {
                    self.derive(worker, &head)
                })?;
        }
        Ok(())
    }

    fn apply_recursive_rules(&self, worker: usize) -> CwmResult<()> {
        let ctx = &self.ctx;
        let state = ctx.state;
        let equality = ctx.equality_manager();
        let recursive = ctx.rules.has_recursive_rules(self.scope());

        while ctx.is_running() {
            let current = state.added_list().dequeue();
            if current == 0 {
                break;
            }
            let Some((status, triple)) = ctx.table.get_status_and_tuple(current) else {
                continue;
            };
            if self.in_ida(current, status) {
                continue;
            }

            if let Some(em) = equality {
                let (normal, changed) = em.normalize_triple(&triple);
                if changed {
                    self.mark_merged(current)?;
                    self.derive(worker, &normal)?;
                    continue;
                }
            }

            if state.add_global_flags(current, GF_ADDED)? {
                self.inserted.fetch_add(1, Ordering::Relaxed);
                if let Some(monitor) = ctx.monitor {
                    monitor.tuple_inserted(worker, &triple);
                }
            }
            if equality.is_some() && is_same_as(&triple) && triple[0] != triple[2] {
                self.rewrite(worker, triple[0], triple[2])?;
                continue;
            }
            if equality.is_some() {
                for resource in triple {
                    if self.reflexive.check(resource, 0) {
                        self.derive(worker, &same_as(resource, resource))?;
                    }
                }
            }
            if recursive {
                let filter = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| match role {
                    LiteralRole::PositiveBeforePivot => tuple != current && self.in_ida(tuple, status),
                    _ => self.in_ida(tuple, status),
                };
                let eval = Evaluation::new(ctx.table, &filter).with_equality(equality);
                ctx.rules
                    .apply_rules_to_positive_literal(&eval, current, &triple, self.scope(), &mut |_, head| {
                        self.derive(worker, &head)
                    })?;
            }
        }
        Ok(())
    }

    fn run_worker(&self, worker: usize) -> CwmResult<()> {
        let monitor = self.ctx.monitor;
        if let Some(monitor) = monitor {
            monitor.insertion_previous_levels_started(worker);
        }
        if self.process_previous_levels {
            self.apply_previous_level_rules_positive(worker)?;
            if self.ctx.rules.has_rules_with_negation(self.scope()) {
                self.apply_previous_level_rules_negative(worker)?;
            }
        }
        if let Some(monitor) = monitor {
            monitor.insertion_recursive_started(worker);
        }
        self.apply_recursive_rules(worker)?;
        if let Some(monitor) = monitor {
            monitor.insertion_finished(worker);
        }
        Ok(())
    }

    /// Run the task; equality forces a single worker. Returns how many facts
    /// were newly added.
    pub fn run(&self, pool: &WorkerPool) -> CwmResult<usize> {
        let workers = pool.workers_for(!self.ctx.mode.equality_enabled());
        if let Some(monitor) = self.ctx.monitor {
            monitor.task_started(TaskKind::Insertion, self.level, workers);
        }
        pool.run(workers, |worker, _| {
            self.run_worker(worker).inspect_err(|_| self.ctx.stop.stop())
        })?;
        let inserted = self.inserted.load(Ordering::Relaxed);
        debug!(level = ?self.level, inserted, "insertion finished");
        if let Some(monitor) = self.ctx.monitor {
            monitor.task_finished(TaskKind::Insertion, self.level);
        }
        Ok(inserted)
    }
}

/// Run insertion for one level
pub fn insert(ctx: MaintenanceContext<'_>, level: Option<usize>, pool: &WorkerPool) -> CwmResult<usize> {
    InsertionTask::new(ctx, level)?.run(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EqualityMode;
    use crate::reasoner::parallel::ParallelConfig;
    use crate::reasoner::testing::Fixture;
    use crate::reasoner::ReasoningMode;
    use crate::store::TUPLE_STATUS_EDB;

    fn assert_fact(fixture: &mut Fixture, fact: &str) -> TupleIndex {
        let triple = fixture.triple(fact);
        let (_, tuple) = fixture.table.add_tuple(&triple, TUPLE_STATUS_EDB);
        fixture.state.add_global_flags(tuple, GF_ADDED_NEW).unwrap();
        tuple
    }

    fn added(fixture: &mut Fixture, fact: &str) -> bool {
        let triple = fixture.triple(fact);
        fixture
            .table
            .get_tuple_index(&triple)
            .is_some_and(|tuple| fixture.state.global_flags(tuple) & GF_ADDED != 0)
    }

    #[test]
    fn test_transitive_closure_is_saturated() {
        let mut fixture = Fixture::new(
            &[(0, "?x p ?z :- ?x p ?y , ?y p ?z")],
            &[],
            ReasoningMode::new(EqualityMode::Off, false),
        );
        fixture.state.initialize_global(None);
        for fact in ["a p b", "b p c", "c p d"] {
            let tuple = assert_fact(&mut fixture, fact);
            fixture.state.added_list().enqueue(tuple).unwrap();
        }

        let pool = WorkerPool::new(ParallelConfig::default().with_workers(3));
        let inserted = insert(fixture.context(), None, &pool).unwrap();

        assert_eq!(inserted, 6);
        for fact in ["a p c", "b p d", "a p d"] {
            assert!(added(&mut fixture, fact), "{} missing", fact);
        }
    }

    #[test]
    fn test_existing_facts_are_not_reinserted() {
        let mut fixture = Fixture::new(&[(0, "?x a B :- ?x a A")], &["1 a B"], ReasoningMode::default());
        fixture.state.initialize_global(Some(0));
        let tuple = assert_fact(&mut fixture, "1 a A");
        fixture.state.initially_added(0).enqueue(tuple).unwrap();

        let inserted = insert(fixture.context(), Some(0), &WorkerPool::default()).unwrap();
        assert_eq!(inserted, 1);
        assert!(added(&mut fixture, "1 a A"));
        assert!(!added(&mut fixture, "1 a B"));
    }

    #[test]
    fn test_levels_fire_on_lower_level_additions() {
        let mut fixture = Fixture::new(
            &[(1, "?x a B :- ?x a A"), (2, "?x a C :- ?x a B")],
            &[],
            ReasoningMode::default(),
        );
        fixture.state.initialize_global(Some(2));
        let tuple = assert_fact(&mut fixture, "1 a A");
        fixture.state.initially_added(0).enqueue(tuple).unwrap();

        let pool = WorkerPool::new(ParallelConfig::default().with_workers(2));
        for level in 0..=2 {
            fixture.state.initialize_current_level();
            insert(fixture.context(), Some(level), &pool).unwrap();
            let end = fixture.state.added_list().first_free_position();
            fixture.state.set_added_list_end(level, end);
        }
        assert!(added(&mut fixture, "1 a B"));
        assert!(added(&mut fixture, "1 a C"));
    }

    #[test]
    fn test_negation_fires_when_blocker_is_deleted() {
        let mut fixture = Fixture::new(
            &[(1, "?x a C :- ?x a A , not ?x a B")],
            &["1 a A", "1 a B"],
            ReasoningMode::default(),
        );
        fixture.state.initialize_global(Some(1));
        let blocker = fixture.index("1 a B");
        fixture.state.add_global_flags(blocker, GF_DELETED).unwrap();
        fixture.state.delete_list().enqueue(blocker).unwrap();
        fixture.state.set_delete_list_end(0, 1);

        fixture.state.initialize_current_level();
        insert(fixture.context(), Some(1), &WorkerPool::default()).unwrap();
        assert!(added(&mut fixture, "1 a C"));
    }

    #[test]
    fn test_inserted_same_as_merges_classes() {
        let mut fixture = Fixture::new(
            &[(0, "?x a Person :- ?x knows ?y")],
            &["bob knows carol"],
            ReasoningMode::new(EqualityMode::NoUna, false),
        );
        fixture.state.initialize_global(None);
        let tuple = assert_fact(&mut fixture, "_:b sameAs bob");
        fixture.state.added_list().enqueue(tuple).unwrap();
        let blank = fixture.resource("_:b");
        let bob = fixture.resource("bob");

        insert(fixture.context(), None, &WorkerPool::default()).unwrap();

        assert_eq!(fixture.equality.normalize(blank), bob);
        assert!(added(&mut fixture, "bob sameAs bob"));
        let merged = fixture.index("_:b sameAs bob");
        assert_ne!(fixture.state.global_flags(merged) & GF_ADDED_MERGED, 0);
    }
}
