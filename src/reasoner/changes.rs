//! Seeding an update and writing its outcome back to the store
//!
//! Retractions and assertions become the first entries of the delete-list
//! and added-list. Once every level is processed, `propagate` turns the
//! flags of the transaction into status bits of the triple table.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::equality::EqualityManager;
use crate::error::CwmResult;
use crate::store::{TupleIndex, TUPLE_STATUS_EDB, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED};
use crate::term::{Triple, OWL_SAME_AS_ID};

use super::flags::{GF_ADDED, GF_ADDED_MERGED, GF_ADDED_NEW, GF_DELETED, GF_DELETED_NEW, LF_PROVED};
use super::parallel::WorkerPool;
use super::state::in_i;
use super::MaintenanceContext;

/// How the retractions of an update were taken in
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeededDeletions {
    pub seeded: usize,
    pub ignored: usize,
}

/// Facts whose status bits changed while propagating
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PropagatedChanges {
    pub deleted: usize,
    pub added: usize,
}

/// Retract base facts. Only facts currently asserted are seeded; under
/// equality their normal form is what gets deleted.
pub fn initialize_deleted(ctx: MaintenanceContext<'_>, deletions: &[Triple]) -> CwmResult<SeededDeletions> {
    let mut seeded = SeededDeletions::default();
    for triple in deletions {
        let Some(mut tuple) = ctx.table.get_tuple_index(triple) else {
            seeded.ignored += 1;
            continue;
        };
        if !ctx.table.delete_add_status(tuple, TUPLE_STATUS_EDB, 0) {
            seeded.ignored += 1;
            continue;
        }
        let mut deleted = *triple;
        if let Some(em) = ctx.equality_manager() {
            let (normal, changed) = em.normalize_triple(triple);
            if changed {
                tuple = ctx.table.add_tuple(&normal, 0).1;
                deleted = normal;
            }
        }
        if ctx.state.add_global_flags(tuple, GF_DELETED_NEW)? {
            if ctx.mode.uses_levels() {
                let level = ctx.rules.component_level(&deleted);
                ctx.state.initially_deleted(level).enqueue(tuple)?;
            } else {
                ctx.state.delete_list().enqueue(tuple)?;
            }
        }
        seeded.seeded += 1;
    }
    debug!(seeded = seeded.seeded, ignored = seeded.ignored, "retractions seeded");
    Ok(seeded)
}

/// Assert base facts. Returns how many were not asserted before.
pub fn initialize_inserted(ctx: MaintenanceContext<'_>, insertions: &[Triple]) -> CwmResult<usize> {
    let mut inserted = 0;
    for triple in insertions {
        let (changed, tuple) = ctx.table.add_tuple(triple, TUPLE_STATUS_EDB);
        if !changed {
            continue;
        }
        inserted += 1;
        if ctx.state.add_global_flags(tuple, GF_ADDED_NEW)? {
            if ctx.mode.uses_levels() {
                let level = ctx.rules.component_level(triple);
                ctx.state.initially_added(level).enqueue(tuple)?;
            } else {
                ctx.state.added_list().enqueue(tuple)?;
            }
        }
    }
    debug!(inserted, "assertions seeded");
    Ok(inserted)
}

/// Shrink the steady equivalence classes of deleted `x sameAs x` facts to
/// what the proving manager could still show.
///
/// A reflexive fact that was proved keeps its class: every equality in it
/// was proved again, and only the order of the merges may differ.
pub fn copy_classes(ctx: MaintenanceContext<'_>, proving: &EqualityManager) -> usize {
    let state = ctx.state;
    state.delete_list().reset_dequeue_position(0);
    let mut copied = 0;
    while ctx.is_running() {
        let tuple = state.delete_list().dequeue();
        if tuple == 0 {
            break;
        }
        let Some(triple) = ctx.table.triple(tuple) else {
            continue;
        };
        if triple[1] != OWL_SAME_AS_ID || state.global_flags(tuple) & GF_DELETED == 0 {
            continue;
        }
        if let Some(monitor) = ctx.monitor {
            monitor.equivalence_class_copied(triple[0]);
        }
        ctx.equality.copy_equivalence_class(triple[0], proving);
        copied += 1;
    }
    copied
}

/// Move a surviving fact to its normal form if a copied class gave one of
/// its resources a new representative. Returns the normal form if it is new
/// to the materialization.
fn renormalize(ctx: &MaintenanceContext<'_>, em: &EqualityManager, tuple: TupleIndex) -> Option<Triple> {
    let table = ctx.table;
    if !in_i(table.get_tuple_status(tuple)) {
        return None;
    }
    let (normal, changed) = em.normalize_triple(&table.triple(tuple)?);
    if !changed || !table.delete_add_status(tuple, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED) {
        return None;
    }
    let (_, index) = table.add_tuple(&normal, 0);
    table
        .delete_add_status(index, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB)
        .then_some(normal)
}

/// Write deletions and additions of every level back to the status bits
pub fn propagate(ctx: MaintenanceContext<'_>, pool: &WorkerPool) -> CwmResult<PropagatedChanges> {
    let state = ctx.state;
    let table = ctx.table;
    let levels = state.level_count();
    state.delete_list().reset_dequeue_position(0);
    state.proved_list().reset_dequeue_position(0);
    state.added_list().reset_dequeue_position(0);
    if let Some(monitor) = ctx.monitor {
        monitor.propagate_started();
    }

    let deleted = AtomicUsize::new(0);
    let added = AtomicUsize::new(0);
    let show = |tuple| table.triple(tuple).unwrap_or_default();

    pool.run(pool.workers_for(true), |_, _| {
        for level in 0..levels {
            let end = state.delete_list_end(level);
            while ctx.is_running() {
                let tuple = state.delete_list().dequeue_before(end);
                if tuple == 0 {
                    break;
                }
                if state.global_flags(tuple) & (GF_DELETED | GF_ADDED) != GF_DELETED {
                    if let Some(normal) = ctx.equality_manager().and_then(|em| renormalize(&ctx, em, tuple)) {
                        added.fetch_add(1, Ordering::Relaxed);
                        if let Some(monitor) = ctx.monitor {
                            monitor.tuple_added(&normal);
                        }
                    }
                    continue;
                }
                if table.delete_add_status(tuple, TUPLE_STATUS_IDB | TUPLE_STATUS_IDB_MERGED, 0) {
                    deleted.fetch_add(1, Ordering::Relaxed);
                    if let Some(monitor) = ctx.monitor {
                        monitor.tuple_deleted(&show(tuple));
                    }
                }
            }

            if let Some(em) = ctx.equality_manager() {
                while ctx.is_running() {
                    let tuple = state.proved_list().dequeue();
                    if tuple == 0 {
                        break;
                    }
                    if state.current_level_flags(tuple) & LF_PROVED == 0
                        || state.global_flags(tuple) & GF_ADDED_MERGED != 0
                    {
                        continue;
                    }
                    let triple = show(tuple);
                    let (normal, changed) = em.normalize_triple(&triple);
                    let (is_new, target) = if changed {
                        let (_, index) = table.add_tuple(&normal, 0);
                        (table.delete_add_status(index, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB), normal)
                    } else {
                        (table.delete_add_status(tuple, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB), triple)
                    };
                    if is_new {
                        added.fetch_add(1, Ordering::Relaxed);
                        if let Some(monitor) = ctx.monitor {
                            monitor.tuple_added(&target);
                        }
                    }
                }
            }

            let end = state.added_list_end(level);
            while ctx.is_running() {
                let tuple = state.added_list().dequeue_before(end);
                if tuple == 0 {
                    break;
                }
                if state.global_flags(tuple) & (GF_DELETED | GF_ADDED | GF_ADDED_MERGED) != GF_ADDED {
                    continue;
                }
                if table.delete_add_status(tuple, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB) {
                    added.fetch_add(1, Ordering::Relaxed);
                    if let Some(monitor) = ctx.monitor {
                        monitor.tuple_added(&show(tuple));
                    }
                }
            }
        }
        Ok(())
    })?;

    let changes = PropagatedChanges {
        deleted: deleted.into_inner(),
        added: added.into_inner(),
    };
    debug!(deleted = changes.deleted, added = changes.added, "changes propagated");
    if let Some(monitor) = ctx.monitor {
        monitor.propagate_finished();
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EqualityMode;
    use crate::reasoner::parallel::ParallelConfig;
    use crate::reasoner::testing::Fixture;
    use crate::reasoner::ReasoningMode;

    #[test]
    fn test_initialize_deleted_ignores_absent_and_derived() {
        let mut fixture = Fixture::new(&[(1, "?x a B :- ?x a A")], &["1 a A"], ReasoningMode::default());
        let derived = fixture.derive("1 a B");
        fixture.state.initialize_global(Some(1));
        let retractions = [
            fixture.triple("1 a A"),
            fixture.triple("1 a B"),
            fixture.triple("2 a A"),
        ];

        let seeded = initialize_deleted(fixture.context(), &retractions).unwrap();
        assert_eq!(seeded, SeededDeletions { seeded: 1, ignored: 2 });

        let asserted = fixture.index("1 a A");
        assert_eq!(fixture.table.get_tuple_status(asserted) & TUPLE_STATUS_EDB, 0);
        assert_eq!(fixture.state.initially_deleted(0).dequeue(), asserted);
        assert_eq!(fixture.state.global_flags(derived), 0);
    }

    #[test]
    fn test_initialize_deleted_normalizes_under_equality() {
        let mut fixture = Fixture::new(&[], &["_:b p o"], ReasoningMode::new(EqualityMode::NoUna, false));
        let blank = fixture.resource("_:b");
        let s = fixture.resource("s");
        fixture.equality.merge(blank, s);
        fixture.derive("s p o");
        fixture.state.initialize_global(None);

        let retraction = [fixture.triple("_:b p o")];
        initialize_deleted(fixture.context(), &retraction).unwrap();

        let normal = fixture.index("s p o");
        assert_eq!(fixture.state.delete_list().dequeue(), normal);
        assert_ne!(fixture.state.global_flags(normal) & GF_DELETED_NEW, 0);
    }

    #[test]
    fn test_initialize_inserted_queues_by_component_level() {
        let mut fixture = Fixture::new(&[(2, "?x a B :- ?x a A")], &["1 a A"], ReasoningMode::default());
        fixture.state.initialize_global(Some(2));
        let assertions = [fixture.triple("1 a A"), fixture.triple("2 a A"), fixture.triple("2 a B")];

        let inserted = initialize_inserted(fixture.context(), &assertions).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(fixture.state.initially_added(0).dequeue(), fixture.index("2 a A"));
        assert_eq!(fixture.state.initially_added(2).dequeue(), fixture.index("2 a B"));
    }

    #[test]
    fn test_propagate_writes_status_bits() {
        let mut fixture = Fixture::new(&[], &["1 a A", "1 a B"], ReasoningMode::default());
        let gone = fixture.index("1 a A");
        let restored = fixture.index("1 a B");
        let new: TupleIndex = fixture.derive("1 a C");
        fixture.table.delete_add_status(new, TUPLE_STATUS_IDB, 0);
        fixture.state.initialize_global(Some(0));

        for tuple in [gone, restored] {
            fixture.state.add_global_flags(tuple, GF_DELETED).unwrap();
            fixture.state.delete_list().enqueue(tuple).unwrap();
        }
        fixture.state.add_global_flags(restored, GF_ADDED).unwrap();
        fixture.state.add_global_flags(new, GF_ADDED).unwrap();
        fixture.state.added_list().enqueue(new).unwrap();
        fixture.state.set_delete_list_end(0, 2);
        fixture.state.set_added_list_end(0, 1);

        let pool = WorkerPool::new(ParallelConfig::default().with_workers(2));
        let changes = propagate(fixture.context(), &pool).unwrap();

        assert_eq!(changes, PropagatedChanges { deleted: 1, added: 1 });
        assert_eq!(fixture.table.get_tuple_status(gone) & TUPLE_STATUS_IDB, 0);
        assert_ne!(fixture.table.get_tuple_status(restored) & TUPLE_STATUS_IDB, 0);
        assert_ne!(fixture.table.get_tuple_status(new) & TUPLE_STATUS_IDB, 0);
    }

    #[test]
    fn test_copy_classes_restores_proving_classes() {
        let mut fixture = Fixture::new(&[], &[], ReasoningMode::new(EqualityMode::NoUna, false));
        let a = fixture.resource("a");
        let b = fixture.resource("b");
        fixture.equality.merge(b, a);
        let reflexive = fixture.derive("a sameAs a");
        fixture.state.initialize_global(None);
        fixture.state.add_global_flags(reflexive, GF_DELETED).unwrap();
        fixture.state.delete_list().enqueue(reflexive).unwrap();

        let proving = EqualityManager::new();
        assert_eq!(copy_classes(fixture.context(), &proving), 1);
        assert_eq!(fixture.equality.normalize(b), b);
        assert_eq!(fixture.equality.normalize(a), a);
    }

    #[test]
    fn test_copy_classes_keeps_proved_classes() {
        let mut fixture = Fixture::new(&[], &[], ReasoningMode::new(EqualityMode::NoUna, false));
        let a = fixture.resource("a");
        let b = fixture.resource("b");
        fixture.equality.merge(a, b);
        let reflexive = fixture.derive("b sameAs b");
        fixture.state.initialize_global(None);
        fixture.state.add_global_flags(reflexive, GF_DELETED_NEW).unwrap();
        fixture.state.delete_list().enqueue(reflexive).unwrap();

        // proved again, merged the other way round
        let proving = EqualityManager::new();
        proving.merge(b, a);
        assert_eq!(copy_classes(fixture.context(), &proving), 0);
        assert_eq!(fixture.equality.normalize(a), b);
    }

    #[test]
    fn test_propagate_renormalizes_surviving_facts() {
        let mut fixture = Fixture::new(&[], &[], ReasoningMode::new(EqualityMode::NoUna, false));
        let a = fixture.resource("a");
        let b = fixture.resource("b");
        fixture.equality.merge(b, a);
        let stale = fixture.derive("b p b");
        fixture.state.initialize_global(None);
        fixture.state.add_global_flags(stale, GF_DELETED_NEW).unwrap();
        fixture.state.delete_list().enqueue(stale).unwrap();
        fixture.state.set_delete_list_end(0, 1);

        let changes = propagate(fixture.context(), &WorkerPool::default()).unwrap();

        assert_eq!(changes, PropagatedChanges { deleted: 0, added: 1 });
        assert_ne!(fixture.table.get_tuple_status(stale) & TUPLE_STATUS_IDB_MERGED, 0);
        let normal = fixture.index("a p a");
        assert_ne!(fixture.table.get_tuple_status(normal) & TUPLE_STATUS_IDB, 0);
    }
}
