//! Delete and re-derive
//!
//! DRed confirms every fact reachable from a deleted one, then puts back the
//! over-deleted facts that still have a derivation from what remains.

use tracing::debug;

use crate::error::CwmResult;
use crate::rules::{BodyLiteralInfo, Evaluation, LiteralRole};
use crate::store::{TupleIndex, TupleStatus, TUPLE_STATUS_EDB};
use crate::term::Triple;

use super::deletion::{DeletionStrategy, DeletionTask};
use super::flags::{GF_ADDED_NEW, GF_DELETED};
use super::monitor::TaskKind;
use super::parallel::WorkerPool;
use super::state::{in_i_minus_deleted, in_i_plus_added};
use super::MaintenanceContext;

/// Over-deletes: no fact taken from the delete-list survives
#[derive(Debug, Default, Clone, Copy)]
pub struct DredStrategy;

impl DeletionStrategy for DredStrategy {
    const MULTITHREADED: bool = true;
    const REFLEXIVITY_BITS: u8 = 1;

    fn check(&mut self, _: &DeletionTask<'_>, _: usize, _: TupleIndex, _: &Triple) -> CwmResult<bool> {
        Ok(false)
    }
}

/// Run DRed deletion for one level
pub fn delete(ctx: MaintenanceContext<'_>, level: Option<usize>, pool: &WorkerPool) -> CwmResult<()> {
    let workers = pool.workers_for(DredStrategy::MULTITHREADED);
    if let Some(monitor) = ctx.monitor {
        monitor.task_started(TaskKind::Deletion, level, workers);
    }
    let task = DeletionTask::new(ctx, level, DredStrategy::REFLEXIVITY_BITS)?;
    let mut strategies = vec![DredStrategy; workers];
    task.run(pool, &mut strategies)?;
    if let Some(monitor) = ctx.monitor {
        monitor.task_finished(TaskKind::Deletion, level);
    }
    Ok(())
}

/// Put back deleted facts of this level that are still asserted or still
/// derivable from facts that were not deleted. Returns how many were put back.
pub fn rederive(ctx: MaintenanceContext<'_>, level: Option<usize>, pool: &WorkerPool) -> CwmResult<usize> {
    let state = ctx.state;
    let workers = pool.workers_for(true);
    if let Some(monitor) = ctx.monitor {
        monitor.task_started(TaskKind::Rederivation, level, workers);
    }
    state
        .delete_list()
        .reset_dequeue_position(state.delete_list_end_before(level));

    let filter = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
        let flags = state.global_flags(tuple);
        match role {
            LiteralRole::SupportingNegative => in_i_plus_added(status, flags),
            _ => in_i_minus_deleted(status, flags),
        }
    };
    let eval = Evaluation::new(ctx.table, &filter).with_equality(ctx.equality_manager());
    let rederived = std::sync::atomic::AtomicUsize::new(0);

    pool.run(workers, |worker, _| {
        if let Some(monitor) = ctx.monitor {
            monitor.rederivation_started(worker);
        }
        while ctx.is_running() {
            let tuple = state.delete_list().dequeue();
            if tuple == 0 {
                break;
            }
            if state.global_flags(tuple) & GF_DELETED == 0 {
                continue;
            }
            let Some((status, triple)) = ctx.table.get_status_and_tuple(tuple) else {
                continue;
            };
            let keep = status & TUPLE_STATUS_EDB != 0 || ctx.rules.is_derivable(&eval, &triple)?;
            if keep && state.add_global_flags(tuple, GF_ADDED_NEW)? {
                state.added_list().enqueue(tuple)?;
                rederived.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if let Some(monitor) = ctx.monitor {
                    monitor.tuple_rederived(worker, &triple);
                }
            }
        }
        Ok(())
    })?;

    let rederived = rederived.into_inner();
    debug!(?level, rederived, "rederivation finished");
    if let Some(monitor) = ctx.monitor {
        monitor.task_finished(TaskKind::Rederivation, level);
    }
    Ok(rederived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::flags::GF_DELETED_NEW;
    use crate::reasoner::parallel::ParallelConfig;
    use crate::reasoner::testing::Fixture;
    use crate::reasoner::ReasoningMode;

    #[test]
    fn test_overdeletes_then_rederives() {
        let mut fixture = Fixture::new(
            &[(1, "?x a B :- ?x a A"), (2, "?x a C :- ?x a B"), (2, "?x a C :- ?x a D")],
            &["1 a A", "1 a D"],
            ReasoningMode::default(),
        );
        let b = fixture.derive("1 a B");
        let c = fixture.derive("1 a C");
        let a = fixture.index("1 a A");
        fixture.state.initialize_global(Some(2));
        fixture.state.add_global_flags(a, GF_DELETED_NEW).unwrap();
        fixture.state.initially_deleted(0).enqueue(a).unwrap();
        // A(1) is retracted, so it is no longer EDB
        fixture.table.delete_add_status(a, TUPLE_STATUS_EDB, 0);

        let pool = WorkerPool::new(ParallelConfig::default().with_workers(3));
        let mut rederived = 0;
        for level in 0..=2 {
            fixture.state.initialize_current_level();
            delete(fixture.context(), Some(level), &pool).unwrap();
            rederived += rederive(fixture.context(), Some(level), &pool).unwrap();
            let end = fixture.state.delete_list().first_free_position();
            fixture.state.set_delete_list_end(level, end);
        }

        for tuple in [a, b, c] {
            assert_ne!(fixture.state.global_flags(tuple) & GF_DELETED, 0);
        }
        assert_eq!(rederived, 1);
        assert_ne!(fixture.state.global_flags(c) & GF_ADDED_NEW, 0);
        assert_eq!(fixture.state.global_flags(b) & GF_ADDED_NEW, 0);
    }

    #[test]
    fn test_strategy_never_keeps() {
        let mut fixture = Fixture::new(&[], &["x p y"], ReasoningMode::default());
        fixture.state.initialize_global(Some(0));
        let tuple = fixture.index("x p y");
        let task = DeletionTask::new(fixture.context(), Some(0), 1).unwrap();
        assert!(!DredStrategy.check(&task, 0, tuple, &[1, 2, 3]).unwrap());
    }
}
