//! From-scratch materialization
//!
//! Saturates the base facts under the rules level by level with a naive
//! fixpoint. Incremental updates start from the result.

use tracing::{debug, info};

use crate::equality::merge_direction;
use crate::error::CwmResult;
use crate::rules::{BodyLiteralInfo, ComponentScope, Evaluation, LiteralRole};
use crate::store::{TupleIndex, TupleStatus, TUPLE_STATUS_EDB, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED};
use crate::term::{is_same_as, same_as, Triple, OWL_NOTHING_ID, RDF_TYPE_ID};

use super::state::in_i;
use super::{scope_of, MaintenanceContext};

/// Add `triple` to the materialization in normal form. Returns whether it is new.
fn add_derived(ctx: &MaintenanceContext<'_>, triple: &Triple) -> bool {
    match ctx.equality_manager() {
        Some(em) => {
            let (normal, changed) = em.normalize_triple(triple);
            if changed {
                let (_, index) = ctx.table.add_tuple(triple, 0);
                ctx.table.delete_add_status(index, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED);
            }
            let (_, index) = ctx.table.add_tuple(&normal, 0);
            ctx.table.delete_add_status(index, TUPLE_STATUS_IDB_MERGED, TUPLE_STATUS_IDB)
        }
        None => ctx.table.add_tuple(triple, TUPLE_STATUS_IDB).0,
    }
}

/// Apply every rule of `scope` once. Returns whether anything was derived.
fn apply_rules_once(ctx: &MaintenanceContext<'_>, scope: ComponentScope) -> CwmResult<bool> {
    let filter = |_: LiteralRole, _: &BodyLiteralInfo, _: TupleIndex, status: TupleStatus| in_i(status);
    let eval = Evaluation::new(ctx.table, &filter).with_equality(ctx.equality_manager());
    let mut derived = false;
    for rule in (0..ctx.rules.len()).filter(|&r| scope.includes(ctx.rules.rule(r).level())) {
        let mut heads = Vec::new();
        ctx.rules.evaluate_rule(&eval, rule, &mut |_, head| {
            heads.push(head);
            Ok(())
        })?;
        for head in heads {
            derived |= add_derived(ctx, &head);
        }
    }
    Ok(derived)
}

/// Merge the classes of every `a sameAs b`, add reflexive equalities and
/// renormalize facts mentioning absorbed resources. Returns whether the
/// materialization changed.
fn apply_equality(ctx: &MaintenanceContext<'_>) -> bool {
    let Some(em) = ctx.equality_manager() else {
        return false;
    };
    let mut changed = false;
    loop {
        let facts = ctx.table.select(in_i);
        let mut merged = false;
        for (_, triple) in &facts {
            for resource in *triple {
                changed |= add_derived(ctx, &same_as(resource, resource));
            }
            if !is_same_as(triple) || triple[0] == triple[2] {
                continue;
            }
            let (source, target, clash) =
                merge_direction(ctx.dictionary, ctx.mode.unique_name_assumption(), triple[0], triple[2]);
            if em.merge(source, target) {
                merged = true;
                if let Some(monitor) = ctx.monitor {
                    monitor.constant_merged(0, source, target);
                }
            }
            if clash {
                if let Some(monitor) = ctx.monitor {
                    monitor.inconsistency_detected(0, target);
                }
                changed |= add_derived(ctx, &[target, RDF_TYPE_ID, OWL_NOTHING_ID]);
            }
        }
        if !merged {
            return changed;
        }
        changed = true;
        for (_, triple) in ctx.table.select(in_i) {
            if !em.is_normal_triple(&triple) {
                add_derived(ctx, &triple);
            }
        }
    }
}

/// Compute the materialization of the asserted facts. Returns its size.
pub fn materialize(ctx: MaintenanceContext<'_>) -> CwmResult<usize> {
    for (_, triple) in ctx.table.select(|status| status & TUPLE_STATUS_EDB != 0) {
        add_derived(&ctx, &triple);
    }

    let levels: Vec<Option<usize>> = if ctx.mode.uses_levels() {
        (0..=ctx.rules.max_component_level()).map(Some).collect()
    } else {
        vec![None]
    };
    for level in levels {
        let scope = scope_of(level);
        let mut rounds = 0;
        loop {
            rounds += 1;
            let derived = apply_rules_once(&ctx, scope)?;
            let equated = apply_equality(&ctx);
            if !derived && !equated {
                break;
            }
        }
        debug!(?level, rounds, "level saturated");
    }

    let size = ctx.table.materialized().len();
    info!(facts = size, "materialization computed");
    Ok(size)
}
