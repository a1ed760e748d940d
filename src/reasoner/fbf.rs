//! Forward/backward/forward deletion
//!
//! Before a fact taken from the delete-list is given up, FBF looks backward
//! for a proof of it from facts that still hold, and forward-chains every
//! proof it finds so that later checks can reuse it. Proved facts live in
//! the current-level flags; facts whose search failed are marked
//! `GF_DISPROVED` so that no later check repeats the work.
//!
//! The backward search walks rule instances depth-first. Recursion can get
//! as deep as the longest derivation chain, so it runs on an explicit stack
//! of [`StackFrame`]s instead of the call stack. Every frame records in its
//! [`ReturnAddress`] where the search continues once a nested check returns.
//!
//! With equality, proofs are normalized by a separate *proving* equality
//! manager that only knows the equalities proved so far. A fact of the
//! materialization stands for every fact obtained by replacing its
//! resources with members of their classes, and it only survives if all
//! of those were proved.

use tracing::debug;

use crate::equality::{merge_direction, EqualityManager};
use crate::error::CwmResult;
use crate::rules::{BodyLiteralInfo, Evaluation, HeadAtomRef, LiteralRole, MatchedFact};
use crate::store::{TupleIndex, TupleStatus, TUPLE_STATUS_EDB};
use crate::term::{is_same_as, same_as, ResourceId, Triple, OWL_NOTHING_ID, RDF_TYPE_ID};

use super::deletion::{DeletionStrategy, DeletionTask};
use super::flags::{
    GF_ADDED, GF_DISPROVED, GF_NORM_PROVED, LF_CHECKED, LF_DELAYED, LF_PROVED, LF_PROVED_MERGED,
    LF_PROVED_NEW,
};
use super::monitor::TaskKind;
use super::parallel::WorkerPool;
use super::state::{in_i, in_i_plus_added, IncrementalReasoningState};
use super::MaintenanceContext;

/// Outcome of recording a proved fact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddResult {
    AlreadyExists,
    Added,
    AlreadyDelayed,
    Delayed,
}

/// Where a frame continues after a nested check returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReturnAddress {
    /// Instances of `x sameAs x :- x p o` and friends
    Reflexivity,
    /// Instances replacing a resource by another member of its class
    Replacement,
    /// Instances of recursive rules
    RecursiveRule,
    #[default]
    Return,
}

#[derive(Debug, Default)]
struct StackFrame {
    tuple: TupleIndex,
    triple: Triple,
    resume: ReturnAddress,
    proved: bool,
    position: usize,
    candidates: Vec<TupleIndex>,
    next_candidate: usize,
    pattern: usize,
    heads: Vec<HeadAtomRef>,
    next_head: usize,
    rule: usize,
    instances: Vec<Vec<MatchedFact>>,
    next_instance: usize,
    next_body: usize,
}

impl StackFrame {
    fn reset(&mut self, tuple: TupleIndex, triple: Triple, resume: ReturnAddress) {
        self.tuple = tuple;
        self.triple = triple;
        self.resume = resume;
        self.proved = false;
        self.position = 0;
        self.candidates.clear();
        self.next_candidate = 0;
        self.pattern = 0;
        self.heads.clear();
        self.next_head = 0;
        self.rule = 0;
        self.instances.clear();
        self.next_instance = 0;
        self.next_body = 0;
    }

    fn finish(&mut self, proved: bool) {
        self.resume = ReturnAddress::Return;
        self.proved = proved;
    }
}

enum Advance {
    Call(TupleIndex, Triple),
    Return(bool),
}

/// Every fact obtained by replacing the resources of `triple` with members
/// of their classes; `triple` itself comes first
fn class_combinations(equality: &EqualityManager, triple: &Triple) -> Vec<Triple> {
    let [subjects, predicates, objects] = triple.map(|r| equality.class_members(r));
    let mut combinations = Vec::with_capacity(subjects.len() * predicates.len() * objects.len());
    for &s in &subjects {
        for &p in &predicates {
            for &o in &objects {
                combinations.push([s, p, o]);
            }
        }
    }
    combinations
}

/// Facts that support a derivation in the old materialization and are not
/// known to be gone
fn supporting_filter(
    state: &IncrementalReasoningState,
) -> impl Fn(LiteralRole, &BodyLiteralInfo, TupleIndex, TupleStatus) -> bool + Sync + '_ {
    move |role, _, tuple, status| {
        let flags = state.global_flags(tuple);
        match role {
            LiteralRole::SupportingNegative | LiteralRole::ReevaluationNegative => {
                in_i_plus_added(status, flags)
            }
            _ => in_i(status) && flags & (GF_DISPROVED | GF_ADDED) != GF_DISPROVED,
        }
    }
}

/// Keeps a fact if it can be proved from facts that still hold
pub struct FbfStrategy<'p> {
    proving: &'p EqualityManager,
    stack: Vec<StackFrame>,
    free_frames: Vec<StackFrame>,
    checked_tuples: Vec<TupleIndex>,
    checks: usize,
}

impl<'p> FbfStrategy<'p> {
    pub fn new(proving: &'p EqualityManager) -> Self {
        Self {
            proving,
            stack: Vec::new(),
            free_frames: Vec::new(),
            checked_tuples: Vec::new(),
            checks: 0,
        }
    }

    /// Number of facts checked so far
    pub fn checks(&self) -> usize {
        self.checks
    }

    fn first_address(task: &DeletionTask<'_>, triple: &Triple) -> ReturnAddress {
        if !task.context().mode.equality_enabled() {
            ReturnAddress::RecursiveRule
        } else if is_same_as(triple) {
            ReturnAddress::Reflexivity
        } else {
            ReturnAddress::Replacement
        }
    }

    /// Start checking a fact. Returns `None` if a frame was pushed.
    fn enter(
        &mut self,
        task: &DeletionTask<'_>,
        worker: usize,
        tuple: TupleIndex,
        triple: Triple,
    ) -> CwmResult<Option<bool>> {
        let state = task.context().state;
        if state.global_flags(tuple) & (GF_DISPROVED | GF_ADDED) != GF_DISPROVED
            && state.add_current_level_flags(tuple, LF_CHECKED)?
        {
            if let Some(monitor) = task.monitor() {
                monitor.checking_provability_started(worker, &triple, false);
            }
            let mut frame = self.free_frames.pop().unwrap_or_default();
            frame.reset(tuple, triple, Self::first_address(task, &triple));
            self.checked_tuples.push(tuple);
            if self.saturate(task, worker, tuple, &triple)? {
                frame.finish(true);
            }
            self.stack.push(frame);
            return Ok(None);
        }

        if let Some(monitor) = task.monitor() {
            monitor.checking_provability_started(worker, &triple, true);
            monitor.checking_provability_finished(worker, &triple);
        }
        // only the outermost caller looks at the answer
        if self.stack.is_empty() {
            Ok(Some(self.all_proved(task, tuple, &triple)?))
        } else {
            Ok(Some(false))
        }
    }

    /// Control came back to the top frame; stop searching once it is proved
    fn resume(&mut self, task: &DeletionTask<'_>) -> CwmResult<()> {
        let Some((tuple, triple)) = self.stack.last().map(|f| (f.tuple, f.triple)) else {
            return Ok(());
        };
        if self.all_proved(task, tuple, &triple)? {
            if let Some(frame) = self.stack.last_mut() {
                frame.finish(true);
            }
        }
        Ok(())
    }

    /// Move the top frame forward to its next nested check or its return
    fn advance(&mut self, task: &DeletionTask<'_>, worker: usize) -> CwmResult<Advance> {
        let ctx = *task.context();
        let scope = task.scope();
        let supporting = supporting_filter(ctx.state);
        let supporting_eval = Evaluation::new(ctx.table, &supporting).with_equality(ctx.equality_manager());

        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(Advance::Return(false));
            };
            match frame.resume {
                ReturnAddress::Reflexivity => {
                    if let Some(&candidate) = frame.candidates.get(frame.next_candidate) {
                        frame.next_candidate += 1;
                        let resource = frame.triple[0];
                        if ctx.state.global_flags(candidate) & GF_DISPROVED != 0
                            || !in_i(ctx.table.get_tuple_status(candidate))
                        {
                            continue;
                        }
                        if self.all_reflexive_same_as_proved(task, resource) {
                            if let Some(frame) = self.stack.last_mut() {
                                frame.resume = ReturnAddress::Replacement;
                                frame.position = 0;
                            }
                            continue;
                        }
                        return Ok(Advance::Call(candidate, task.triple(candidate)?));
                    }
                    if frame.position < 3 {
                        frame.candidates = ctx.table.tuples_with_resource_at(frame.triple[0], frame.position);
                        frame.next_candidate = 0;
                        frame.position += 1;
                    } else {
                        frame.resume = ReturnAddress::Replacement;
                        frame.position = 0;
                    }
                }
                ReturnAddress::Replacement => {
                    if frame.position < 3 {
                        let resource = frame.triple[frame.position];
                        frame.position += 1;
                        if !ctx.equality.is_singleton(resource) && task.check_reflexivity(resource, 2) {
                            let reflexive = same_as(resource, resource);
                            let (_, index) = ctx.table.add_tuple(&reflexive, 0);
                            if ctx.state.global_flags(index) & GF_DISPROVED == 0 {
                                return Ok(Advance::Call(index, reflexive));
                            }
                        }
                    } else {
                        frame.resume = ReturnAddress::RecursiveRule;
                    }
                }
                ReturnAddress::RecursiveRule => {
                    if !ctx.rules.has_recursive_rules(scope) {
                        frame.resume = ReturnAddress::Return;
                        continue;
                    }
                    if let Some(instance) = frame.instances.get(frame.next_instance) {
                        match instance.get(frame.next_body).copied() {
                            Some(matched) => {
                                frame.next_body += 1;
                                if ctx.rules.is_supporting_body_atom(frame.rule, matched.literal) {
                                    return Ok(Advance::Call(matched.tuple, matched.triple));
                                }
                            }
                            None => {
                                frame.next_instance += 1;
                                frame.next_body = 0;
                            }
                        }
                        continue;
                    }
                    if let Some(&head) = frame.heads.get(frame.next_head) {
                        frame.next_head += 1;
                        frame.rule = head.rule;
                        if let Some(monitor) = ctx.monitor {
                            monitor.backward_recursive_rule_started(worker, head.rule);
                        }
                        frame.instances = ctx.rules.supporting_instances(&supporting_eval, head, &frame.triple)?;
                        frame.next_instance = 0;
                        frame.next_body = 0;
                        continue;
                    }
                    if frame.pattern < 8 {
                        frame.heads = ctx
                            .rules
                            .matching_head_atoms(&frame.triple, frame.pattern, ctx.equality_manager())
                            .into_iter()
                            .filter(|h| {
                                ctx.rules.is_recursive(h.rule) && scope.includes(ctx.rules.rule(h.rule).level())
                            })
                            .collect();
                        frame.next_head = 0;
                        frame.pattern += 1;
                    } else {
                        frame.resume = ReturnAddress::Return;
                    }
                }
                ReturnAddress::Return => return Ok(Advance::Return(frame.proved)),
            }
        }
    }

    /// Mark every fact checked in this search that turned out unprovable
    fn mark_disproved(&mut self, task: &DeletionTask<'_>, worker: usize) -> CwmResult<()> {
        let checked = std::mem::take(&mut self.checked_tuples);
        for &tuple in &checked {
            if self.all_disproved(task, tuple)?
                && task.context().state.add_global_flags(tuple, GF_DISPROVED)?
            {
                if let Some(monitor) = task.monitor() {
                    monitor.checked_tuple_disproved(worker, &task.triple(tuple)?);
                }
            }
        }
        self.checked_tuples = checked;
        self.checked_tuples.clear();
        Ok(())
    }

    /// Prove the checked fact from scratch where possible, then forward-chain
    /// everything that became proved. Returns whether the fact is proved.
    fn saturate(
        &self,
        task: &DeletionTask<'_>,
        worker: usize,
        tuple: TupleIndex,
        triple: &Triple,
    ) -> CwmResult<bool> {
        let ctx = *task.context();
        let state = ctx.state;
        let scope = task.scope();

        match ctx.equality_manager() {
            Some(equality) => {
                if is_same_as(triple) {
                    for member in equality.class_members(triple[0]) {
                        if self.occurs_in_edb(task, member) {
                            let resource = self.proving.normalize(member);
                            let reflexive = same_as(resource, resource);
                            let (_, index) = ctx.table.add_tuple(&reflexive, 0);
                            if state.add_current_level_flags(index, LF_PROVED_NEW)? {
                                state.proved_list().enqueue(index)?;
                                if let Some(monitor) = ctx.monitor {
                                    monitor.checked_tuple_proved(worker, &reflexive, true, false, false);
                                }
                            }
                        }
                    }
                }
                for (position, combination) in class_combinations(equality, triple).into_iter().enumerate() {
                    let index = if position == 0 {
                        Some(tuple)
                    } else {
                        ctx.table.get_tuple_index(&combination)
                    };
                    let Some(index) = index else {
                        continue;
                    };
                    let from_edb = ctx.table.get_tuple_status(index) & TUPLE_STATUS_EDB != 0;
                    let from_delayed = !from_edb && state.current_level_flags(index) & LF_DELAYED != 0;
                    let from_rule = !from_edb && !from_delayed && ctx.rules.is_pivotless_fact(&combination, scope);
                    if from_edb || from_delayed || from_rule {
                        let (normal, changed) = self.proving.normalize_triple(&combination);
                        let proved = if changed {
                            ctx.table.add_tuple(&normal, 0).1
                        } else {
                            index
                        };
                        if state.add_current_level_flags(proved, LF_PROVED_NEW)? {
                            state.proved_list().enqueue(proved)?;
                            if let Some(monitor) = ctx.monitor {
                                monitor.checked_tuple_proved(worker, &normal, from_edb, from_delayed, from_rule);
                            }
                        }
                    }
                }
            }
            None => {
                let supporting = supporting_filter(state);
                let supporting_eval = Evaluation::new(ctx.table, &supporting);
                let from_edb = ctx.table.get_tuple_status(tuple) & TUPLE_STATUS_EDB != 0;
                let from_delayed = !from_edb && state.current_level_flags(tuple) & LF_DELAYED != 0;
                let from_rule = !from_edb
                    && !from_delayed
                    && ctx.rules.proved_by_nonrecursive_rule(&supporting_eval, triple, scope)?;
                if (from_edb || from_delayed || from_rule) && state.add_current_level_flags(tuple, LF_PROVED_NEW)? {
                    state.proved_list().enqueue(tuple)?;
                    if let Some(monitor) = ctx.monitor {
                        monitor.checked_tuple_proved(worker, triple, from_edb, from_delayed, from_rule);
                    }
                }
            }
        }

        if !state.proved_list().can_dequeue() {
            return Ok(false);
        }
        let equality = ctx.mode.equality_enabled();
        let uses_levels = ctx.mode.uses_levels();
        let level = task.level();
        while task.is_running() {
            let current = state.proved_list().dequeue();
            if current == 0 {
                break;
            }
            let flags = state.current_level_flags(current);
            if flags & (LF_PROVED | LF_PROVED_MERGED | LF_PROVED_NEW) != LF_PROVED_NEW
                || !state.add_current_level_flags(current, LF_PROVED)?
            {
                continue;
            }
            let current_triple = task.triple(current)?;

            if equality {
                let (normal, changed) = self.proving.normalize_triple(&current_triple);
                if changed {
                    state.add_current_level_flags(current, LF_PROVED_MERGED)?;
                    self.add_proved_tuple(task, &normal)?;
                    continue;
                }
                if is_same_as(&current_triple) && current_triple[0] != current_triple[2] {
                    self.rewrite(task, worker, current_triple[0], current_triple[2])?;
                    continue;
                }
                for resource in current_triple {
                    if task.check_reflexivity(resource, 1) {
                        self.add_proved_tuple(task, &same_as(resource, resource))?;
                    }
                }
            }

            let filter = move |role: LiteralRole, info: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| {
                match role {
                    LiteralRole::PositiveBeforePivot | LiteralRole::PositiveAfterPivot => {
                        if uses_levels && Some(info.level) != level {
                            in_i(status) && state.global_flags(tuple) & (GF_DISPROVED | GF_ADDED) != GF_DISPROVED
                        } else {
                            state.current_level_flags(tuple) & (LF_PROVED | LF_PROVED_MERGED) == LF_PROVED
                                && (role == LiteralRole::PositiveAfterPivot || tuple != current)
                        }
                    }
                    _ => in_i_plus_added(status, state.global_flags(tuple)),
                }
            };
            let eval = Evaluation::new(ctx.table, &filter).with_equality(equality.then_some(self.proving));
            ctx.rules
                .apply_rules_to_positive_literal(&eval, current, &current_triple, scope, &mut |_, head| {
                    self.prove_tuple(task, worker, &head)
                })?;
        }

        if equality {
            self.all_proved(task, tuple, triple)
        } else {
            Ok(true)
        }
    }

    fn occurs_in_edb(&self, task: &DeletionTask<'_>, resource: ResourceId) -> bool {
        let table = task.context().table;
        table
            .tuples_mentioning(resource)
            .into_iter()
            .any(|tuple| table.get_tuple_status(tuple) & TUPLE_STATUS_EDB != 0)
    }

    /// Record a proved fact. It only enters the proved-list if it (or its
    /// normal form in the materialization) was checked; otherwise it waits
    /// as delayed until a check reaches it.
    fn add_proved_tuple(&self, task: &DeletionTask<'_>, triple: &Triple) -> CwmResult<AddResult> {
        let ctx = task.context();
        let state = ctx.state;
        let (_, tuple) = ctx.table.add_tuple(triple, 0);
        let checked = match ctx.equality_manager() {
            Some(equality) => {
                let (normal, changed) = equality.normalize_triple(triple);
                if changed {
                    ctx.table.get_tuple_index(&normal)
                } else {
                    Some(tuple)
                }
            }
            None => Some(tuple),
        };
        let in_checked = checked.is_some_and(|index| state.current_level_flags(index) & LF_CHECKED != 0);

        if in_checked {
            if state.add_current_level_flags(tuple, LF_PROVED_NEW)? {
                state.proved_list().enqueue(tuple)?;
                Ok(AddResult::Added)
            } else {
                Ok(AddResult::AlreadyExists)
            }
        } else if state.add_current_level_flags(tuple, LF_DELAYED)? {
            Ok(AddResult::Delayed)
        } else {
            Ok(AddResult::AlreadyDelayed)
        }
    }

    fn report(&self, task: &DeletionTask<'_>, worker: usize, triple: &Triple, result: AddResult) {
        let Some(monitor) = task.monitor() else {
            return;
        };
        match result {
            AddResult::AlreadyExists => monitor.tuple_derived(worker, triple, false),
            AddResult::Added => monitor.tuple_derived(worker, triple, true),
            AddResult::Delayed => monitor.tuple_proved_delayed(worker, triple),
            AddResult::AlreadyDelayed => {}
        }
    }

    /// Consumer for forward chaining over proved facts
    fn prove_tuple(&self, task: &DeletionTask<'_>, worker: usize, triple: &Triple) -> CwmResult<()> {
        let equality = task.context().mode.equality_enabled();
        if equality && !self.proving.is_normal_triple(triple) {
            return Ok(());
        }
        let result = self.add_proved_tuple(task, triple)?;
        self.report(task, worker, triple, result);
        if result == AddResult::Added && equality && is_same_as(triple) && triple[0] != triple[2] {
            self.rewrite(task, worker, triple[0], triple[2])?;
        }
        Ok(())
    }

    /// Consumer that never triggers a rewrite
    fn prove_normal_tuple(&self, task: &DeletionTask<'_>, worker: usize, triple: &Triple) -> CwmResult<()> {
        let (normal, _) = self.proving.normalize_triple(triple);
        let result = self.add_proved_tuple(task, &normal)?;
        self.report(task, worker, &normal, result);
        Ok(())
    }

    /// Merge two resources proved equal and renormalize what was proved
    /// about the absorbed one
    fn rewrite(
        &self,
        task: &DeletionTask<'_>,
        worker: usize,
        first: ResourceId,
        second: ResourceId,
    ) -> CwmResult<()> {
        let ctx = *task.context();
        let state = ctx.state;
        let (source, target, clash) =
            merge_direction(ctx.dictionary, ctx.mode.unique_name_assumption(), first, second);

        if self.proving.merge(source, target) {
            if let Some(monitor) = ctx.monitor {
                monitor.constant_merged(worker, source, target);
            }
            for position in 0..3 {
                for tuple in ctx.table.tuples_with_resource_at(source, position) {
                    if state.current_level_flags(tuple) & (LF_PROVED | LF_PROVED_MERGED) != LF_PROVED {
                        continue;
                    }
                    let (normal, changed) = self.proving.normalize_triple(&task.triple(tuple)?);
                    if changed && state.add_current_level_flags(tuple, LF_PROVED_MERGED)? {
                        let result = self.add_proved_tuple(task, &normal)?;
                        self.report(task, worker, &normal, result);
                    }
                }
            }

            let filter = |role: LiteralRole, _: &BodyLiteralInfo, tuple: TupleIndex, status: TupleStatus| match role {
                LiteralRole::ReevaluationPositive => {
                    state.current_level_flags(tuple) & (LF_PROVED | LF_PROVED_MERGED) == LF_PROVED
                }
                _ => in_i_plus_added(status, state.global_flags(tuple)),
            };
            let eval = Evaluation::new(ctx.table, &filter).with_equality(Some(self.proving));
            for rule in ctx.rules.rules_mentioning(source, task.scope(), Some(self.proving)) {
                ctx.rules.evaluate_rule(&eval, rule, &mut |_, head| {
                    self.prove_normal_tuple(task, worker, &head)
                })?;
            }
        }

        if clash {
            if let Some(monitor) = ctx.monitor {
                monitor.inconsistency_detected(worker, target);
            }
            let nothing = [
                target,
                self.proving.normalize(RDF_TYPE_ID),
                self.proving.normalize(OWL_NOTHING_ID),
            ];
            self.prove_normal_tuple(task, worker, &nothing)?;
        }
        Ok(())
    }

    /// Whether the fact and, with equality, every member combination it
    /// stands for were proved
    fn all_proved(&self, task: &DeletionTask<'_>, tuple: TupleIndex, triple: &Triple) -> CwmResult<bool> {
        let ctx = task.context();
        let state = ctx.state;
        let Some(equality) = ctx.equality_manager() else {
            return Ok(state.current_level_flags(tuple) & LF_PROVED != 0);
        };
        let flags = state.global_flags(tuple);
        if flags & GF_DISPROVED != 0 {
            return Ok(false);
        }
        if flags & GF_NORM_PROVED != 0 {
            return Ok(true);
        }
        for combination in class_combinations(equality, triple) {
            let (normal, _) = self.proving.normalize_triple(&combination);
            let index = if normal == *triple {
                Some(tuple)
            } else {
                ctx.table.get_tuple_index(&normal)
            };
            match index {
                Some(index) if state.current_level_flags(index) & LF_PROVED != 0 => {}
                _ => return Ok(false),
            }
        }
        state.add_global_flags(tuple, GF_NORM_PROVED)?;
        Ok(true)
    }

    /// Whether none of the combinations the fact stands for were proved
    fn all_disproved(&self, task: &DeletionTask<'_>, tuple: TupleIndex) -> CwmResult<bool> {
        let ctx = task.context();
        let state = ctx.state;
        let Some(equality) = ctx.equality_manager() else {
            return Ok(state.current_level_flags(tuple) & LF_PROVED == 0);
        };
        if state.global_flags(tuple) & GF_NORM_PROVED != 0 {
            return Ok(false);
        }
        let triple = task.triple(tuple)?;
        for combination in class_combinations(equality, &triple) {
            let (normal, _) = self.proving.normalize_triple(&combination);
            let index = if normal == triple {
                Some(tuple)
            } else {
                ctx.table.get_tuple_index(&normal)
            };
            if index.is_some_and(|index| state.current_level_flags(index) & LF_PROVED != 0) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn all_reflexive_same_as_proved(&self, task: &DeletionTask<'_>, resource: ResourceId) -> bool {
        let ctx = task.context();
        ctx.equality.class_members(resource).into_iter().all(|member| {
            let (normal, _) = self.proving.normalize_triple(&same_as(member, member));
            ctx.table
                .get_tuple_index(&normal)
                .map_or(true, |index| ctx.state.current_level_flags(index) & LF_PROVED != 0)
        })
    }
}

impl DeletionStrategy for FbfStrategy<'_> {
    const MULTITHREADED: bool = false;
    const REFLEXIVITY_BITS: u8 = 3;

    fn check(
        &mut self,
        task: &DeletionTask<'_>,
        worker: usize,
        tuple: TupleIndex,
        triple: &Triple,
    ) -> CwmResult<bool> {
        self.checks += 1;
        self.checked_tuples.clear();
        let mut result = self.enter(task, worker, tuple, *triple)?;

        while !self.stack.is_empty() {
            match self.advance(task, worker)? {
                Advance::Call(child, child_triple) => {
                    if self.enter(task, worker, child, child_triple)?.is_some() {
                        self.resume(task)?;
                    }
                }
                Advance::Return(proved) => {
                    if let Some(frame) = self.stack.pop() {
                        if let Some(monitor) = task.monitor() {
                            monitor.checking_provability_finished(worker, &frame.triple);
                        }
                        self.free_frames.push(frame);
                    }
                    if self.stack.is_empty() {
                        result = Some(proved);
                    } else {
                        self.resume(task)?;
                    }
                }
            }
        }

        self.mark_disproved(task, worker)?;
        Ok(result.unwrap_or(false))
    }
}

/// Run FBF deletion for one level. `proving` collects the equalities proved
/// during the update. Returns how many facts were checked.
pub fn delete(
    ctx: MaintenanceContext<'_>,
    level: Option<usize>,
    pool: &WorkerPool,
    proving: &EqualityManager,
) -> CwmResult<usize> {
    let workers = pool.workers_for(FbfStrategy::MULTITHREADED);
    if let Some(monitor) = ctx.monitor {
        monitor.task_started(TaskKind::Deletion, level, workers);
    }
    let task = DeletionTask::new(ctx, level, FbfStrategy::REFLEXIVITY_BITS)?;
    let mut strategies = vec![FbfStrategy::new(proving)];
    task.run(pool, &mut strategies)?;

    let checks = strategies.iter().map(FbfStrategy::checks).sum();
    debug!(?level, checks, "backward checks finished");
    if let Some(monitor) = ctx.monitor {
        monitor.task_finished(TaskKind::Deletion, level);
    }
    Ok(checks)
}
