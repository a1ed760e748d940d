//! Incremental maintenance engine
//!
//! [`IncrementalEngine`] owns the store, the rules and the equality manager.
//! After an initial [`materialize`](IncrementalEngine::materialize), batches
//! of base-fact changes are applied with
//! [`apply_changes`](IncrementalEngine::apply_changes), which runs deletion,
//! insertion and propagation level by level using the configured strategy.
//!
//! # Example
//!
//! ```ignore
//! use cwm_incremental::{CwmConfig, IncrementalEngine};
//!
//! let mut engine = IncrementalEngine::new(CwmConfig::default());
//! engine.add_rule_str("?x a Mortal :- ?x a Human", 1)?;
//! let socrates = engine.parse_triple("socrates a Human")?;
//! engine.add_fact(socrates);
//! engine.materialize()?;
//!
//! let stats = engine.apply_changes(&[socrates], &[], None)?;
//! assert_eq!(stats.deleted, 2);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::config::{CwmConfig, Strategy};
use crate::equality::EqualityManager;
use crate::error::{CwmError, CwmResult};
use crate::rules::{ComponentScope, Rule, RuleIndex};
use crate::store::{TripleTable, TupleStatus, TUPLE_STATUS_EDB, TUPLE_STATUS_IDB, TUPLE_STATUS_IDB_MERGED};
use crate::term::{Dictionary, ResourceId, Triple};

use super::monitor::IncrementalMonitor;
use super::parallel::{ParallelConfig, WorkerPool};
use super::state::{in_i, IncrementalReasoningState};
use super::{changes, dred, fbf, insertion, materialize};
use super::{MaintenanceContext, ReasoningMode, StopHandle};

/// What one call to `apply_changes` did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    /// Deletion strategy used
    pub strategy: Strategy,
    /// Levels run, `1` without levels
    pub levels_processed: usize,
    /// Retracted base facts that were asserted
    pub initially_deleted: usize,
    /// Retractions of facts that were not asserted
    pub ignored_deletions: usize,
    /// Newly asserted base facts
    pub initially_inserted: usize,
    /// Facts that left the materialization
    pub deleted: usize,
    /// Facts put back by re-derivation
    pub rederived: usize,
    /// Facts that entered the materialization, or returned to it
    pub added: usize,
    /// Backward provability checks
    pub checks: usize,
    /// The update was stopped before it finished
    pub cancelled: bool,
}

pub struct IncrementalEngine {
    config: CwmConfig,
    dictionary: Dictionary,
    table: TripleTable,
    rules: Vec<Rule>,
    index: Option<RuleIndex>,
    equality: EqualityManager,
    state: IncrementalReasoningState,
    stop: StopHandle,
    pool: WorkerPool,
    materialized: bool,
}

impl IncrementalEngine {
    pub fn new(config: CwmConfig) -> Self {
        let pool = WorkerPool::new(ParallelConfig::default().with_workers(config.maintenance.effective_workers()));
        Self {
            config,
            dictionary: Dictionary::new(),
            table: TripleTable::new(),
            rules: Vec::new(),
            index: None,
            equality: EqualityManager::new(),
            state: IncrementalReasoningState::new(),
            stop: StopHandle::new(),
            pool,
            materialized: false,
        }
    }

    pub fn config(&self) -> &CwmConfig {
        &self.config
    }

    pub fn mode(&self) -> ReasoningMode {
        ReasoningMode::new(self.config.equality.mode, self.config.maintenance.by_levels)
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Intern a resource written in the text syntax
    pub fn resource(&mut self, text: &str) -> ResourceId {
        self.dictionary.intern_str(text)
    }

    /// Parse `subject predicate object`
    pub fn parse_triple(&mut self, text: &str) -> CwmResult<Triple> {
        let terms: Vec<&str> = text.trim().trim_end_matches('.').split_whitespace().collect();
        match terms.as_slice() {
            [s, p, o] => Ok([self.resource(s), self.resource(p), self.resource(o)]),
            _ => Err(CwmError::validation(format!("'{}' is not a triple", text))
                .with_hint("write facts as 'subject predicate object'")),
        }
    }

    /// Add a rule at its component level
    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.index = None;
        self.materialized = false;
    }

    /// Parse and add a rule at `level`
    pub fn add_rule_str(&mut self, text: &str, level: usize) -> CwmResult<()> {
        let rule = Rule::parse(text, &mut self.dictionary)?.at_level(level);
        self.add_rule(rule);
        Ok(())
    }

    /// Assert a base fact ahead of the next materialization
    pub fn add_fact(&mut self, triple: Triple) {
        if self.table.add_tuple(&triple, TUPLE_STATUS_EDB).0 {
            self.materialized = false;
        }
    }

    /// Handle for cancelling a running update from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn ensure_index(&mut self) -> CwmResult<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let mode = self.mode();
        let index = RuleIndex::build(self.rules.clone(), mode.uses_levels())?;
        if !mode.uses_levels() && index.has_rules_with_negation(ComponentScope::AllComponents) {
            return Err(CwmError::unstratifiable_negation(
                "negation needs the rules to be processed by levels",
            )
            .with_hint(if mode.equality_enabled() {
                "equality reasoning does not support negation"
            } else {
                "enable maintenance.by_levels"
            }));
        }
        self.index = Some(index);
        Ok(())
    }

    fn context<'a>(
        &'a self,
        rules: &'a RuleIndex,
        monitor: Option<&'a dyn IncrementalMonitor>,
    ) -> MaintenanceContext<'a> {
        MaintenanceContext {
            dictionary: &self.dictionary,
            table: &self.table,
            rules,
            equality: &self.equality,
            mode: self.mode(),
            monitor,
            state: &self.state,
            stop: &self.stop,
        }
    }

    fn rule_index(&self) -> CwmResult<&RuleIndex> {
        self.index
            .as_ref()
            .ok_or_else(|| CwmError::internal("rule index used before it was built"))
    }

    /// Recompute the materialization from the asserted facts
    pub fn materialize(&mut self) -> CwmResult<usize> {
        self.ensure_index()?;
        let _span = info_span!("materialize").entered();
        for (tuple, _) in self.table.select(|status| status & (TUPLE_STATUS_IDB | TUPLE_STATUS_IDB_MERGED) != 0) {
            self.table
                .delete_add_status(tuple, TUPLE_STATUS_IDB | TUPLE_STATUS_IDB_MERGED, 0);
        }
        self.equality.clear();
        let rules = self.rule_index()?;
        let size = materialize::materialize(self.context(rules, None))?;
        self.materialized = true;
        Ok(size)
    }

    /// Retract `deletions` and assert `insertions`, then bring the
    /// materialization up to date.
    ///
    /// If the update is stopped the stats report `cancelled`; the base facts
    /// already reflect the batch and the next call recomputes the
    /// materialization before going on.
    pub fn apply_changes(
        &mut self,
        deletions: &[Triple],
        insertions: &[Triple],
        monitor: Option<&dyn IncrementalMonitor>,
    ) -> CwmResult<MaintenanceStats> {
        let mode = self.mode();
        let strategy = self.config.maintenance.strategy;
        if strategy == Strategy::Dred && mode.equality_enabled() {
            return Err(CwmError::unsupported_mode("DRed does not support equality reasoning")
                .with_hint("use the fbf strategy or turn equality off"));
        }
        if !self.materialized {
            self.materialize()?;
        }
        self.ensure_index()?;
        self.stop.reset();

        let _span = info_span!("apply_changes", strategy = strategy.as_str()).entered();
        let max_level = match mode.uses_levels() {
            true => Some(self.rule_index()?.max_component_level()),
            false => None,
        };
        self.state.initialize_global(max_level);
        let levels: Vec<Option<usize>> = match max_level {
            Some(max) => (0..=max).map(Some).collect(),
            None => vec![None],
        };

        let mut stats = MaintenanceStats {
            strategy,
            ..Default::default()
        };
        {
            let ctx = self.context(self.rule_index()?, monitor);
            let seeded = changes::initialize_deleted(ctx, deletions)?;
            stats.initially_deleted = seeded.seeded;
            stats.ignored_deletions = seeded.ignored;
            stats.initially_inserted = changes::initialize_inserted(ctx, insertions)?;
        }

        let proving = EqualityManager::new();
        for level in levels {
            if self.stop.is_stopped() {
                break;
            }
            self.state.initialize_current_level();
            let ctx = self.context(self.rule_index()?, monitor);
            if let Some(monitor) = monitor {
                monitor.level_started(level);
            }

            match strategy {
                Strategy::Dred => {
                    dred::delete(ctx, level, &self.pool)?;
                    stats.rederived += dred::rederive(ctx, level, &self.pool)?;
                }
                Strategy::Fbf => {
                    stats.checks += fbf::delete(ctx, level, &self.pool, &proving)?;
                    if mode.equality_enabled() {
                        changes::copy_classes(ctx, &proving);
                    }
                }
            }
            let inserted = insertion::insert(ctx, level, &self.pool)?;

            let slot = level.unwrap_or(0);
            self.state
                .set_delete_list_end(slot, self.state.delete_list().first_free_position());
            self.state
                .set_added_list_end(slot, self.state.added_list().first_free_position());
            stats.levels_processed += 1;
            info!(?level, inserted, "level maintained");
            if let Some(monitor) = monitor {
                monitor.level_finished(level);
            }
        }

        if self.stop.is_stopped() {
            stats.cancelled = true;
            self.materialized = false;
            info!(levels = stats.levels_processed, "update cancelled");
            return Ok(stats);
        }

        let ctx = self.context(self.rule_index()?, monitor);
        let propagated = changes::propagate(ctx, &self.pool)?;
        stats.deleted = propagated.deleted;
        stats.added = propagated.added;
        info!(
            deleted = stats.deleted,
            added = stats.added,
            rederived = stats.rederived,
            checks = stats.checks,
            "update applied"
        );
        Ok(stats)
    }

    /// Whether `triple`, read modulo equality, is in the materialization
    pub fn contains(&self, triple: &Triple) -> bool {
        let triple = match self.mode().equality_enabled() {
            true => self.equality.normalize_triple(triple).0,
            false => *triple,
        };
        self.status_of(&triple).is_some_and(in_i)
    }

    /// Whether `triple` is asserted
    pub fn is_edb(&self, triple: &Triple) -> bool {
        self.status_of(triple)
            .is_some_and(|status| status & TUPLE_STATUS_EDB != 0)
    }

    pub fn status_of(&self, triple: &Triple) -> Option<TupleStatus> {
        self.table
            .get_tuple_index(triple)
            .map(|tuple| self.table.get_tuple_status(tuple))
    }

    /// The materialization, in insertion order
    pub fn materialized_facts(&self) -> Vec<Triple> {
        self.table.materialized()
    }

    /// Equivalence class representative of `resource`
    pub fn representative(&self, resource: ResourceId) -> ResourceId {
        self.equality.normalize(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EqualityMode, Strategy};
    use crate::error::ErrorCode;
    use crate::reasoner::monitor::{MonitorEvent, RecordingMonitor};
    use proptest::prelude::*;
    use proptest::strategy::Strategy as _;
    use std::collections::BTreeSet;

    fn engine(strategy: Strategy, rules: &[(usize, &str)], facts: &[&str]) -> IncrementalEngine {
        let mut config = CwmConfig::default();
        config.maintenance.strategy = strategy;
        config.maintenance.workers = 2;
        let mut engine = IncrementalEngine::new(config);
        for (level, rule) in rules {
            engine.add_rule_str(rule, *level).unwrap();
        }
        for fact in facts {
            let triple = engine.parse_triple(fact).unwrap();
            engine.add_fact(triple);
        }
        engine.materialize().unwrap();
        engine
    }

    fn equality_engine(rules: &[(usize, &str)], facts: &[&str]) -> IncrementalEngine {
        let mut config = CwmConfig::default();
        config.maintenance.strategy = Strategy::Fbf;
        config.equality.mode = EqualityMode::NoUna;
        let mut engine = IncrementalEngine::new(config);
        for (level, rule) in rules {
            engine.add_rule_str(rule, *level).unwrap();
        }
        for fact in facts {
            let triple = engine.parse_triple(fact).unwrap();
            engine.add_fact(triple);
        }
        engine.materialize().unwrap();
        engine
    }

    /// Every materialized fact is written with class representatives
    fn is_normalized(engine: &IncrementalEngine) -> bool {
        engine
            .materialized_facts()
            .iter()
            .all(|triple| triple.iter().all(|&r| engine.representative(r) == r))
    }

    fn holds(engine: &mut IncrementalEngine, fact: &str) -> bool {
        let triple = engine.parse_triple(fact).unwrap();
        engine.contains(&triple)
    }

    fn update(engine: &mut IncrementalEngine, deletions: &[&str], insertions: &[&str]) -> MaintenanceStats {
        let deletions: Vec<Triple> = deletions.iter().map(|f| engine.parse_triple(f).unwrap()).collect();
        let insertions: Vec<Triple> = insertions.iter().map(|f| engine.parse_triple(f).unwrap()).collect();
        engine.apply_changes(&deletions, &insertions, None).unwrap()
    }

    const CHAIN: &[(usize, &str)] = &[(1, "?x a B :- ?x a A"), (2, "?x a C :- ?x a B")];
    const DIAMOND: &[(usize, &str)] = &[
        (1, "?x a B :- ?x a A"),
        (2, "?x a C :- ?x a B"),
        (2, "?x a C :- ?x a D"),
    ];

    #[test]
    fn test_chain_deletion_empties_materialization() {
        for strategy in [Strategy::Dred, Strategy::Fbf] {
            let mut engine = engine(strategy, CHAIN, &["1 a A"]);
            assert!(holds(&mut engine, "1 a C"));

            let stats = update(&mut engine, &["1 a A"], &[]);
            assert_eq!(stats.initially_deleted, 1);
            assert_eq!(stats.deleted, 3);
            assert_eq!(stats.levels_processed, 3);
            assert!(engine.materialized_facts().is_empty(), "{:?}", strategy);
        }
    }

    #[test]
    fn test_alternative_support_keeps_fact() {
        let mut fbf = engine(Strategy::Fbf, DIAMOND, &["1 a A", "1 a D"]);
        let stats = update(&mut fbf, &["1 a A"], &[]);
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.rederived, 0);
        assert!(holds(&mut fbf, "1 a C"));
        assert!(!holds(&mut fbf, "1 a B"));

        let mut dred = engine(Strategy::Dred, DIAMOND, &["1 a A", "1 a D"]);
        let stats = update(&mut dred, &["1 a A"], &[]);
        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.rederived, 1);
        assert!(holds(&mut dred, "1 a C"));
    }

    #[test]
    fn test_insertion_propagates_through_levels() {
        let mut engine = engine(Strategy::Fbf, CHAIN, &["1 a A"]);
        let stats = update(&mut engine, &[], &["2 a A", "1 a A"]);
        assert_eq!(stats.initially_inserted, 1);
        assert_eq!(stats.added, 3);
        assert!(holds(&mut engine, "2 a C"));
        assert!(holds(&mut engine, "1 a C"));
    }

    #[test]
    fn test_retracting_absent_fact_is_ignored() {
        let mut engine = engine(Strategy::Fbf, CHAIN, &["1 a A"]);
        let stats = update(&mut engine, &["1 a B", "9 a A"], &[]);
        assert_eq!(stats.ignored_deletions, 2);
        assert_eq!(stats.deleted, 0);
        assert!(holds(&mut engine, "1 a B"));
    }

    #[test]
    fn test_deleting_blocker_enables_negated_rule() {
        let rules = &[(1, "?x a B :- ?x a A"), (2, "?x a C :- ?x a D , not ?x a B")];
        for strategy in [Strategy::Dred, Strategy::Fbf] {
            let mut engine = engine(strategy, rules, &["1 a A", "1 a D"]);
            assert!(!holds(&mut engine, "1 a C"));

            update(&mut engine, &["1 a A"], &[]);
            assert!(holds(&mut engine, "1 a C"), "{:?}", strategy);

            update(&mut engine, &[], &["1 a A"]);
            assert!(!holds(&mut engine, "1 a C"), "{:?}", strategy);
        }
    }

    #[test]
    fn test_delete_and_reinsert_in_one_batch() {
        let mut engine = engine(Strategy::Fbf, CHAIN, &["1 a A"]);
        update(&mut engine, &["1 a A"], &["1 a A"]);
        for fact in ["1 a A", "1 a B", "1 a C"] {
            assert!(holds(&mut engine, fact));
        }
        let triple = engine.parse_triple("1 a A").unwrap();
        assert!(engine.is_edb(&triple));
    }

    #[test]
    fn test_negation_without_levels_is_rejected() {
        let mut config = CwmConfig::default();
        config.maintenance.by_levels = false;
        let mut engine = IncrementalEngine::new(config);
        engine.add_rule_str("?x a C :- ?x a D , not ?x a B", 1).unwrap();
        let err = engine.materialize().unwrap_err();
        assert_eq!(err.code, ErrorCode::UnstratifiableNegation);
    }

    #[test]
    fn test_dred_with_equality_is_rejected() {
        let mut config = CwmConfig::default();
        config.maintenance.strategy = Strategy::Dred;
        config.equality.mode = EqualityMode::NoUna;
        let mut engine = IncrementalEngine::new(config);
        let err = engine.apply_changes(&[], &[], None).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedMode);
    }

    #[test]
    fn test_inserted_equality_rewrites_facts() {
        let mut config = CwmConfig::default();
        config.equality.mode = EqualityMode::NoUna;
        let mut engine = IncrementalEngine::new(config);
        engine.add_rule_str("?x a Person :- ?x knows ?y", 0).unwrap();
        let knows = engine.parse_triple("_:b knows carol").unwrap();
        engine.add_fact(knows);
        engine.materialize().unwrap();

        let monitor = RecordingMonitor::new();
        let same = engine.parse_triple("_:b sameAs bob").unwrap();
        engine.apply_changes(&[], &[same], Some(&monitor)).unwrap();

        let bob = engine.resource("bob");
        let blank = engine.resource("_:b");
        assert_eq!(engine.representative(blank), bob);
        assert!(holds(&mut engine, "bob a Person"));
        assert!(holds(&mut engine, "_:b knows carol"));
        assert!(!engine.materialized_facts().contains(&knows));
        assert!(monitor
            .events()
            .contains(&MonitorEvent::ConstantMerged { source: blank, target: bob }));
    }

    #[test]
    fn test_retracting_redundant_equality_keeps_representatives() {
        let rules = &[(0, "?x q ?y :- ?x p ?y"), (0, "?y sameAs ?z :- ?x p ?y , ?x p ?z")];
        let mut engine = equality_engine(rules, &["r0 p r0", "r1 p r1", "r1 p r2", "r0 p r2", "r2 sameAs r2"]);
        assert!(holds(&mut engine, "r0 q r1"));

        let stats = update(&mut engine, &["r2 sameAs r2"], &[]);
        assert_eq!(stats.deleted, 0);

        let r0 = engine.resource("r0");
        let r1 = engine.resource("r1");
        let r2 = engine.resource("r2");
        assert_eq!(engine.representative(r0), engine.representative(r1));
        assert_eq!(engine.representative(r2), engine.representative(r1));
        assert!(holds(&mut engine, "r0 q r1"));
        assert!(holds(&mut engine, "r2 q r0"));
        assert!(is_normalized(&engine));
    }

    #[test]
    fn test_retracting_only_equality_splits_class() {
        let rules = &[(0, "?x q ?y :- ?x p ?y")];
        let mut engine = equality_engine(rules, &["r0 p r1", "r1 sameAs r2"]);
        assert!(holds(&mut engine, "r0 q r2"));

        update(&mut engine, &["r1 sameAs r2"], &[]);

        let r1 = engine.resource("r1");
        let r2 = engine.resource("r2");
        assert_ne!(engine.representative(r1), engine.representative(r2));
        assert!(holds(&mut engine, "r0 q r1"));
        assert!(!holds(&mut engine, "r0 q r2"));
        assert!(!holds(&mut engine, "r1 sameAs r2"));
        assert!(is_normalized(&engine));
    }

    #[test]
    fn test_stop_before_update_is_not_sticky() {
        let mut engine = engine(Strategy::Fbf, CHAIN, &["1 a A"]);
        engine.stop_handle().stop();
        let stats = update(&mut engine, &["1 a A"], &[]);
        assert!(!stats.cancelled);
        assert!(engine.materialized_facts().is_empty());
    }

    #[test]
    fn test_cancelled_update_is_recovered() {
        struct StopOnFirstDeletion(StopHandle);
        impl IncrementalMonitor for StopOnFirstDeletion {
            fn possibly_deleted_tuple_extracted(&self, _: usize, _: &Triple) {
                self.0.stop();
            }
        }

        let mut engine = engine(Strategy::Dred, CHAIN, &["1 a A", "2 a A"]);
        let monitor = StopOnFirstDeletion(engine.stop_handle());
        let retraction = engine.parse_triple("1 a A").unwrap();
        let stats = engine.apply_changes(&[retraction], &[], Some(&monitor)).unwrap();
        assert!(stats.cancelled);
        assert!(!engine.is_edb(&retraction));

        update(&mut engine, &[], &[]);
        assert!(!holds(&mut engine, "1 a C"));
        assert!(holds(&mut engine, "2 a C"));
    }

    #[test]
    fn test_stats_serialize() {
        let stats = MaintenanceStats {
            strategy: Strategy::Dred,
            rederived: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["strategy"], "dred");
        assert_eq!(json["rederived"], 2);
        assert_eq!(json["cancelled"], false);
    }

    fn facts(engine: &IncrementalEngine) -> BTreeSet<Triple> {
        engine.materialized_facts().into_iter().collect()
    }

    fn deleted_facts(monitor: &RecordingMonitor) -> BTreeSet<Triple> {
        monitor
            .events()
            .into_iter()
            .filter_map(|event| match event {
                MonitorEvent::DeletionJudged { fact, deleted: true } => Some(fact),
                _ => None,
            })
            .collect()
    }

    const EQUALITY_RULES: &[&str] = &[
        "?x q ?y :- ?x p ?y",
        "?x q ?z :- ?x q ?y , ?y q ?z",
        "?y sameAs ?z :- ?x p ?y , ?x p ?z",
        "?x sameAs ?y :- ?x q ?y , ?y q ?x",
    ];
    const EQUALITY_RESOURCES: &[&str] = &["r0", "r1", "r2", "r3"];
    const EQUALITY_PREDICATES: &[&str] = &["p", "q", "sameAs"];

    fn equality_fact() -> impl proptest::strategy::Strategy<Value = String> {
        (0usize..4, 0usize..3, 0usize..4).prop_map(|(s, p, o)| {
            format!("{} {} {}", EQUALITY_RESOURCES[s], EQUALITY_PREDICATES[p], EQUALITY_RESOURCES[o])
        })
    }

    /// Facts over the whole vocabulary on which the two engines differ
    fn disagreements(engine: &mut IncrementalEngine, expected: &mut IncrementalEngine) -> Vec<String> {
        let mut differing = Vec::new();
        for s in EQUALITY_RESOURCES {
            for p in EQUALITY_PREDICATES {
                for o in EQUALITY_RESOURCES {
                    let fact = format!("{} {} {}", s, p, o);
                    if holds(engine, &fact) != holds(expected, &fact) {
                        differing.push(fact);
                    }
                }
            }
        }
        differing
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Random layered programs over unary classes `P0..P4`
        #[test]
        fn prop_strategies_agree_with_recomputation(
            edges in proptest::collection::vec((0usize..4, 1usize..5), 1..8),
            asserted in proptest::collection::vec((0usize..3, 0usize..5), 1..10),
            retracted in proptest::collection::vec(0usize..10, 0..5),
        ) {
            let rules: Vec<(usize, String)> = edges
                .iter()
                .filter(|(from, to)| from < to)
                .map(|(from, to)| (*to, format!("?x a P{} :- ?x a P{}", to, from)))
                .collect();
            let rule_refs: Vec<(usize, &str)> = rules.iter().map(|(l, r)| (*l, r.as_str())).collect();
            let base: Vec<String> = asserted.iter().map(|(x, p)| format!("{} a P{}", x, p)).collect();
            let base_refs: Vec<&str> = base.iter().map(String::as_str).collect();
            let removed: Vec<&str> = retracted.iter().filter_map(|i| base_refs.get(*i).copied()).collect();
            let kept: Vec<&str> = base_refs.iter().copied().filter(|f| !removed.contains(f)).collect();

            let mut dred = engine(Strategy::Dred, &rule_refs, &base_refs);
            let mut fbf = engine(Strategy::Fbf, &rule_refs, &base_refs);
            let dred_monitor = RecordingMonitor::new();
            let fbf_monitor = RecordingMonitor::new();
            let dred_removed: Vec<Triple> = removed.iter().map(|f| dred.parse_triple(f).unwrap()).collect();
            let fbf_removed: Vec<Triple> = removed.iter().map(|f| fbf.parse_triple(f).unwrap()).collect();
            dred.apply_changes(&dred_removed, &[], Some(&dred_monitor)).unwrap();
            fbf.apply_changes(&fbf_removed, &[], Some(&fbf_monitor)).unwrap();

            let fresh = engine(Strategy::Fbf, &rule_refs, &kept);
            // Engines intern resources in different orders, so compare rendered facts
            let show = |e: &IncrementalEngine, set: BTreeSet<Triple>| -> BTreeSet<String> {
                set.iter().map(|t| e.dictionary().display_triple(t)).collect()
            };
            let expected = show(&fresh, facts(&fresh));
            prop_assert_eq!(show(&dred, facts(&dred)), expected.clone());
            prop_assert_eq!(show(&fbf, facts(&fbf)), expected);
            prop_assert!(deleted_facts(&dred_monitor).is_superset(&deleted_facts(&fbf_monitor)));
        }

        /// Random programs deriving equalities, updated batch by batch
        #[test]
        fn prop_fbf_with_equality_agrees_with_recomputation(
            mask in 1usize..16,
            asserted in proptest::collection::vec(equality_fact(), 1..8),
            batches in proptest::collection::vec(
                (
                    proptest::collection::vec(0usize..8, 0..3),
                    proptest::collection::vec(equality_fact(), 0..3),
                ),
                1..3,
            ),
        ) {
            let rules: Vec<(usize, &str)> = EQUALITY_RULES
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, rule)| (0, *rule))
                .collect();
            let mut base: Vec<String> = Vec::new();
            for fact in asserted {
                if !base.contains(&fact) {
                    base.push(fact);
                }
            }
            let base_refs: Vec<&str> = base.iter().map(String::as_str).collect();
            let mut engine = equality_engine(&rules, &base_refs);

            for (retracted, inserted) in batches {
                let removed: Vec<String> = retracted.iter().filter_map(|i| base.get(*i).cloned()).collect();
                let removed_refs: Vec<&str> = removed.iter().map(String::as_str).collect();
                let inserted_refs: Vec<&str> = inserted.iter().map(String::as_str).collect();
                let stats = update(&mut engine, &removed_refs, &inserted_refs);
                prop_assert!(!stats.cancelled);

                // retractions are applied before assertions
                base.retain(|fact| !removed.contains(fact));
                for fact in inserted {
                    if !base.contains(&fact) {
                        base.push(fact);
                    }
                }
                let base_refs: Vec<&str> = base.iter().map(String::as_str).collect();
                let mut expected = equality_engine(&rules, &base_refs);

                prop_assert_eq!(disagreements(&mut engine, &mut expected), Vec::<String>::new());
                prop_assert!(is_normalized(&engine));
            }
        }
    }
}
