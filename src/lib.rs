//! cwm-incremental - incremental materialization maintenance
//!
//! An in-memory RDF triple store that keeps the materialization of a
//! stratified Datalog program up to date as base facts are retracted and
//! asserted, without recomputing it from scratch.
//!
//! # Architecture
//!
//! - [`term`] - resource dictionary and the `owl:sameAs`/`rdf:type` vocabulary
//! - [`store`] - the triple table with its per-fact status bits
//! - [`equality`] - union-find over resources for `owl:sameAs` rewriting
//! - [`rules`] - rules, stratification levels and the filtered join evaluator
//! - [`reasoner`] - the maintenance algorithms and the [`IncrementalEngine`]
//!
//! Two deletion strategies are available: delete/rederive (DRed), which
//! over-deletes and then restores what is still derivable, and
//! backward/forward (FBF), which proves each deletion candidate before
//! deleting it. Both support negation by levels; FBF also supports equality.
//!
//! # Example
//!
//! ```rust,ignore
//! use cwm_incremental::{CwmConfig, IncrementalEngine};
//!
//! let mut engine = IncrementalEngine::new(CwmConfig::default());
//! engine.add_rule_str("?x a B :- ?x a A", 1)?;
//! engine.add_rule_str("?x a C :- ?x a B", 2)?;
//! let fact = engine.parse_triple("1 a A")?;
//! engine.add_fact(fact);
//! engine.materialize()?;
//!
//! let stats = engine.apply_changes(&[fact], &[], None)?;
//! assert!(engine.materialized_facts().is_empty());
//! assert_eq!(stats.deleted, 3);
//! ```

pub mod config;
pub mod equality;
pub mod error;
pub mod reasoner;
pub mod rules;
pub mod store;
pub mod term;

// Re-export the engine
pub use reasoner::{
    IncrementalEngine, IncrementalMonitor, MaintenanceStats, MonitorEvent, ReasoningMode,
    RecordingMonitor, StopHandle, TracingMonitor,
};

// Re-export data model types
pub use equality::EqualityManager;
pub use rules::{Rule, RuleIndex};
pub use store::{TripleTable, TupleIndex, TupleStatus};
pub use term::{Dictionary, Resource, ResourceId, ResourceKind, Triple};

// Re-export configuration types
pub use config::{
    init_logging, ConfigError, CwmConfig, EqualityMode, LogLevel, MonitorKind, Strategy,
};

// Re-export error types
pub use error::{CwmError, CwmResult, ErrorCode, ErrorContext};
