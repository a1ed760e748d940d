//! Observers for incremental maintenance
//!
//! The engine reports its progress to an optional [`IncrementalMonitor`].
//! All callbacks default to no-ops so an implementation only overrides the
//! events it cares about. Two implementations are provided:
//!
//! - [`TracingMonitor`] emits `tracing` events (`trace` per fact, `debug` per
//!   task)
//! - [`RecordingMonitor`] keeps every event in memory for inspection and for
//!   the CLI's `--events` output

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::term::{Dictionary, ResourceId, Triple};

/// The maintenance tasks a monitor can be told about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Deletion,
    Rederivation,
    Insertion,
    Propagation,
}

/// Lifecycle callbacks, invoked from worker threads
#[allow(unused_variables)]
pub trait IncrementalMonitor: Send + Sync {
    fn task_started(&self, task: TaskKind, level: Option<usize>, workers: usize) {}
    fn task_finished(&self, task: TaskKind, level: Option<usize>) {}
    fn level_started(&self, level: Option<usize>) {}
    fn level_finished(&self, level: Option<usize>) {}

    fn tuple_deletion_previous_levels_started(&self, worker: usize) {}
    fn tuple_deletion_recursive_started(&self, worker: usize) {}
    fn tuple_deletion_finished(&self, worker: usize) {}
    fn possibly_deleted_tuple_extracted(&self, worker: usize, triple: &Triple) {}
    fn possibly_deleted_tuple_processed(&self, worker: usize, triple: &Triple, deleted: bool) {}
    fn deletion_propagation_started(&self, worker: usize, triple: &Triple) {}
    fn deletion_propagation_finished(&self, worker: usize) {}
    fn propagated_deletion_via_replacement(&self, worker: usize, triple: &Triple) {}
    fn tuple_derived(&self, worker: usize, triple: &Triple, is_new: bool) {}

    fn checking_provability_started(&self, worker: usize, triple: &Triple, already_checked: bool) {}
    fn checking_provability_finished(&self, worker: usize, triple: &Triple) {}
    fn checked_tuple_proved(
        &self,
        worker: usize,
        triple: &Triple,
        from_edb: bool,
        from_delayed: bool,
        from_nonrecursive_rule: bool,
    ) {
    }
    fn tuple_proved_delayed(&self, worker: usize, triple: &Triple) {}
    fn checked_tuple_disproved(&self, worker: usize, triple: &Triple) {}
    fn backward_recursive_rule_started(&self, worker: usize, rule: usize) {}
    fn backward_nonrecursive_rule_started(&self, worker: usize, triple: &Triple) {}
    fn constant_merged(&self, worker: usize, source: ResourceId, target: ResourceId) {}
    fn inconsistency_detected(&self, worker: usize, resource: ResourceId) {}
    fn equivalence_class_copied(&self, resource: ResourceId) {}

    fn rederivation_started(&self, worker: usize) {}
    fn tuple_rederived(&self, worker: usize, triple: &Triple) {}

    fn insertion_previous_levels_started(&self, worker: usize) {}
    fn insertion_recursive_started(&self, worker: usize) {}
    fn tuple_inserted(&self, worker: usize, triple: &Triple) {}
    fn insertion_finished(&self, worker: usize) {}

    fn propagate_started(&self) {}
    fn tuple_deleted(&self, triple: &Triple) {}
    fn tuple_added(&self, triple: &Triple) {}
    fn propagate_finished(&self) {}
}

/// Monitor that forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingMonitor {
    dictionary: Option<Dictionary>,
}

impl TracingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render triples with resource names instead of ids
    pub fn with_dictionary(dictionary: Dictionary) -> Self {
        Self {
            dictionary: Some(dictionary),
        }
    }

    fn show(&self, triple: &Triple) -> String {
        match &self.dictionary {
            Some(dictionary) => dictionary.display_triple(triple),
            None => format!("{:?}", triple),
        }
    }

    fn show_resource(&self, id: ResourceId) -> String {
        match &self.dictionary {
            Some(dictionary) => dictionary.display(id),
            None => format!("#{}", id),
        }
    }
}

impl IncrementalMonitor for TracingMonitor {
    fn task_started(&self, task: TaskKind, level: Option<usize>, workers: usize) {
        debug!(?task, ?level, workers, "task started");
    }

    fn task_finished(&self, task: TaskKind, level: Option<usize>) {
        debug!(?task, ?level, "task finished");
    }

    fn possibly_deleted_tuple_extracted(&self, worker: usize, triple: &Triple) {
        trace!(worker, fact = %self.show(triple), "possibly deleted");
    }

    fn possibly_deleted_tuple_processed(&self, worker: usize, triple: &Triple, deleted: bool) {
        trace!(worker, fact = %self.show(triple), deleted, "deletion judged");
    }

    fn propagated_deletion_via_replacement(&self, worker: usize, triple: &Triple) {
        trace!(worker, fact = %self.show(triple), "deleted via replacement");
    }

    fn tuple_derived(&self, worker: usize, triple: &Triple, is_new: bool) {
        trace!(worker, fact = %self.show(triple), is_new, "derived");
    }

    fn checked_tuple_proved(
        &self,
        worker: usize,
        triple: &Triple,
        from_edb: bool,
        from_delayed: bool,
        from_nonrecursive_rule: bool,
    ) {
        trace!(
            worker,
            fact = %self.show(triple),
            from_edb,
            from_delayed,
            from_nonrecursive_rule,
            "proved"
        );
    }

    fn checked_tuple_disproved(&self, worker: usize, triple: &Triple) {
        trace!(worker, fact = %self.show(triple), "disproved");
    }

    fn constant_merged(&self, worker: usize, source: ResourceId, target: ResourceId) {
        trace!(
            worker,
            source = %self.show_resource(source),
            target = %self.show_resource(target),
            "merged"
        );
    }

    fn inconsistency_detected(&self, worker: usize, resource: ResourceId) {
        warn!(worker, resource = %self.show_resource(resource), "inconsistency detected");
    }

    fn tuple_rederived(&self, worker: usize, triple: &Triple) {
        trace!(worker, fact = %self.show(triple), "rederived");
    }

    fn tuple_inserted(&self, worker: usize, triple: &Triple) {
        trace!(worker, fact = %self.show(triple), "inserted");
    }

    fn tuple_deleted(&self, triple: &Triple) {
        trace!(fact = %self.show(triple), "removed from materialization");
    }

    fn tuple_added(&self, triple: &Triple) {
        trace!(fact = %self.show(triple), "added to materialization");
    }
}

/// A recorded monitor callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    TaskStarted { task: TaskKind, level: Option<usize> },
    TaskFinished { task: TaskKind, level: Option<usize> },
    LevelStarted { level: Option<usize> },
    LevelFinished { level: Option<usize> },
    PossiblyDeleted { fact: Triple },
    DeletionJudged { fact: Triple, deleted: bool },
    DeletedViaReplacement { fact: Triple },
    Derived { fact: Triple, is_new: bool },
    CheckingStarted { fact: Triple, already_checked: bool },
    Proved { fact: Triple, from_edb: bool, from_delayed: bool, from_nonrecursive_rule: bool },
    ProvedDelayed { fact: Triple },
    Disproved { fact: Triple },
    ConstantMerged { source: ResourceId, target: ResourceId },
    Inconsistency { resource: ResourceId },
    ClassCopied { resource: ResourceId },
    Rederived { fact: Triple },
    Inserted { fact: Triple },
    Deleted { fact: Triple },
    Added { fact: Triple },
}

/// Monitor that keeps all events in memory
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: MonitorEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of the events so far
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    /// Remove and return the events so far
    pub fn take_events(&self) -> Vec<MonitorEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl IncrementalMonitor for RecordingMonitor {
    fn task_started(&self, task: TaskKind, level: Option<usize>, _workers: usize) {
        self.record(MonitorEvent::TaskStarted { task, level });
    }

    fn task_finished(&self, task: TaskKind, level: Option<usize>) {
        self.record(MonitorEvent::TaskFinished { task, level });
    }

    fn level_started(&self, level: Option<usize>) {
        self.record(MonitorEvent::LevelStarted { level });
    }

    fn level_finished(&self, level: Option<usize>) {
        self.record(MonitorEvent::LevelFinished { level });
    }

    fn possibly_deleted_tuple_extracted(&self, _worker: usize, triple: &Triple) {
        self.record(MonitorEvent::PossiblyDeleted { fact: *triple });
    }

    fn possibly_deleted_tuple_processed(&self, _worker: usize, triple: &Triple, deleted: bool) {
        self.record(MonitorEvent::DeletionJudged {
            fact: *triple,
            deleted,
        });
    }

    fn propagated_deletion_via_replacement(&self, _worker: usize, triple: &Triple) {
        self.record(MonitorEvent::DeletedViaReplacement { fact: *triple });
    }

    fn tuple_derived(&self, _worker: usize, triple: &Triple, is_new: bool) {
        self.record(MonitorEvent::Derived {
            fact: *triple,
            is_new,
        });
    }

    fn checking_provability_started(&self, _worker: usize, triple: &Triple, already_checked: bool) {
        self.record(MonitorEvent::CheckingStarted {
            fact: *triple,
            already_checked,
        });
    }

    fn checked_tuple_proved(
        &self,
        _worker: usize,
        triple: &Triple,
        from_edb: bool,
        from_delayed: bool,
        from_nonrecursive_rule: bool,
    ) {
        self.record(MonitorEvent::Proved {
            fact: *triple,
            from_edb,
            from_delayed,
            from_nonrecursive_rule,
        });
    }

    fn tuple_proved_delayed(&self, _worker: usize, triple: &Triple) {
        self.record(MonitorEvent::ProvedDelayed { fact: *triple });
    }

    fn checked_tuple_disproved(&self, _worker: usize, triple: &Triple) {
        self.record(MonitorEvent::Disproved { fact: *triple });
    }

    fn constant_merged(&self, _worker: usize, source: ResourceId, target: ResourceId) {
        self.record(MonitorEvent::ConstantMerged { source, target });
    }

    fn inconsistency_detected(&self, _worker: usize, resource: ResourceId) {
        self.record(MonitorEvent::Inconsistency { resource });
    }

    fn equivalence_class_copied(&self, resource: ResourceId) {
        self.record(MonitorEvent::ClassCopied { resource });
    }

    fn tuple_rederived(&self, _worker: usize, triple: &Triple) {
        self.record(MonitorEvent::Rederived { fact: *triple });
    }

    fn tuple_inserted(&self, _worker: usize, triple: &Triple) {
        self.record(MonitorEvent::Inserted { fact: *triple });
    }

    fn tuple_deleted(&self, triple: &Triple) {
        self.record(MonitorEvent::Deleted { fact: *triple });
    }

    fn tuple_added(&self, triple: &Triple) {
        self.record(MonitorEvent::Added { fact: *triple });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_monitor() {
        let monitor = RecordingMonitor::new();
        monitor.level_started(Some(1));
        monitor.tuple_derived(0, &[4, 1, 5], true);
        monitor.checked_tuple_disproved(0, &[4, 1, 5]);
        assert_eq!(
            monitor.events(),
            vec![
                MonitorEvent::LevelStarted { level: Some(1) },
                MonitorEvent::Derived {
                    fact: [4, 1, 5],
                    is_new: true
                },
                MonitorEvent::Disproved { fact: [4, 1, 5] },
            ]
        );
        assert_eq!(monitor.take_events().len(), 3);
        assert!(monitor.events().is_empty());
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_string(&MonitorEvent::Deleted { fact: [1, 2, 3] }).unwrap();
        assert_eq!(json, r#"{"event":"deleted","fact":[1,2,3]}"#);
    }

    #[test]
    fn test_default_callbacks_are_no_ops() {
        struct Silent;
        impl IncrementalMonitor for Silent {}
        let monitor: &dyn IncrementalMonitor = &Silent;
        monitor.propagate_started();
        monitor.tuple_added(&[1, 1, 1]);
    }

    #[test]
    fn test_tracing_monitor_renders_names() {
        let mut dictionary = Dictionary::new();
        let x = dictionary.intern_str("x");
        let monitor = TracingMonitor::with_dictionary(dictionary);
        assert_eq!(monitor.show(&[x, 1, x]), "x rdf:type x");
        assert_eq!(TracingMonitor::new().show_resource(7), "#7");
    }
}
