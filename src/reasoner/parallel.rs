//! Worker pool for maintenance tasks
//!
//! Every task of a level runs the same job on N scoped threads against one
//! shared [`IncrementalReasoningState`](super::state::IncrementalReasoningState).
//! The threads split work by racing on the shared queues, so no partitioning
//! happens up front.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                       WorkerPool                        │
//! │                                                         │
//! │   Worker 0      Worker 1      ...       Worker N-1      │
//! │      │             │                        │           │
//! │   Phase A       Phase A                  Phase A        │
//! │      └─────────────┴──── Barrier ───────────┘           │
//! │   Phase B       Phase B                  Phase B        │
//! │      │             │                        │           │
//! │      └─────────────┴──── join ──────────────┘           │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! A job that fails must still reach the barrier, otherwise its siblings
//! would wait forever.

use std::sync::Barrier;
use std::thread;

use crate::error::{CwmError, CwmResult};

/// Configuration for parallel execution
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads (0 = auto-detect based on CPU count)
    pub workers: usize,
    /// Whether to enable parallel execution
    pub enabled: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            workers: 0,
            enabled: true,
        }
    }
}

impl ParallelConfig {
    /// Set number of worker threads
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// Disable parallel execution
    pub fn sequential(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Get effective worker count
    pub fn effective_workers(&self) -> usize {
        if !self.enabled {
            1
        } else if self.workers == 0 {
            num_cpus()
        } else {
            self.workers
        }
    }
}

/// Get number of CPUs (fallback to 1 if detection fails)
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Runs a job on a fixed number of threads
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: ParallelConfig,
}

impl WorkerPool {
    pub fn new(config: ParallelConfig) -> Self {
        Self { config }
    }

    /// Worker count for a task; single-threaded tasks always get one
    pub fn workers_for(&self, multithreaded: bool) -> usize {
        if multithreaded {
            self.config.effective_workers().max(1)
        } else {
            1
        }
    }

    /// Run `job(worker_index, barrier)` on `workers` threads and wait for all.
    ///
    /// The first error in worker order is returned. A single worker runs on
    /// the calling thread.
    pub fn run<F>(&self, workers: usize, job: F) -> CwmResult<()>
    where
        F: Fn(usize, &Barrier) -> CwmResult<()> + Sync,
    {
        let workers = workers.max(1);
        let barrier = Barrier::new(workers);
        if workers == 1 {
            return job(0, &barrier);
        }

        let results: Vec<CwmResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let job = &job;
                    let barrier = &barrier;
                    scope.spawn(move || job(worker, barrier))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(CwmError::internal("maintenance worker panicked")))
                })
                .collect()
        });
        results.into_iter().collect()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(ParallelConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_defaults() {
        let config = ParallelConfig::default();
        assert_eq!(config.workers, 0);
        assert!(config.enabled);
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_config_builder() {
        let config = ParallelConfig::default().with_workers(3);
        assert_eq!(config.effective_workers(), 3);
        assert_eq!(config.sequential().effective_workers(), 1);
    }

    #[test]
    fn test_single_threaded_tasks_get_one_worker() {
        let pool = WorkerPool::new(ParallelConfig::default().with_workers(4));
        assert_eq!(pool.workers_for(false), 1);
        assert_eq!(pool.workers_for(true), 4);
    }

    #[test]
    fn test_barrier_separates_phases() {
        let pool = WorkerPool::new(ParallelConfig::default().with_workers(4));
        let before = AtomicUsize::new(0);
        pool.run(4, |_, barrier| {
            before.fetch_add(1, Ordering::SeqCst);
            barrier.wait();
            assert_eq!(before.load(Ordering::SeqCst), 4);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_error_is_reported() {
        let pool = WorkerPool::default();
        let result = pool.run(3, |worker, barrier| {
            barrier.wait();
            if worker == 1 {
                Err(CwmError::internal("boom"))
            } else {
                Ok(())
            }
        });
        assert_eq!(result.unwrap_err().message, "boom");
    }

    #[test]
    fn test_num_cpus() {
        assert!(num_cpus() >= 1);
    }
}
