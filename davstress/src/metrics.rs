//! Per-task execution metrics shared by all virtual users.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sketches_ddsketch::DDSketch;

use crate::error::CancellationTimeout;
use crate::scheduler::TaskRegistry;

#[derive(Default)]
struct TaskMetrics {
    completed: AtomicU64,
    failures: AtomicU64,
    timing: Mutex<DDSketch>,
}

/// Counters for every registered task.
///
/// The set of tasks is fixed at construction, so recording never needs to lock the map itself.
#[derive(Default)]
pub struct Metrics {
    tasks: HashMap<String, TaskMetrics>,
    total_failures: AtomicU64,
}

impl Metrics {
    /// Creates zeroed metrics for all tasks of the registry.
    pub fn new(registry: &TaskRegistry) -> Self {
        let tasks = registry
            .iter()
            .map(|task| (task.name().to_owned(), TaskMetrics::default()))
            .collect();

        Self {
            tasks,
            total_failures: AtomicU64::new(0),
        }
    }

    /// Records one finished execution of `task`.
    ///
    /// Returns the total number of failures across all tasks after recording.
    pub fn record(&self, task: &str, elapsed: Duration, success: bool) -> u64 {
        let Some(metrics) = self.tasks.get(task) else {
            tracing::warn!(task, "recording metrics for unknown task");
            return self.total_failures.load(Ordering::Relaxed);
        };

        metrics.completed.fetch_add(1, Ordering::Release);
        metrics
            .timing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(elapsed.as_secs_f64());

        if success {
            self.total_failures.load(Ordering::Relaxed)
        } else {
            metrics.failures.fetch_add(1, Ordering::Release);
            self.total_failures.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, TaskSummary> {
        self.tasks
            .iter()
            .map(|(name, metrics)| {
                let timing = metrics
                    .timing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                // `record` counts completions first, so reading failures first never observes more
                // failures than completions.
                let failures = metrics.failures.load(Ordering::Acquire);
                let summary = TaskSummary {
                    completed: metrics.completed.load(Ordering::Acquire),
                    failures,
                    latency: LatencySummary::from_sketch(&timing),
                };
                (name.clone(), summary)
            })
            .collect()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("tasks", &self.tasks.len())
            .field("total_failures", &self.total_failures)
            .finish()
    }
}

/// Latency percentiles of a task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySummary {
    pub avg: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    fn from_sketch(sketch: &DDSketch) -> Option<Self> {
        let count = sketch.count();
        if count == 0 {
            return None;
        }

        let quantile = |q| {
            sketch
                .quantile(q)
                .ok()
                .flatten()
                .map(|secs: f64| Duration::from_secs_f64(secs.max(0.0)))
                .unwrap_or_default()
        };

        Some(Self {
            avg: Duration::from_secs_f64(sketch.sum().unwrap_or(0.0).max(0.0) / count as f64),
            p50: quantile(0.5),
            p90: quantile(0.9),
            p99: quantile(0.99),
        })
    }
}

/// Outcome of all executions of one task.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskSummary {
    /// Number of finished executions, successful or not.
    pub completed: u64,
    /// Number of executions that failed.
    pub failures: u64,
    /// Latency percentiles, if the task ran at least once.
    pub latency: Option<LatencySummary>,
}

impl TaskSummary {
    /// Number of executions that succeeded.
    pub fn successes(&self) -> u64 {
        self.completed.saturating_sub(self.failures)
    }
}

/// The result of a scenario run.
#[derive(Clone, Debug, Default)]
pub struct Summary {
    /// Outcome per task name.
    pub tasks: BTreeMap<String, TaskSummary>,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Whether the run was cut short because the failure threshold was exceeded.
    pub aborted: bool,
    /// Virtual users that had to be abandoned while stopping.
    pub timeout: Option<CancellationTimeout>,
}

impl Summary {
    /// Number of finished executions of `task`.
    pub fn completed(&self, task: &str) -> u64 {
        self.tasks.get(task).map_or(0, |t| t.completed)
    }

    /// Number of failed executions of `task`.
    pub fn failures(&self, task: &str) -> u64 {
        self.tasks.get(task).map_or(0, |t| t.failures)
    }

    pub fn total_completed(&self) -> u64 {
        self.tasks.values().map(|t| t.completed).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.tasks.values().map(|t| t.failures).sum()
    }
}
