//! Weighted selection of the next task a virtual user runs.
//!
//! Tasks are registered in a [`TaskRegistry`] with a relative weight. Each virtual user owns a
//! [`WeightedTaskScheduler`] over the shared registry, which picks tasks such that over many
//! selections every task runs with a frequency of `weight / total_weight`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::ConfigurationError;
use crate::task::TaskOperation;

/// A named unit of work with a relative weight.
#[derive(Clone)]
pub struct TaskDefinition {
    name: Arc<str>,
    weight: u32,
    operation: Arc<dyn TaskOperation>,
}

impl TaskDefinition {
    /// Creates a new task definition.
    pub fn new(name: impl Into<Arc<str>>, weight: u32, operation: Arc<dyn TaskOperation>) -> Self {
        Self {
            name: name.into(),
            weight,
            operation,
        }
    }

    /// Name of the task for identification in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// The operation performed when this task is selected.
    pub fn operation(&self) -> &dyn TaskOperation {
        self.operation.as_ref()
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("operation", &self.operation)
            .finish()
    }
}

/// An ordered set of uniquely named tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskDefinition>,
    names: HashSet<Arc<str>>,
    total_weight: u64,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task to the registry.
    ///
    /// Fails if the weight is zero or a task with the same name already exists.
    pub fn register(&mut self, task: TaskDefinition) -> Result<(), ConfigurationError> {
        if task.weight == 0 {
            return Err(ConfigurationError::InvalidWeight {
                task: task.name.to_string(),
            });
        }
        if !self.names.insert(Arc::clone(&task.name)) {
            return Err(ConfigurationError::DuplicateTask(task.name.to_string()));
        }

        self.total_weight += u64::from(task.weight);
        self.tasks.push(task);
        Ok(())
    }

    /// The sum of all task weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Iterates the tasks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.tasks.iter()
    }
}

/// Picks tasks from a shared [`TaskRegistry`] according to their weights.
#[derive(Debug)]
pub struct WeightedTaskScheduler {
    registry: Arc<TaskRegistry>,
    rng: SmallRng,
}

impl WeightedTaskScheduler {
    /// Creates a scheduler with a randomly seeded RNG.
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self::with_seed(registry, rand::random())
    }

    /// Creates a scheduler whose selections are fully determined by `seed`.
    pub fn with_seed(registry: Arc<TaskRegistry>, seed: u64) -> Self {
        Self {
            registry,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Selects the next task to run.
    ///
    /// Draws `r` uniformly from `[0, total_weight)` and returns the first task in registration
    /// order whose cumulative weight exceeds `r`.
    pub fn select_next(&mut self) -> Result<TaskDefinition, ConfigurationError> {
        let total = self.registry.total_weight();
        if total == 0 {
            return Err(ConfigurationError::NoTasks);
        }

        let r = self.rng.random_range(0..total);
        let mut cumulative = 0;
        for task in self.registry.iter() {
            cumulative += u64::from(task.weight);
            if cumulative > r {
                return Ok(task.clone());
            }
        }

        // Unreachable as long as `total_weight` is the sum of all weights.
        Err(ConfigurationError::NoTasks)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::task::tests::NoopTask;

    fn registry(weights: &[(&str, u32)]) -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        for &(name, weight) in weights {
            registry
                .register(TaskDefinition::new(name, weight, Arc::new(NoopTask)))
                .unwrap();
        }
        Arc::new(registry)
    }

    #[test]
    fn empty_registry_fails() {
        let mut scheduler = WeightedTaskScheduler::new(Arc::new(TaskRegistry::new()));
        for _ in 0..10 {
            assert_eq!(
                scheduler.select_next().unwrap_err(),
                ConfigurationError::NoTasks
            );
        }
    }

    #[test]
    fn zero_weight_is_rejected() {
        let mut registry = TaskRegistry::new();
        let err = registry
            .register(TaskDefinition::new("upload", 0, Arc::new(NoopTask)))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::InvalidWeight {
                task: "upload".into()
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskDefinition::new("upload", 1, Arc::new(NoopTask)))
            .unwrap();
        let err = registry
            .register(TaskDefinition::new("upload", 2, Arc::new(NoopTask)))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateTask("upload".into()));
        assert_eq!(registry.total_weight(), 1);
    }

    #[test]
    fn single_task_is_always_selected() {
        let mut scheduler = WeightedTaskScheduler::with_seed(registry(&[("only", 3)]), 0);
        for _ in 0..100 {
            assert_eq!(scheduler.select_next().unwrap().name(), "only");
        }
    }

    #[test]
    fn frequencies_follow_weights() {
        let weights = [("text", 10), ("1gb", 5), ("1kb", 10), ("1mb", 10)];
        let registry = registry(&weights);
        let total = registry.total_weight() as f64;
        let mut scheduler = WeightedTaskScheduler::with_seed(registry, 1234);

        const N: usize = 10_000;
        let mut counts = HashMap::new();
        for _ in 0..N {
            let task = scheduler.select_next().unwrap();
            *counts.entry(task.name().to_owned()).or_insert(0usize) += 1;
        }

        for (name, weight) in weights {
            let expected = weight as f64 / total;
            let observed = counts[name] as f64 / N as f64;
            assert!(
                (observed - expected).abs() < 0.02,
                "{name}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let registry = registry(&[("a", 1), ("b", 2), ("c", 3)]);
        let mut first = WeightedTaskScheduler::with_seed(Arc::clone(&registry), 99);
        let mut second = WeightedTaskScheduler::with_seed(registry, 99);

        for _ in 0..100 {
            assert_eq!(
                first.select_next().unwrap().name(),
                second.select_next().unwrap().name()
            );
        }
    }
}
