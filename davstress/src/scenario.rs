//! Declarative scenarios and running them to completion.
//!
//! A [`Scenario`] bundles everything needed to drive a [`VirtualUserPool`]: the weighted tasks,
//! pacing, identities and the executor. It is validated once when built, so [`Scenario::run`]
//! cannot fail and always produces a [`Summary`].

use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretBox;
use tokio::time::Instant;

use crate::body::SizeDistribution;
use crate::config::{self, Config, ConfigSecret};
use crate::error::ConfigurationError;
use crate::executor::HttpOperation;
use crate::identity::{Assignment, IdentityFactory, IdentitySpace};
use crate::metrics::Summary;
use crate::pacing::PacingPolicy;
use crate::pool::{DEFAULT_STOP_GRACE, VirtualUserPool};
use crate::scheduler::{TaskDefinition, TaskRegistry};
use crate::task::{TaskOperation, UploadBody, UploadTask};

/// When a run ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunLimit {
    /// Stop after the given wall-clock time.
    Duration(Duration),
    /// Stop after this many tasks have been run in total.
    Iterations(u64),
    /// Run until stopped from outside or by the failure threshold.
    Unbounded,
}

impl RunLimit {
    /// Picks the limit from optional settings. Iterations win over a duration.
    pub fn from_options(duration: Option<Duration>, iterations: Option<u64>) -> Self {
        match (iterations, duration) {
            (Some(iterations), _) => RunLimit::Iterations(iterations),
            (None, Some(duration)) => RunLimit::Duration(duration),
            (None, None) => RunLimit::Unbounded,
        }
    }
}

/// A builder for creating a [`Scenario`].
#[derive(Debug)]
pub struct ScenarioBuilder {
    registry: TaskRegistry,
    error: Option<ConfigurationError>,
    pacing: (Duration, Duration),
    users: usize,
    identities: Option<Arc<dyn IdentityFactory>>,
    seed: Option<u64>,
    failure_threshold: Option<u64>,
    stop_grace: Duration,
}

impl ScenarioBuilder {
    /// Registers a task with the given relative weight.
    ///
    /// Invalid weights and duplicate names are reported by [`build`](Self::build).
    pub fn task(
        mut self,
        name: impl Into<Arc<str>>,
        weight: u32,
        operation: Arc<dyn TaskOperation>,
    ) -> Self {
        let result = self
            .registry
            .register(TaskDefinition::new(name, weight, operation));
        if let Err(error) = result {
            self.error.get_or_insert(error);
        }
        self
    }

    /// The closed interval of pauses between two tasks of a user.
    pub fn pacing(mut self, min: Duration, max: Duration) -> Self {
        self.pacing = (min, max);
        self
    }

    /// The number of concurrent virtual users.
    pub fn users(mut self, users: usize) -> Self {
        self.users = users;
        self
    }

    /// Where virtual users get their identities from.
    ///
    /// Defaults to one `user{n}` identity per virtual user with an empty password.
    pub fn identities(mut self, identities: Arc<dyn IdentityFactory>) -> Self {
        self.identities = Some(identities);
        self
    }

    /// Makes all random decisions reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Stops the run once more than `threshold` tasks have failed.
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Time given to users to finish their current task when stopping.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Validates the configuration and creates the scenario.
    pub fn build(self, executor: Arc<dyn HttpOperation>) -> Result<Scenario, ConfigurationError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.registry.is_empty() {
            return Err(ConfigurationError::NoTasks);
        }
        let (min, max) = self.pacing;
        let pacing = PacingPolicy::new(min, max)?;
        if self.users == 0 {
            return Err(ConfigurationError::NoUsers);
        }

        let identities = match self.identities {
            Some(identities) => identities,
            None => Arc::new(IdentitySpace::new(
                "user",
                self.users,
                SecretBox::new(Box::new(ConfigSecret::default())),
                Assignment::RoundRobin,
            )?),
        };

        Ok(Scenario {
            registry: Arc::new(self.registry),
            pacing,
            users: self.users,
            identities,
            executor,
            seed: self.seed,
            failure_threshold: self.failure_threshold,
            stop_grace: self.stop_grace,
        })
    }
}

/// A validated load test, ready to run.
#[derive(Debug)]
pub struct Scenario {
    registry: Arc<TaskRegistry>,
    pacing: PacingPolicy,
    users: usize,
    identities: Arc<dyn IdentityFactory>,
    executor: Arc<dyn HttpOperation>,
    seed: Option<u64>,
    failure_threshold: Option<u64>,
    stop_grace: Duration,
}

impl Scenario {
    /// Constructs a new scenario builder.
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder {
            registry: TaskRegistry::new(),
            error: None,
            pacing: (Duration::ZERO, Duration::ZERO),
            users: 1,
            identities: None,
            seed: None,
            failure_threshold: None,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// The registered tasks.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn pacing(&self) -> PacingPolicy {
        self.pacing
    }

    pub fn users(&self) -> usize {
        self.users
    }

    /// Runs the scenario until `limit` is reached.
    pub async fn run(&self, limit: RunLimit) -> Summary {
        self.run_until(limit, future::pending()).await
    }

    /// Runs the scenario until `limit` is reached or `shutdown` resolves, whichever comes first.
    ///
    /// On shutdown, users finish their current task before the summary is produced.
    pub async fn run_until(&self, limit: RunLimit, shutdown: impl Future<Output = ()>) -> Summary {
        let mut pool = VirtualUserPool::new(
            Arc::clone(&self.registry),
            self.pacing,
            Arc::clone(&self.executor),
        )
        .stop_grace(self.stop_grace);
        if let Some(threshold) = self.failure_threshold {
            pool = pool.failure_threshold(threshold);
        }
        if let Some(seed) = self.seed {
            pool = pool.seed(seed);
        }
        if let RunLimit::Iterations(iterations) = limit {
            pool = pool.iteration_limit(iterations);
        }

        let start = Instant::now();
        if let Err(error) = pool.start(self.users, self.identities.as_ref()) {
            // Unreachable, all inputs were validated when building the scenario.
            tracing::error!(error = &error as &dyn std::error::Error, "failed to start users");
        }

        {
            let finished = async {
                match limit {
                    RunLimit::Duration(duration) => {
                        tokio::select! {
                            _ = pool.wait() => {}
                            _ = tokio::time::sleep_until(start + duration) => {}
                        }
                    }
                    RunLimit::Iterations(_) | RunLimit::Unbounded => pool.wait().await,
                }
            };

            tokio::select! {
                _ = finished => {}
                _ = shutdown => tracing::info!("shutdown requested, stopping virtual users"),
            }
        }

        let report = pool.stop().await;
        let summary = Summary {
            tasks: pool.metrics().snapshot(),
            elapsed: start.elapsed(),
            aborted: pool.is_aborted(),
            timeout: report.timeout,
        };

        tracing::info!(
            completed = summary.total_completed(),
            failures = summary.total_failures(),
            elapsed = ?summary.elapsed,
            "run finished"
        );
        summary
    }
}

/// Builds a scenario of upload tasks from file configuration.
///
/// Fails with a [`ConfigurationError`] before anything runs if the task list is empty, a weight is
/// not positive, the pacing interval is inverted, or there are no users or identities.
pub fn configure(
    config: &Config,
    executor: Arc<dyn HttpOperation>,
) -> Result<Scenario, ConfigurationError> {
    let identities = IdentitySpace::new(
        config.identities.prefix.clone(),
        config.identities.size,
        config.identities.password.clone(),
        config.identities.assignment,
    )?;

    let mut builder = Scenario::builder()
        .pacing(config.pacing.min, config.pacing.max)
        .users(config.users)
        .identities(Arc::new(identities))
        .stop_grace(config.stop_grace);
    if let Some(seed) = config.seed {
        builder = builder.seed(seed);
    }
    if let Some(threshold) = config.failure_threshold {
        builder = builder.failure_threshold(threshold);
    }

    for task in &config.tasks {
        let weight = u32::try_from(task.weight)
            .ok()
            .filter(|weight| *weight > 0)
            .ok_or_else(|| ConfigurationError::InvalidWeight {
                task: task.name.clone(),
            })?;

        let body = match &task.body {
            config::Body::File { path } => UploadBody::File(path.clone()),
            config::Body::Generated { size, p99 } => {
                let p99 = p99.unwrap_or(*size);
                UploadBody::Generated(SizeDistribution::from_percentiles(size.0, p99.0))
            }
        };
        let mut operation = UploadTask::new(task.file_name.clone(), body)
            .path_template(config.path_template.clone())
            .delete_after_upload(task.delete_after_upload);
        if let Some(variants) = task.variants {
            operation = operation.variants(variants);
        }

        builder = builder.task(task.name.as_str(), weight, Arc::new(operation));
    }

    builder.build(executor)
}
