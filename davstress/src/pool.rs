//! Virtual users and the pool that drives them.
//!
//! Every virtual user runs in its own tokio task and loops over: claim an iteration, select a task,
//! perform it, record the outcome, wait a pacing interval. Stopping is cooperative. A
//! [`CancellationToken`] is checked between iterations and interrupts the pacing sleep, but never
//! a task that is already running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::error::{CancellationTimeout, ConfigurationError};
use crate::executor::HttpOperation;
use crate::identity::{Credential, Identity, IdentityFactory};
use crate::metrics::Metrics;
use crate::pacing::PacingPolicy;
use crate::scheduler::{TaskRegistry, WeightedTaskScheduler};

/// The default time given to virtual users to finish their current task when stopping.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// Lifecycle state of a [`VirtualUser`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UserState {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// A simulated client with its own identity.
#[derive(Clone, Debug)]
pub struct VirtualUser {
    index: usize,
    identity: Identity,
    state: UserState,
    iterations: u64,
    failures: u64,
}

impl VirtualUser {
    /// Creates an idle virtual user.
    pub fn new(index: usize, identity: Identity) -> Self {
        Self {
            index,
            identity,
            state: UserState::Idle,
            iterations: 0,
            failures: 0,
        }
    }

    /// Position of this user in its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn credential(&self) -> &Credential {
        &self.identity.credential
    }

    pub fn state(&self) -> UserState {
        self.state
    }

    /// Number of tasks this user has run.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of tasks of this user that failed.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Caps the total number of task executions across all users of a pool.
#[derive(Debug)]
struct IterationBudget(AtomicU64);

impl IterationBudget {
    /// Takes one iteration from the budget, returning `false` once it is exhausted.
    fn claim(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// State shared read-only by all execution loops of a pool.
#[derive(Debug)]
struct Shared {
    pacing: PacingPolicy,
    executor: Arc<dyn HttpOperation>,
    metrics: Arc<Metrics>,
    budget: Option<Arc<IterationBudget>>,
    failure_threshold: Option<u64>,
    aborted: Arc<AtomicBool>,
}

/// What became of the virtual users of a pool after stopping it.
#[derive(Debug, Default)]
pub struct StopReport {
    /// Users that exited within the grace period, in their final state.
    pub users: Vec<VirtualUser>,
    /// Users that had to be abandoned, if any.
    pub timeout: Option<CancellationTimeout>,
}

/// Owns a set of concurrently running virtual users.
#[derive(Debug)]
pub struct VirtualUserPool {
    registry: Arc<TaskRegistry>,
    pacing: PacingPolicy,
    executor: Arc<dyn HttpOperation>,
    metrics: Arc<Metrics>,
    budget: Option<Arc<IterationBudget>>,
    failure_threshold: Option<u64>,
    aborted: Arc<AtomicBool>,
    seed: Option<u64>,
    stop_grace: Duration,
    token: CancellationToken,
    tracker: TaskTracker,
    handles: Vec<(String, JoinHandle<VirtualUser>)>,
}

impl VirtualUserPool {
    /// Creates a pool that will run tasks from `registry` through `executor`.
    pub fn new(
        registry: Arc<TaskRegistry>,
        pacing: PacingPolicy,
        executor: Arc<dyn HttpOperation>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new(&registry));
        Self {
            registry,
            pacing,
            executor,
            metrics,
            budget: None,
            failure_threshold: None,
            aborted: Arc::new(AtomicBool::new(false)),
            seed: None,
            stop_grace: DEFAULT_STOP_GRACE,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            handles: Vec::new(),
        }
    }

    /// Stops all users once `iterations` tasks have been claimed in total.
    pub fn iteration_limit(mut self, iterations: u64) -> Self {
        self.budget = Some(Arc::new(IterationBudget(AtomicU64::new(iterations))));
        self
    }

    /// Stops the whole pool once more than `threshold` tasks have failed.
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// The time given to users to finish their current task in [`stop`](Self::stop).
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Makes identity assignment, task selection and pacing deterministic.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Metrics of all tasks run by this pool.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Whether the pool was stopped, either explicitly or by exceeding the failure threshold.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the failure threshold was exceeded.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Number of execution loops that have not exited yet.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Spawns `count` virtual users with identities from `identities`.
    ///
    /// Nothing is spawned if the configuration is invalid.
    pub fn start(
        &mut self,
        count: usize,
        identities: &dyn IdentityFactory,
    ) -> Result<(), ConfigurationError> {
        if count == 0 {
            return Err(ConfigurationError::NoUsers);
        }
        if self.registry.is_empty() {
            return Err(ConfigurationError::NoTasks);
        }

        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };

        tracing::info!(
            users = count,
            tasks = self.registry.len(),
            "starting virtual users"
        );

        let shared = Arc::new(Shared {
            pacing: self.pacing,
            executor: Arc::clone(&self.executor),
            metrics: Arc::clone(&self.metrics),
            budget: self.budget.clone(),
            failure_threshold: self.failure_threshold,
            aborted: Arc::clone(&self.aborted),
        });

        let first = self.handles.len();
        for index in first..first + count {
            let mut user = VirtualUser::new(index, identities.identity(index, &mut rng));
            user.state = UserState::Running;

            let username = user.username().to_owned();
            let scheduler =
                WeightedTaskScheduler::with_seed(Arc::clone(&self.registry), rng.next_u64());
            let user_rng = SmallRng::seed_from_u64(rng.next_u64());

            let span = tracing::info_span!("user", index = user.index(), name = %username);
            let task = run_user(
                user,
                scheduler,
                user_rng,
                Arc::clone(&shared),
                self.token.clone(),
            );
            let handle = self.tracker.spawn(task.instrument(span));
            self.handles.push((username, handle));
        }

        Ok(())
    }

    /// Waits until all users have exited on their own.
    ///
    /// Without an iteration limit this only returns after [`stop`](Self::stop) was requested by a
    /// different handle or the failure threshold was exceeded. This future is cancel-safe.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Signals all users to stop after their current task and waits for them to exit.
    ///
    /// Users still running after the grace period are aborted and reported in
    /// [`StopReport::timeout`].
    pub async fn stop(&mut self) -> StopReport {
        self.token.cancel();
        self.tracker.close();

        let graceful = tokio::time::timeout(self.stop_grace, self.tracker.wait())
            .await
            .is_ok();
        if !graceful {
            tracing::debug!(grace = ?self.stop_grace, "stop grace period exceeded");
        }

        self.collect(graceful).await
    }

    /// Collects exited users and aborts the remaining ones.
    ///
    /// After a graceful stop every loop has returned, so all handles are awaited.
    async fn collect(&mut self, graceful: bool) -> StopReport {
        let mut report = StopReport::default();
        let mut abandoned = Vec::new();
        let mut exited = Vec::new();

        for (username, handle) in self.handles.drain(..) {
            if !graceful && !handle.is_finished() {
                handle.abort();
                abandoned.push(username);
            } else {
                exited.push(async move { (username, handle.await) });
            }
        }

        for (username, result) in futures::future::join_all(exited).await {
            match result {
                Ok(user) => report.users.push(user),
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        user = %username,
                        "virtual user panicked"
                    );
                }
            }
        }

        if !abandoned.is_empty() {
            let timeout = CancellationTimeout {
                grace: self.stop_grace,
                users: abandoned,
            };
            tracing::warn!(users = ?timeout.users, "{timeout}");
            report.timeout = Some(timeout);
        }

        report
    }
}

impl Drop for VirtualUserPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_user(
    mut user: VirtualUser,
    mut scheduler: WeightedTaskScheduler,
    mut rng: SmallRng,
    shared: Arc<Shared>,
    token: CancellationToken,
) -> VirtualUser {
    tracing::debug!("virtual user started");

    while !token.is_cancelled() {
        if let Some(budget) = &shared.budget {
            if !budget.claim() {
                break;
            }
        }

        let task = match scheduler.select_next() {
            Ok(task) => task,
            Err(error) => {
                tracing::error!(error = &error as &dyn std::error::Error, "cannot select task");
                break;
            }
        };

        let start = Instant::now();
        let result = task
            .operation()
            .perform(&user, shared.executor.as_ref(), &mut rng)
            .await;
        let elapsed = start.elapsed();
        user.iterations += 1;

        let total_failures = shared.metrics.record(task.name(), elapsed, result.is_ok());
        if let Err(error) = result {
            user.failures += 1;
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                task = task.name(),
                "task failed"
            );

            if shared
                .failure_threshold
                .is_some_and(|threshold| total_failures > threshold)
            {
                tracing::error!(total_failures, "failure threshold exceeded, stopping all users");
                shared.aborted.store(true, Ordering::Release);
                token.cancel();
                break;
            }
        } else {
            tracing::trace!(task = task.name(), ?elapsed, "task completed");
        }

        let pause = shared.pacing.sample(&mut rng);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    user.state = UserState::Stopped;
    tracing::debug!(iterations = user.iterations, "virtual user stopped");
    user
}
