//! Error types for configuring, running and stopping a scenario.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors in the scenario setup, detected before any virtual user is spawned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No task has been registered.
    #[error("no tasks registered")]
    NoTasks,

    /// A task was registered with a weight of zero.
    #[error("task `{task}` has a non-positive weight")]
    InvalidWeight {
        /// Name of the offending task.
        task: String,
    },

    /// Two tasks share the same name.
    #[error("task `{0}` is registered more than once")]
    DuplicateTask(String),

    /// The lower pacing bound is larger than the upper one.
    #[error("invalid pacing interval: min {min:?} is larger than max {max:?}")]
    InvalidPacing {
        /// Lower bound of the interval.
        min: Duration,
        /// Upper bound of the interval.
        max: Duration,
    },

    /// The pool was asked to run zero virtual users.
    #[error("user count must be positive")]
    NoUsers,

    /// The identity space cannot produce any identity.
    #[error("identity space must contain at least one identity")]
    EmptyIdentitySpace,
}

/// Errors from a single HTTP operation.
///
/// These are recorded against the task that issued the operation and never stop a virtual user.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or its response could not be received.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// IO errors while opening or streaming a request body.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server responded with a non-success status code.
    #[error("unexpected status code {0}")]
    Status(StatusCode),
}

/// Result of [`HttpOperation`](crate::executor::HttpOperation) calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Virtual users that did not exit within the stop grace period and were abandoned.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("virtual users did not stop within {grace:?}: {}", users.join(", "))]
pub struct CancellationTimeout {
    /// The grace period that was exceeded.
    pub grace: Duration,
    /// Usernames of the abandoned virtual users.
    pub users: Vec<String>,
}
