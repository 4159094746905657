//! A load generator for the WebDAV upload endpoints of file-sync servers.
//!
//! A [`Scenario`] runs a pool of virtual users. Each user repeatedly picks a task according to its
//! relative weight, performs it through an injected [`HttpOperation`], and then waits a random
//! pacing interval, modelling the think-time of a real client.
//!
//! The built-in [`UploadTask`] uploads files of configurable size to the user's WebDAV folder and
//! optionally deletes them again. File contents are either streamed from disk or generated on the
//! fly, so even gigabyte-sized uploads never have to be held in memory.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use davstress::body::SizeDistribution;
//! use davstress::http::HttpRemote;
//! use davstress::scenario::{RunLimit, Scenario};
//! use davstress::task::{UploadBody, UploadTask};
//!
//! # async fn example() -> Result<(), davstress::error::ConfigurationError> {
//! let small = UploadTask::new("1kb_file_{n}", UploadBody::Generated(SizeDistribution::Fixed(1024)))
//!     .variants(10);
//!
//! let scenario = Scenario::builder()
//!     .task("upload_1kb", 10, Arc::new(small))
//!     .pacing(Duration::from_secs(2), Duration::from_secs(5))
//!     .users(3)
//!     .build(Arc::new(HttpRemote::new("http://localhost:8080")))?;
//!
//! let summary = scenario.run(RunLimit::Iterations(100)).await;
//! println!("{} uploads, {} failed", summary.total_completed(), summary.total_failures());
//! # Ok(())
//! # }
//! ```
#![warn(missing_debug_implementations)]

pub mod body;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod observability;
pub mod pacing;
pub mod pool;
pub mod report;
pub mod scenario;
pub mod scheduler;
pub mod task;

pub use crate::executor::HttpOperation;
pub use crate::scenario::{Scenario, configure};
pub use crate::task::UploadTask;
