//! Configuration for the load test.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `DAVSTRESS__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `DAVSTRESS__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `DAVSTRESS__REMOTE=http://localhost:8080` sets the server under test
//! - `DAVSTRESS__PACING__MIN=1s` sets the minimum think-time between tasks
//! - `DAVSTRESS__IDENTITIES__PASSWORD=hunter2` sets the password shared by all users
//!
//! # YAML Configuration File
//!
//! ```yaml
//! remote: http://localhost:8080
//! users: 3
//! duration: 5m
//!
//! pacing:
//!   min: 2s
//!   max: 5s
//!
//! identities:
//!   prefix: locust_user
//!   size: 30
//!   password: test_password1234!
//!
//! tasks:
//!   - name: upload_1kb
//!     weight: 10
//!     file_name: 1kb_file_{n}
//!     variants: 10
//!     body:
//!       type: file
//!       path: /mnt/test-data/file_1kb
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::identity::Assignment;
use crate::pool::DEFAULT_STOP_GRACE;
use crate::task::DEFAULT_PATH_TEMPLATE;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "DAVSTRESS__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Think-time between two tasks of a virtual user.
///
/// Used in: [`Config::pacing`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Pacing {
    /// Lower bound of the pause, inclusive.
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__PACING__MIN`
    #[serde(with = "humantime_serde")]
    pub min: Duration,

    /// Upper bound of the pause, inclusive.
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__PACING__MAX`
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        }
    }
}

/// The space of identities virtual users act as.
///
/// Users are named `{prefix}{index}` with `index` in `[0, size)` and share one password.
///
/// Used in: [`Config::identities`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Identities {
    /// Prefix of all usernames.
    ///
    /// # Default
    ///
    /// `"locust_user"`
    pub prefix: String,

    /// Number of distinct identities.
    ///
    /// # Default
    ///
    /// `30`
    pub size: usize,

    /// Password shared by all identities.
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__IDENTITIES__PASSWORD`
    pub password: SecretBox<ConfigSecret>,

    /// Whether identities are drawn randomly or handed out in order.
    ///
    /// # Default
    ///
    /// `random`
    pub assignment: Assignment,
}

impl Default for Identities {
    fn default() -> Self {
        Self {
            prefix: "locust_user".into(),
            size: 30,
            password: SecretBox::new(Box::new(ConfigSecret::from("test_password1234!"))),
            assignment: Assignment::Random,
        }
    }
}

/// Contents of uploaded files.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Body {
    /// A local file that is streamed on every upload.
    ///
    /// ```yaml
    /// body:
    ///   type: file
    ///   path: /mnt/test-data/file_1gb
    /// ```
    File {
        /// Path of the file to upload.
        path: PathBuf,
    },

    /// Pseudo-random contents generated during the upload.
    ///
    /// Without `p99` every file has exactly `size` bytes. With `p99`, sizes follow a log-normal
    /// distribution with `size` as its median.
    ///
    /// ```yaml
    /// body:
    ///   type: generated
    ///   size: 1MiB
    /// ```
    Generated {
        /// Size, or median size if `p99` is given.
        size: ByteSize,
        /// The 99th percentile of sizes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        p99: Option<ByteSize>,
    },
}

/// An upload task.
///
/// Used in: [`Config::tasks`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Task {
    /// Unique name of the task, used in logs and the summary.
    pub name: String,

    /// Relative likelihood of this task being picked. Must be positive.
    pub weight: i64,

    /// Remote file name. A `{n}` placeholder is replaced by a random number below `variants`.
    pub file_name: String,

    /// Number of distinct file names to pick from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<u32>,

    /// Contents of the uploaded file.
    pub body: Body,

    /// Whether to delete the file again after a successful upload.
    ///
    /// # Default
    ///
    /// `true`
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,
}

fn default_true() -> bool {
    true
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads driving the virtual users.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they do not interleave with the summary.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Main configuration struct for the load test.
///
/// See the module documentation for how configuration is loaded.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the WebDAV server under test.
    ///
    /// # Default
    ///
    /// `http://localhost:8080`
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__REMOTE`
    pub remote: String,

    /// Template of remote file paths, with `{user}` and `{file}` placeholders.
    ///
    /// # Default
    ///
    /// `/remote.php/dav/files/{user}/{file}`
    pub path_template: String,

    /// Number of concurrent virtual users.
    ///
    /// # Default
    ///
    /// `3`
    ///
    /// # Environment Variable
    ///
    /// `DAVSTRESS__USERS`
    pub users: usize,

    /// Think-time between tasks of one virtual user.
    pub pacing: Pacing,

    /// Stop the run after this much time.
    ///
    /// If neither `duration` nor `iterations` is set, the run continues until interrupted.
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,

    /// Stop the run after this many tasks in total.
    #[serde(default)]
    pub iterations: Option<u64>,

    /// Identities of the virtual users.
    pub identities: Identities,

    /// Timeout of a single HTTP request, including the upload of its body.
    ///
    /// # Default
    ///
    /// `10m`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Time given to virtual users to finish their current task when stopping.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Stop the run once more than this many tasks have failed.
    #[serde(default)]
    pub failure_threshold: Option<u64>,

    /// Seed for all random decisions, making runs reproducible.
    #[serde(default)]
    pub seed: Option<u64>,

    pub runtime: Runtime,
    pub logging: Logging,

    /// The tasks virtual users pick from.
    pub tasks: Vec<Task>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "http://localhost:8080".into(),
            path_template: DEFAULT_PATH_TEMPLATE.into(),
            users: 3,
            pacing: Pacing::default(),
            duration: None,
            iterations: None,
            identities: Identities::default(),
            request_timeout: Duration::from_secs(600),
            stop_grace: DEFAULT_STOP_GRACE,
            failure_threshold: None,
            seed: None,
            runtime: Runtime::default(),
            logging: Logging::default(),
            tasks: default_tasks(),
        }
    }
}

/// Text files and 1 KiB, 1 MiB and 1 GiB binary files. Large files are kept on the server.
fn default_tasks() -> Vec<Task> {
    let generated = |size| Body::Generated { size, p99: None };

    vec![
        Task {
            name: "upload_text".into(),
            weight: 10,
            file_name: "test_locust_file.txt".into(),
            variants: None,
            body: generated(ByteSize::kib(4)),
            delete_after_upload: true,
        },
        Task {
            name: "upload_1gb".into(),
            weight: 5,
            file_name: "1gb_file_{n}".into(),
            variants: Some(10),
            body: generated(ByteSize::gib(1)),
            delete_after_upload: false,
        },
        Task {
            name: "upload_1kb".into(),
            weight: 10,
            file_name: "1kb_file_{n}".into(),
            variants: Some(10),
            body: generated(ByteSize::kib(1)),
            delete_after_upload: true,
        },
        Task {
            name: "upload_1mb".into(),
            weight: 10,
            file_name: "1mb_file_{n}".into(),
            variants: Some(10),
            body: generated(ByteSize::mib(1)),
            delete_after_upload: true,
        },
    ]
}

impl Config {
    /// Loads configuration from the given YAML file and the environment.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `DAVSTRESS__`)
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML file cannot be read or parsed, or if environment variables
    /// contain invalid values. Semantic checks, such as positive weights, happen when the scenario
    /// is configured.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
