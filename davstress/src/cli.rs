use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::http::HttpRemote;
use crate::scenario::{self, RunLimit};
use crate::{observability, report};

/// Load generator for WebDAV file uploads.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Validate(ValidateCommand),
    Version(VersionCommand),
}

/// run the load test against the configured remote
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// stop after this much time, e.g. `5m`
    #[argh(option, from_str_fn(parse_duration))]
    duration: Option<Duration>,

    /// stop after this many tasks in total
    #[argh(option)]
    iterations: Option<u64>,
}

/// check the configuration without sending any requests
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "validate")]
struct ValidateCommand {}

/// print the version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|err| err.to_string())
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("davstress {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("davstress-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads.max(1))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(command) => run(config, command).await,
            Command::Validate(ValidateCommand {}) => validate(config),
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

fn validate(config: Config) -> Result<()> {
    let remote = HttpRemote::with_timeout(&config.remote, config.request_timeout)?;
    let scenario = scenario::configure(&config, Arc::new(remote))?;

    let total = scenario.registry().total_weight() as f64;
    for task in scenario.registry().iter() {
        println!(
            "{:>20}: weight {:>3} ({:.1}%)",
            task.name(),
            task.weight(),
            100.0 * task.weight() as f64 / total
        );
    }
    println!("configuration is valid");

    Ok(())
}

async fn run(config: Config, command: RunCommand) -> Result<()> {
    let remote = HttpRemote::with_timeout(&config.remote, config.request_timeout)?;
    let scenario = scenario::configure(&config, Arc::new(remote))?;

    let limit = RunLimit::from_options(
        command.duration.or(config.duration),
        command.iterations.or(config.iterations),
    );
    tracing::info!(remote = %config.remote, users = config.users, ?limit, "starting load test");

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message("Running load test:");
    bar.enable_steady_tick(Duration::from_millis(100));

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // Without a signal handler, only the run limit can end the run.
            std::future::pending::<()>().await;
        }
    };
    let summary = scenario.run_until(limit, shutdown).await;
    bar.finish_and_clear();

    report::print_summary(&summary);
    Ok(())
}
