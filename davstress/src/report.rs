//! Prints a [`Summary`] to stdout.

use std::fmt;
use std::time::Duration;

use yansi::Paint;

use crate::metrics::{LatencySummary, Summary, TaskSummary};

/// Prints per-task results and totals of a run.
pub fn print_summary(summary: &Summary) {
    for (name, task) in &summary.tasks {
        println!();
        println!("{} {}", "## Task".bold(), name.bold().blue());
        print_task(task, summary.elapsed);
    }

    println!();
    println!(
        "{} ({} tasks in {:.2?})",
        "## TOTALS".bold(),
        summary.total_completed().bold(),
        summary.elapsed
    );
    print_ops(summary.total_completed(), summary.elapsed);
    println!();

    let failures = summary.total_failures();
    if failures > 0 {
        println!("{}", format!("{failures} FAILURES").bold().red());
    }
    if summary.aborted {
        println!("{}", "ABORTED: failure threshold exceeded".bold().red());
    }
    if let Some(timeout) = &summary.timeout {
        println!("{}", timeout.yellow());
    }
}

fn print_task(task: &TaskSummary, elapsed: Duration) {
    print!("{} ({} ops", "DONE:".bold().green(), task.completed.bold());
    if task.failures > 0 {
        print!(", {}", format!("{} FAILURES", task.failures).bold().red());
    }
    println!(")");

    if let Some(latency) = &task.latency {
        print_ops(task.completed, elapsed);
        println!();
        print_percentiles(latency);
    }
}

fn print_percentiles(latency: &LatencySummary) {
    println!(
        "  avg: {:.2?}; p50: {:.2?}; p90: {:.2?}; p99: {:.2?}",
        latency.avg.bold(),
        latency.p50,
        latency.p90,
        latency.p99
    );
}

fn print_ops(ops: u64, duration: Duration) {
    let ops_ps = OpsPerSecond::new(ops, duration);
    print!("  {:.2} operations/s", ops_ps.bold());
}

/// Operation rate over a duration, zero for empty durations.
#[derive(Clone, Copy, Debug, PartialEq)]
struct OpsPerSecond(f64);

impl OpsPerSecond {
    fn new(ops: u64, duration: Duration) -> Self {
        let secs = duration.as_secs_f64();
        if secs > 0.0 {
            Self(ops as f64 / secs)
        } else {
            Self(0.0)
        }
    }
}

impl fmt::Display for OpsPerSecond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_per_second() {
        assert_eq!(OpsPerSecond::new(100, Duration::from_secs(4)).0, 25.0);
        assert_eq!(OpsPerSecond::new(100, Duration::ZERO).0, 0.0);
        assert_eq!(
            format!("{:.2}", OpsPerSecond::new(1, Duration::from_secs(3))),
            "0.33"
        );
    }
}
