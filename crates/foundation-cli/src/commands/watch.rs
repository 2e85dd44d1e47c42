use super::{CommandError, EXIT_FAILURE, EXIT_SUCCESS};
use foundation_core::{CycleReport, Engine, Watcher};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::warn;

/// Reconcile forever, or once with `once`. Cycle outcomes are logged by the
/// watcher; `--json` additionally prints one report per line.
pub fn run(
    engine: &Engine,
    interval: Option<u64>,
    once: bool,
    json: bool,
) -> Result<u8, CommandError> {
    let interval = interval.map_or_else(|| engine.settings().watch_interval(), Duration::from_secs);
    let watcher = Watcher::new(engine, interval);

    let mut last_healthy = true;
    watcher.run(|report| {
        last_healthy = report.is_healthy();
        if json {
            print_report(report);
        }
        if once {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    // A long-running watcher that was asked to stop exited cleanly.
    if once && !last_healthy {
        Ok(EXIT_FAILURE)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

fn print_report(report: &CycleReport) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("could not serialize cycle report: {e}"),
    }
}
