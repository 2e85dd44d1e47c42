use crate::concurrency::{interruptible_sleep, shutdown_requested};
use crate::engine::Engine;
use crate::report::{CycleReport, CycleStage};
use crate::CoreError;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Repeats update-then-deploy forever. No error ends the loop; only the
/// shutdown flag or the caller's callback does.
pub struct Watcher<'a> {
    engine: &'a Engine,
    interval: Duration,
}

impl<'a> Watcher<'a> {
    pub fn new(engine: &'a Engine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run one reconciliation cycle under the command lock.
    pub fn tick(&self) -> CycleReport {
        let _lock = match self.engine.lock_blocking() {
            Ok(lock) => lock,
            Err(e) => return failed(CycleStage::Lock, &e),
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let update = self
                .engine
                .update()
                .map_err(|e| failed(CycleStage::Update, &e))?;
            let deploy = self
                .engine
                .deploy()
                .map_err(|e| failed(CycleStage::Deploy, &e))?;
            Ok::<_, CycleReport>((update, deploy))
        }));

        let report = match outcome {
            Ok(Ok((update, deploy))) if update.is_clean() => CycleReport::Healthy { deploy },
            Ok(Ok((update, deploy))) => CycleReport::Degraded {
                failures: update.failures,
                deploy,
            },
            Ok(Err(report)) => report,
            Err(payload) => CycleReport::Failed {
                stage: CycleStage::Update,
                kind: None,
                message: panic_message(payload.as_ref()),
            },
        };
        log_report(&report);
        report
    }

    /// Tick, hand the report to `on_cycle`, sleep, repeat. Returns the number
    /// of cycles run.
    pub fn run<F>(&self, mut on_cycle: F) -> usize
    where
        F: FnMut(&CycleReport) -> ControlFlow<()>,
    {
        info!("watching every {}s", self.interval.as_secs());
        let mut cycles = 0;
        loop {
            if shutdown_requested() {
                break;
            }
            let report = self.tick();
            cycles += 1;
            if on_cycle(&report).is_break() {
                break;
            }
            if !interruptible_sleep(self.interval, SLEEP_SLICE) {
                break;
            }
        }
        info!("watcher stopped after {cycles} cycle(s)");
        cycles
    }
}

fn failed(stage: CycleStage, e: &CoreError) -> CycleReport {
    CycleReport::Failed {
        stage,
        kind: Some(e.category()),
        message: e.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "cycle panicked".to_owned()
    }
}

fn log_report(report: &CycleReport) {
    match report {
        CycleReport::Healthy { .. } => info!("cycle healthy"),
        CycleReport::Degraded { failures, .. } => {
            for f in failures {
                warn!("cycle degraded: {}: {}", f.service, f.reason);
            }
        }
        CycleReport::Failed {
            stage,
            kind,
            message,
        } => match kind {
            Some(kind) => error!("cycle failed at {stage} ({kind:?}): {message}"),
            None => error!("cycle panicked at {stage}: {message}"),
        },
    }
}
