use crate::process::{run_checked, succeeds};
use crate::RuntimeError;
use foundation_schema::Settings;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Infers a build plan for a checkout that ships no build file.
pub trait PlanBuilder: Send + Sync {
    fn available(&self) -> bool;

    /// Analyze `source` and write the plan to `plan_out`.
    fn infer_plan(&self, source: &Path, plan_out: &Path) -> Result<(), RuntimeError>;
}

pub struct Railpack {
    probe_timeout: Duration,
    build_timeout: Duration,
}

impl Railpack {
    pub fn new(settings: &Settings) -> Self {
        Self {
            probe_timeout: settings.probe_timeout(),
            build_timeout: settings.build_timeout(),
        }
    }
}

impl PlanBuilder for Railpack {
    fn available(&self) -> bool {
        succeeds(
            Command::new("railpack").arg("--version"),
            self.probe_timeout,
        )
    }

    fn infer_plan(&self, source: &Path, plan_out: &Path) -> Result<(), RuntimeError> {
        if let Some(dir) = plan_out.parent() {
            fs::create_dir_all(dir)?;
        }
        run_checked(
            Command::new("railpack")
                .arg("prepare")
                .arg(source)
                .arg("--plan-out")
                .arg(plan_out),
            self.build_timeout,
        )?;
        if !plan_out.is_file() {
            return Err(RuntimeError::Parse(format!(
                "railpack prepare wrote no plan to {}",
                plan_out.display()
            )));
        }
        Ok(())
    }
}
