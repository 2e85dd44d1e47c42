pub mod completions;
pub mod create;
pub mod delete;
pub mod deploy;
pub mod doctor;
pub mod install;
pub mod man_pages;
pub mod status;
pub mod update;
pub mod watch;

use foundation_core::{CoreError, DeployOutcome, ErrorCategory, UpdateReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_PREREQ_ERROR: u8 = 4;

/// An error message paired with the process exit code it maps to.
#[derive(Debug)]
pub struct CommandError {
    pub code: u8,
    pub message: String,
}

impl CommandError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_VALIDATION_ERROR,
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn exit_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::Validation => EXIT_VALIDATION_ERROR,
        ErrorCategory::Store => EXIT_STORE_ERROR,
        ErrorCategory::Prerequisite => EXIT_PREREQ_ERROR,
        ErrorCategory::Failure => EXIT_FAILURE,
    }
}

impl From<CoreError> for CommandError {
    fn from(e: CoreError) -> Self {
        Self {
            code: exit_code(e.category()),
            message: e.to_string(),
        }
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            message,
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` behind a spinner unless output is JSON.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    if json {
        return op();
    }
    let pb = spinner(msg);
    let result = op();
    match &result {
        Ok(_) => spin_ok(&pb, done),
        Err(_) => spin_fail(&pb, &format!("{msg} failed")),
    }
    result
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "running" | "deployed" => Style::new().green().apply_to(state).to_string(),
        "built" => Style::new().cyan().apply_to(state).to_string(),
        "registered" | "restarting" | "created" => {
            Style::new().yellow().apply_to(state).to_string()
        }
        "exited" | "dead" => Style::new().red().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Human summary of an update pass. Returns the exit code it warrants.
pub fn print_update(report: &UpdateReport) -> u8 {
    if !report.pulled.is_empty() {
        println!("pulled images for {}", report.pulled.join(", "));
    }
    for name in &report.refreshed {
        println!("{name}: fetched upstream changes");
    }
    for built in &report.built {
        println!("{}: built ({})", built.service, built.strategy);
    }
    for failure in &report.failures {
        eprintln!("warning: {}: {}", failure.service, failure.reason);
    }
    if report.is_clean() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

pub fn print_deploy(outcome: &DeployOutcome) {
    match outcome {
        DeployOutcome::Deployed { services } => {
            println!("deployed {} service(s)", services.len());
        }
        DeployOutcome::NothingToDeploy => {
            println!("no services defined; run 'foundation create' to add one");
        }
    }
}
