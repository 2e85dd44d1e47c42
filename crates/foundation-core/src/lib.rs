//! Lifecycle orchestration for Foundation services.
//!
//! This crate ties the schema, store and runtime crates together into the
//! `Engine`: the API behind install, create, update, delete, deploy and
//! status. It also holds the build resolver, the service state machine, the
//! command lock with shutdown signal handling, and the `Watcher` that repeats
//! update-then-deploy on a timer.

pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod report;
pub mod resolver;
pub mod watcher;

pub use concurrency::{install_signal_handler, shutdown_requested, CommandLock};
pub use engine::{CreateRequest, Engine};
pub use lifecycle::validate_transition;
pub use report::{
    BuiltService, CreateReport, CycleReport, CycleStage, DeleteReport, DeployOutcome,
    InstallReport, ServiceFailure, ServiceStatus, UpdateReport,
};
pub use resolver::{BuildResolver, Resolution};
pub use watcher::Watcher;

use foundation_runtime::RuntimeError;
use foundation_schema::SchemaError;
use foundation_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("service '{0}' already exists")]
    DuplicateService(String),
    #[error("'{0}' is neither a reachable git repository nor a pullable image")]
    InvalidSource(String),
    #[error("no Let's Encrypt email for '{0}': pass --letsencrypt-email or re-run install with --email")]
    MissingEmail(String),
    #[error("{0}")]
    CollaboratorUnavailable(String),
    #[error("build failed for '{service}': {reason}")]
    BuildFailed { service: String, reason: String },
    #[error("deploying the {document} stack failed: {reason}")]
    DeployFailed { document: String, reason: String },
    #[error("ports already in use by another process: {}", join_ports(.0))]
    PortConflict(Vec<u16>),
    #[error("reverse proxy is not running ({}); run 'foundation deploy'", .0.join(", "))]
    ProxyInactive(Vec<String>),
    #[error("another foundation command is running (lock held on {})", .0.display())]
    Busy(PathBuf),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse classification of a failure, used for exit codes and cycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Bad user input; nothing was changed.
    Validation,
    /// Home directory missing, unreadable, rejected, or locked.
    Store,
    /// A collaborator or the proxy is not usable.
    Prerequisite,
    Failure,
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Schema(
                SchemaError::SettingsIo(_)
                | SchemaError::SettingsParse(_)
                | SchemaError::SettingsSerialize(_)
                | SchemaError::InvalidSettings(_),
            ) => ErrorCategory::Store,
            CoreError::Schema(_)
            | CoreError::DuplicateService(_)
            | CoreError::InvalidSource(_)
            | CoreError::MissingEmail(_) => ErrorCategory::Validation,
            CoreError::Store(_) | CoreError::Busy(_) => ErrorCategory::Store,
            CoreError::CollaboratorUnavailable(_)
            | CoreError::ProxyInactive(_)
            | CoreError::Runtime(RuntimeError::Unavailable(_)) => ErrorCategory::Prerequisite,
            _ => ErrorCategory::Failure,
        }
    }
}
