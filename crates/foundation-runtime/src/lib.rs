//! Collaborators that Foundation drives but does not reimplement.
//!
//! This crate defines the seams the orchestrator talks through:
//! `ContainerEngine` (docker compose), `VersionControl` (git), `PlanBuilder`
//! (railpack) and `ServiceSupervisor` (systemd). Every external program runs
//! through a bounded-time process runner. Prerequisite checks, installer
//! bootstrap and in-process mocks for tests live here as well.

pub mod backend;
pub mod engine;
pub mod mock;
pub mod planner;
pub mod prereq;
pub mod process;
pub mod supervisor;
pub mod vcs;

pub use backend::{select_collaborators, Collaborators};
pub use engine::{Availability, ContainerEngine, ContainerStatus, DockerCompose};
pub use planner::{PlanBuilder, Railpack};
pub use prereq::{check_collaborators, format_missing, run_installer, MissingPrereq, Tool};
pub use supervisor::{ServiceSupervisor, Systemd};
pub use vcs::{GitCli, VersionControl};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("'{0}' is not available on this system")]
    Unavailable(String),
    #[error("{program} failed: {detail}")]
    CommandFailed { program: String, detail: String },
    #[error("{program} did not finish within {secs}s and was killed")]
    Timeout { program: String, secs: u64 },
    #[error("unexpected output: {0}")]
    Parse(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}
