use crate::engine::{Availability, ContainerEngine};
use crate::planner::PlanBuilder;
use crate::process::run_checked;
use crate::vcs::VersionControl;
use crate::RuntimeError;
use std::fmt;
use std::process::Command;
use std::time::Duration;
use tracing::info;

/// An external tool Foundation can bootstrap with its official installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Docker,
    Git,
    Railpack,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Docker => "docker",
            Tool::Git => "git",
            Tool::Railpack => "railpack",
        }
    }

    fn installer_url(self) -> &'static str {
        match self {
            Tool::Docker => "https://get.docker.com",
            Tool::Git => "https://raw.githubusercontent.com/ElliottStorey/git-install/main/install.sh",
            Tool::Railpack => "https://railpack.com/install.sh",
        }
    }
}

/// A missing or unusable prerequisite with actionable instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
    /// Set when running the tool's installer would fix the problem.
    pub installer: Option<Tool>,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} ({})",
            self.name, self.purpose, self.install_hint
        )
    }
}

/// Check every collaborator. An empty list means all prerequisites are met.
pub fn check_collaborators(
    engine: &dyn ContainerEngine,
    vcs: &dyn VersionControl,
    planner: &dyn PlanBuilder,
) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    match engine.availability() {
        Availability::Ready => {}
        Availability::NotInstalled => missing.push(MissingPrereq {
            name: "docker",
            purpose: "running and building service containers",
            install_hint: "install: curl -fsSL https://get.docker.com | sh",
            installer: Some(Tool::Docker),
        }),
        Availability::NotRunning => missing.push(MissingPrereq {
            name: "docker daemon",
            purpose: "running and building service containers",
            install_hint: "start it: systemctl start docker",
            installer: None,
        }),
        Availability::PermissionDenied => missing.push(MissingPrereq {
            name: "docker socket",
            purpose: "permission to talk to the docker daemon",
            install_hint: "run with sudo or add the user to the 'docker' group",
            installer: None,
        }),
    }

    if !vcs.available() {
        missing.push(MissingPrereq {
            name: "git",
            purpose: "cloning and updating service repositories",
            install_hint: "install: apt install git | dnf install git | pacman -S git",
            installer: Some(Tool::Git),
        });
    }

    if !planner.available() {
        missing.push(MissingPrereq {
            name: "railpack",
            purpose: "building repositories without a Dockerfile",
            install_hint: "install: curl -fsSL https://railpack.com/install.sh | sh",
            installer: Some(Tool::Railpack),
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nRun 'foundation doctor' for details.");
    msg
}

/// Download `tool`'s installer script into a temp dir and run it with `sh`.
pub fn run_installer(tool: Tool, timeout: Duration) -> Result<(), RuntimeError> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join(format!("install-{}.sh", tool.name()));
    info!("downloading {} installer", tool.name());
    run_checked(
        Command::new("curl")
            .args(["-fsSL", tool.installer_url(), "-o"])
            .arg(&script),
        timeout,
    )?;
    info!("running {} installer", tool.name());
    run_checked(Command::new("sh").arg(&script), timeout)?;
    Ok(())
}
