use crate::process::{run_checked, succeeds};
use crate::RuntimeError;
use foundation_schema::Settings;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Source checkouts the orchestrator keeps in sync with their upstream.
pub trait VersionControl: Send + Sync {
    fn available(&self) -> bool;

    /// Whether `url` names a reachable repository.
    fn is_remote(&self, url: &str) -> bool;

    /// Clone `url` into `path`, which must not exist or be empty.
    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), RuntimeError>;

    /// Fetch and report whether the tracking branch is ahead of `HEAD`.
    fn has_upstream_changes(&self, path: &Path) -> Result<bool, RuntimeError>;

    /// Hard-reset the checkout to its tracking branch.
    fn reset_to_upstream(&self, path: &Path) -> Result<(), RuntimeError>;
}

pub struct GitCli {
    probe_timeout: Duration,
    transfer_timeout: Duration,
}

impl GitCli {
    pub fn new(settings: &Settings) -> Self {
        Self {
            probe_timeout: settings.probe_timeout(),
            transfer_timeout: settings.deploy_timeout(),
        }
    }

    fn git() -> Command {
        let mut cmd = Command::new("git");
        // A credential prompt would hang until the timeout.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    fn git_in(path: &Path) -> Command {
        let mut cmd = Self::git();
        cmd.current_dir(path);
        cmd
    }
}

impl VersionControl for GitCli {
    fn available(&self) -> bool {
        succeeds(Self::git().arg("--version"), self.probe_timeout)
    }

    fn is_remote(&self, url: &str) -> bool {
        succeeds(Self::git().args(["ls-remote", url]), self.probe_timeout)
    }

    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), RuntimeError> {
        run_checked(
            Self::git().args(["clone", "--quiet", url]).arg(path),
            self.transfer_timeout,
        )?;
        Ok(())
    }

    fn has_upstream_changes(&self, path: &Path) -> Result<bool, RuntimeError> {
        run_checked(
            Self::git_in(path).args(["fetch", "--quiet"]),
            self.transfer_timeout,
        )?;
        let output = run_checked(
            Self::git_in(path).args(["rev-list", "--count", "HEAD..@{u}"]),
            self.probe_timeout,
        )?;
        parse_count(&output.stdout).map(|behind| behind > 0)
    }

    fn reset_to_upstream(&self, path: &Path) -> Result<(), RuntimeError> {
        run_checked(
            Self::git_in(path).args(["reset", "--hard", "--quiet", "@{u}"]),
            self.probe_timeout,
        )?;
        Ok(())
    }
}

fn parse_count(stdout: &str) -> Result<u64, RuntimeError> {
    stdout
        .trim()
        .parse()
        .map_err(|_| RuntimeError::Parse(format!("git rev-list: '{}'", stdout.trim())))
}
