use crate::engine::{ContainerEngine, DockerCompose};
use crate::mock::{MockEngine, MockPlanner, MockSupervisor, MockVcs};
use crate::planner::{PlanBuilder, Railpack};
use crate::supervisor::{ServiceSupervisor, Systemd};
use crate::vcs::{GitCli, VersionControl};
use crate::RuntimeError;
use foundation_schema::Settings;
use std::sync::Arc;

/// The full set of external systems an engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ContainerEngine>,
    pub vcs: Arc<dyn VersionControl>,
    pub planner: Arc<dyn PlanBuilder>,
    pub supervisor: Arc<dyn ServiceSupervisor>,
}

impl Collaborators {
    /// docker, git, railpack and systemd.
    pub fn system(settings: &Settings) -> Self {
        Self {
            engine: Arc::new(DockerCompose::new(settings)),
            vcs: Arc::new(GitCli::new(settings)),
            planner: Arc::new(Railpack::new(settings)),
            supervisor: Arc::new(Systemd::new()),
        }
    }

    pub fn mock() -> Self {
        Self {
            engine: Arc::new(MockEngine::new()),
            vcs: Arc::new(MockVcs::new()),
            planner: Arc::new(MockPlanner::new()),
            supervisor: Arc::new(MockSupervisor::new()),
        }
    }
}

pub fn select_collaborators(name: &str, settings: &Settings) -> Result<Collaborators, RuntimeError> {
    match name {
        "system" | "docker" => Ok(Collaborators::system(settings)),
        "mock" => Ok(Collaborators::mock()),
        other => Err(RuntimeError::Unavailable(format!("backend {other}"))),
    }
}
