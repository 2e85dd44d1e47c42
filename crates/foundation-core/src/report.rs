//! Outcomes of engine operations, shaped for both human and `--json` output.

use crate::ErrorCategory;
use foundation_schema::BuildStrategy;
use foundation_store::ServiceState;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceFailure {
    pub service: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuiltService {
    pub service: String,
    pub strategy: BuildStrategy,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UpdateReport {
    /// Image-backed services whose images were pulled.
    pub pulled: Vec<String>,
    /// Checkouts reset to new upstream commits.
    pub refreshed: Vec<String>,
    pub built: Vec<BuiltService>,
    pub failures: Vec<ServiceFailure>,
    pub document_changed: bool,
}

impl UpdateReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DeployOutcome {
    Deployed { services: Vec<String> },
    /// The services stack is empty; leftover containers were removed.
    NothingToDeploy,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub home: PathBuf,
    pub email: String,
    /// Services carried over from an existing services document.
    pub preserved_services: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    pub service: String,
    pub strategy: BuildStrategy,
    pub update: UpdateReport,
    pub deploy: DeployOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub service: String,
    /// `false` when no such service was registered.
    pub removed: bool,
    pub update: UpdateReport,
    pub deploy: DeployOutcome,
}

/// One row of `foundation status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub state: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub host: Option<String>,
    pub strategy: BuildStrategy,
    pub lifecycle: ServiceState,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStage {
    Lock,
    Update,
    Deploy,
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStage::Lock => write!(f, "lock"),
            CycleStage::Update => write!(f, "update"),
            CycleStage::Deploy => write!(f, "deploy"),
        }
    }
}

/// Classified result of one watcher cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "health", rename_all = "kebab-case")]
pub enum CycleReport {
    Healthy {
        deploy: DeployOutcome,
    },
    /// The cycle completed but some services failed to update.
    Degraded {
        failures: Vec<ServiceFailure>,
        deploy: DeployOutcome,
    },
    Failed {
        stage: CycleStage,
        /// `None` for a panic.
        kind: Option<ErrorCategory>,
        message: String,
    },
}

impl CycleReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CycleReport::Healthy { .. })
    }
}
