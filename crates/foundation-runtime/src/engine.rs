use crate::process::{run, run_checked, succeeds};
use crate::RuntimeError;
use foundation_schema::Settings;
use foundation_store::DocumentValidator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

const RAILPACK_BUILDER: &str = "railpack_builder";
const RAILPACK_FRONTEND: &str = "BUILDKIT_SYNTAX=ghcr.io/railwayapp/railpack-frontend";
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Whether the container engine can be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    Ready,
    NotInstalled,
    NotRunning,
    PermissionDenied,
}

/// Observed state of one service's container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStatus {
    pub state: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<String>,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some("running")
    }
}

/// Enacts compose documents. Validation of staged documents comes from the
/// [`DocumentValidator`] supertrait.
pub trait ContainerEngine: DocumentValidator + Send + Sync {
    fn name(&self) -> &str;

    fn availability(&self) -> Availability;

    /// `up -d`, optionally removing containers of services no longer declared.
    fn apply(&self, document: &Path, remove_orphans: bool) -> Result<(), RuntimeError>;

    /// Tear down the project's containers that no longer have a service.
    fn remove_orphans(&self, document: &Path) -> Result<(), RuntimeError>;

    fn pull(&self, document: &Path, service: &str) -> Result<(), RuntimeError>;

    fn build_service(&self, document: &Path, service: &str) -> Result<(), RuntimeError>;

    /// Build `context` with an inferred plan as the build file and tag it.
    fn build_from_plan(&self, tag: &str, plan: &Path, context: &Path) -> Result<(), RuntimeError>;

    /// Containers of the document's project keyed by service name. Services
    /// without a container are absent from the map.
    fn status(&self, document: &Path) -> Result<BTreeMap<String, ContainerStatus>, RuntimeError>;

    fn is_pullable_image(&self, reference: &str) -> bool;

    fn port_in_use(&self, port: u16) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&addr, PORT_PROBE_TIMEOUT).is_ok()
    }
}

/// The `docker` CLI with its compose and buildx plugins.
pub struct DockerCompose {
    probe_timeout: Duration,
    build_timeout: Duration,
    deploy_timeout: Duration,
}

impl DockerCompose {
    pub fn new(settings: &Settings) -> Self {
        Self {
            probe_timeout: settings.probe_timeout(),
            build_timeout: settings.build_timeout(),
            deploy_timeout: settings.deploy_timeout(),
        }
    }

    fn docker() -> Command {
        Command::new("docker")
    }

    fn compose(document: &Path) -> Command {
        let mut cmd = Self::docker();
        cmd.arg("compose").arg("-f").arg(document);
        cmd
    }

    /// Select the railpack builder, creating it on first use.
    fn ensure_builder(&self) -> Result<(), RuntimeError> {
        let exists = succeeds(
            Self::docker().args(["buildx", "inspect", RAILPACK_BUILDER]),
            self.probe_timeout,
        );
        if exists {
            run_checked(
                Self::docker().args(["buildx", "use", RAILPACK_BUILDER]),
                self.probe_timeout,
            )?;
        } else {
            info!("creating buildx builder '{RAILPACK_BUILDER}'");
            run_checked(
                Self::docker().args([
                    "buildx",
                    "create",
                    "--name",
                    RAILPACK_BUILDER,
                    "--driver",
                    "docker-container",
                    "--use",
                    "--bootstrap",
                ]),
                self.build_timeout,
            )?;
        }
        Ok(())
    }
}

impl DocumentValidator for DockerCompose {
    fn validate(&self, path: &Path) -> Result<(), String> {
        let mut cmd = Self::compose(path);
        cmd.args(["config", "--quiet"]);
        match run(&mut cmd, self.probe_timeout) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(output.detail()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl ContainerEngine for DockerCompose {
    fn name(&self) -> &str {
        "docker"
    }

    fn availability(&self) -> Availability {
        if !succeeds(Self::docker().arg("--version"), self.probe_timeout) {
            return Availability::NotInstalled;
        }
        match run(Self::docker().arg("info"), self.probe_timeout) {
            Ok(output) if output.success() => Availability::Ready,
            Ok(output) if output.stderr.to_lowercase().contains("permission denied") => {
                Availability::PermissionDenied
            }
            _ => Availability::NotRunning,
        }
    }

    fn apply(&self, document: &Path, remove_orphans: bool) -> Result<(), RuntimeError> {
        let mut cmd = Self::compose(document);
        cmd.args(["up", "-d"]);
        if remove_orphans {
            cmd.arg("--remove-orphans");
        }
        run_checked(&mut cmd, self.deploy_timeout)?;
        Ok(())
    }

    fn remove_orphans(&self, document: &Path) -> Result<(), RuntimeError> {
        let mut cmd = Self::compose(document);
        cmd.args(["down", "--remove-orphans"]);
        run_checked(&mut cmd, self.deploy_timeout)?;
        Ok(())
    }

    fn pull(&self, document: &Path, service: &str) -> Result<(), RuntimeError> {
        let mut cmd = Self::compose(document);
        cmd.args(["pull", service]);
        run_checked(&mut cmd, self.deploy_timeout)?;
        Ok(())
    }

    fn build_service(&self, document: &Path, service: &str) -> Result<(), RuntimeError> {
        let mut cmd = Self::compose(document);
        cmd.args(["build", service]);
        run_checked(&mut cmd, self.build_timeout)?;
        Ok(())
    }

    fn build_from_plan(&self, tag: &str, plan: &Path, context: &Path) -> Result<(), RuntimeError> {
        self.ensure_builder()?;
        let mut cmd = Self::docker();
        cmd.args(["buildx", "build", "--build-arg", RAILPACK_FRONTEND, "--tag", tag])
            .arg("--file")
            .arg(plan)
            .arg(context)
            .arg("--load");
        run_checked(&mut cmd, self.build_timeout)?;
        debug!("built {tag} from {}", plan.display());
        Ok(())
    }

    fn status(&self, document: &Path) -> Result<BTreeMap<String, ContainerStatus>, RuntimeError> {
        let mut cmd = Self::compose(document);
        cmd.args(["ps", "-a", "--format", "json"]);
        let output = run_checked(&mut cmd, self.probe_timeout)?;
        parse_ps_output(&output.stdout)
    }

    fn is_pullable_image(&self, reference: &str) -> bool {
        succeeds(
            Self::docker().args(["manifest", "inspect", reference]),
            self.probe_timeout,
        )
    }
}

#[derive(Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State", default)]
    state: Option<String>,
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "CreatedAt", default)]
    created_at: Option<String>,
}

/// `compose ps --format json` prints a JSON array on older releases and one
/// object per line on newer ones.
pub fn parse_ps_output(stdout: &str) -> Result<BTreeMap<String, ContainerStatus>, RuntimeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(BTreeMap::new());
    }
    let entries: Vec<PsEntry> = match serde_json::from_str(trimmed) {
        Ok(entries) => entries,
        Err(_) => trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| RuntimeError::Parse(format!("compose ps: {e}")))
            })
            .collect::<Result<_, _>>()?,
    };
    Ok(entries
        .into_iter()
        .map(|e| {
            (
                e.service,
                ContainerStatus {
                    state: e.state,
                    status: e.status,
                    created_at: e.created_at,
                },
            )
        })
        .collect())
}
