//! In-process collaborators for tests and `FOUNDATION_BACKEND=mock`.
//!
//! Each mock records the calls it receives and can be told to fail
//! specific operations. None of them spawn processes.

use crate::engine::{Availability, ContainerEngine, ContainerStatus};
use crate::planner::PlanBuilder;
use crate::supervisor::ServiceSupervisor;
use crate::vcs::VersionControl;
use crate::RuntimeError;
use foundation_schema::ComposeDocument;
use foundation_store::DocumentValidator;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const MOCK_CREATED_AT: &str = "2026-01-01 00:00:00 +0000 UTC";

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not cascade into every later assertion.
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn mock_failure(program: &str, detail: impl Into<String>) -> RuntimeError {
    RuntimeError::CommandFailed {
        program: program.to_owned(),
        detail: detail.into(),
    }
}

fn read_document(path: &Path) -> Result<ComposeDocument, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let doc: ComposeDocument = serde_json::from_str(&content).map_err(|e| e.to_string())?;
    doc.shared_network().map_err(|e| e.to_string())?;
    Ok(doc)
}

struct EngineState {
    availability: Availability,
    calls: Vec<String>,
    reject_validation: bool,
    failing_apply: BTreeSet<String>,
    failing_builds: BTreeSet<String>,
    failing_pulls: BTreeSet<String>,
    bound_ports: BTreeSet<u16>,
    unpullable: BTreeSet<String>,
    stopped: BTreeSet<String>,
}

/// Container engine that treats every declared service as running.
pub struct MockEngine {
    state: Mutex<EngineState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(EngineState {
                availability: Availability::Ready,
                calls: Vec::new(),
                reject_validation: false,
                failing_apply: BTreeSet::new(),
                failing_builds: BTreeSet::new(),
                failing_pulls: BTreeSet::new(),
                bound_ports: BTreeSet::new(),
                unpullable: BTreeSet::new(),
                stopped: BTreeSet::new(),
            }),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_availability(&self, availability: Availability) {
        guard(&self.state).availability = availability;
    }

    /// Reject every document from now on.
    pub fn reject_validation(&self, reject: bool) {
        guard(&self.state).reject_validation = reject;
    }

    /// Fail `apply` for documents of the named compose project.
    pub fn fail_apply(&self, project: &str) {
        guard(&self.state).failing_apply.insert(project.to_owned());
    }

    /// Fail builds of a compose service or plan-built image tag.
    pub fn fail_build(&self, service_or_tag: &str) {
        guard(&self.state)
            .failing_builds
            .insert(service_or_tag.to_owned());
    }

    pub fn clear_build_failures(&self) {
        guard(&self.state).failing_builds.clear();
    }

    /// Fail pulls of the named compose service.
    pub fn fail_pull(&self, service: &str) {
        guard(&self.state).failing_pulls.insert(service.to_owned());
    }

    pub fn bind_port(&self, port: u16) {
        guard(&self.state).bound_ports.insert(port);
    }

    pub fn mark_unpullable(&self, reference: &str) {
        guard(&self.state).unpullable.insert(reference.to_owned());
    }

    /// Report the service's container as exited.
    pub fn stop(&self, service: &str) {
        guard(&self.state).stopped.insert(service.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        guard(&self.state).calls.clear();
    }

    fn record(&self, call: String) {
        guard(&self.state).calls.push(call);
    }
}

impl DocumentValidator for MockEngine {
    fn validate(&self, path: &Path) -> Result<(), String> {
        if guard(&self.state).reject_validation {
            return Err("mock engine rejected the document".to_owned());
        }
        read_document(path).map(|_| ())
    }
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn availability(&self) -> Availability {
        guard(&self.state).availability
    }

    fn apply(&self, document: &Path, remove_orphans: bool) -> Result<(), RuntimeError> {
        let doc = read_document(document).map_err(RuntimeError::Parse)?;
        self.record(format!("apply {} orphans={remove_orphans}", doc.name));
        if guard(&self.state).failing_apply.contains(&doc.name) {
            return Err(mock_failure("docker compose", "mock apply failure"));
        }
        Ok(())
    }

    fn remove_orphans(&self, document: &Path) -> Result<(), RuntimeError> {
        let doc = read_document(document).map_err(RuntimeError::Parse)?;
        self.record(format!("remove-orphans {}", doc.name));
        Ok(())
    }

    fn pull(&self, _document: &Path, service: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull {service}"));
        if guard(&self.state).failing_pulls.contains(service) {
            return Err(mock_failure("docker compose", "mock pull failure"));
        }
        Ok(())
    }

    fn build_service(&self, _document: &Path, service: &str) -> Result<(), RuntimeError> {
        self.record(format!("build {service}"));
        if guard(&self.state).failing_builds.contains(service) {
            return Err(mock_failure("docker compose", "mock build failure"));
        }
        Ok(())
    }

    fn build_from_plan(&self, tag: &str, plan: &Path, _context: &Path) -> Result<(), RuntimeError> {
        self.record(format!("build-plan {tag}"));
        if !plan.is_file() {
            return Err(mock_failure("docker buildx", "plan file missing"));
        }
        if guard(&self.state).failing_builds.contains(tag) {
            return Err(mock_failure("docker buildx", "mock build failure"));
        }
        Ok(())
    }

    fn status(
        &self,
        document: &Path,
    ) -> Result<std::collections::BTreeMap<String, ContainerStatus>, RuntimeError> {
        let doc = read_document(document).map_err(RuntimeError::Parse)?;
        let state = guard(&self.state);
        Ok(doc
            .services
            .keys()
            .map(|name| {
                let running = !state.stopped.contains(name);
                let status = ContainerStatus {
                    state: Some(if running { "running" } else { "exited" }.to_owned()),
                    status: Some(if running { "Up" } else { "Exited (0)" }.to_owned()),
                    created_at: Some(MOCK_CREATED_AT.to_owned()),
                };
                (name.clone(), status)
            })
            .collect())
    }

    fn is_pullable_image(&self, reference: &str) -> bool {
        !guard(&self.state).unpullable.contains(reference)
    }

    fn port_in_use(&self, port: u16) -> bool {
        guard(&self.state).bound_ports.contains(&port)
    }
}

#[derive(Default)]
struct VcsState {
    available: bool,
    calls: Vec<String>,
    with_dockerfile: BTreeSet<String>,
    failing_clones: BTreeSet<String>,
    pending: BTreeSet<PathBuf>,
}

/// Repositories are URLs ending in `.git`; cloning creates a small tree.
pub struct MockVcs {
    state: Mutex<VcsState>,
}

impl Default for MockVcs {
    fn default() -> Self {
        Self {
            state: Mutex::new(VcsState {
                available: true,
                ..VcsState::default()
            }),
        }
    }
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        guard(&self.state).available = available;
    }

    /// Clones of `url` will contain a Dockerfile.
    pub fn with_dockerfile(&self, url: &str) {
        guard(&self.state).with_dockerfile.insert(url.to_owned());
    }

    /// Clones of `url` fail halfway, leaving a partial directory.
    pub fn fail_clone(&self, url: &str) {
        guard(&self.state).failing_clones.insert(url.to_owned());
    }

    /// Make the checkout at `path` see one new upstream commit.
    pub fn push_upstream(&self, path: &Path) {
        guard(&self.state).pending.insert(path.to_path_buf());
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.state).calls.clone()
    }
}

impl VersionControl for MockVcs {
    fn available(&self) -> bool {
        guard(&self.state).available
    }

    fn is_remote(&self, url: &str) -> bool {
        url.ends_with(".git")
    }

    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), RuntimeError> {
        let (fails, dockerfile) = {
            let mut state = guard(&self.state);
            state.calls.push(format!("clone {url}"));
            (
                state.failing_clones.contains(url),
                state.with_dockerfile.contains(url),
            )
        };
        fs::create_dir_all(path)?;
        if fails {
            fs::write(path.join(".partial"), "")?;
            return Err(mock_failure("git clone", "mock clone failure"));
        }
        fs::write(path.join("README.md"), format!("cloned from {url}\n"))?;
        if dockerfile {
            fs::write(path.join("Dockerfile"), "FROM scratch\n")?;
        }
        Ok(())
    }

    fn has_upstream_changes(&self, path: &Path) -> Result<bool, RuntimeError> {
        let mut state = guard(&self.state);
        state.calls.push(format!("fetch {}", path.display()));
        Ok(state.pending.contains(path))
    }

    fn reset_to_upstream(&self, path: &Path) -> Result<(), RuntimeError> {
        let mut state = guard(&self.state);
        state.calls.push(format!("reset {}", path.display()));
        state.pending.remove(path);
        Ok(())
    }
}

#[derive(Default)]
struct PlannerState {
    available: bool,
    calls: Vec<PathBuf>,
    failing: BTreeSet<PathBuf>,
}

/// Writes a placeholder plan for every source.
pub struct MockPlanner {
    state: Mutex<PlannerState>,
}

impl Default for MockPlanner {
    fn default() -> Self {
        Self {
            state: Mutex::new(PlannerState {
                available: true,
                ..PlannerState::default()
            }),
        }
    }
}

impl MockPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        guard(&self.state).available = available;
    }

    pub fn fail_for(&self, source: &Path) {
        guard(&self.state).failing.insert(source.to_path_buf());
    }

    pub fn clear_failures(&self) {
        guard(&self.state).failing.clear();
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        guard(&self.state).calls.clone()
    }
}

impl PlanBuilder for MockPlanner {
    fn available(&self) -> bool {
        guard(&self.state).available
    }

    fn infer_plan(&self, source: &Path, plan_out: &Path) -> Result<(), RuntimeError> {
        let fails = {
            let mut state = guard(&self.state);
            state.calls.push(source.to_path_buf());
            state.failing.contains(source)
        };
        if fails {
            return Err(mock_failure("railpack prepare", "no provider matched"));
        }
        if let Some(dir) = plan_out.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(plan_out, "{\"steps\": []}\n")?;
        Ok(())
    }
}

/// Records unit installs instead of touching systemd.
#[derive(Default)]
pub struct MockSupervisor {
    installs: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installs(&self) -> Vec<(PathBuf, PathBuf)> {
        guard(&self.installs).clone()
    }
}

impl ServiceSupervisor for MockSupervisor {
    fn install(&self, executable: &Path, home: &Path) -> Result<(), RuntimeError> {
        guard(&self.installs).push((executable.to_path_buf(), home.to_path_buf()));
        Ok(())
    }
}
