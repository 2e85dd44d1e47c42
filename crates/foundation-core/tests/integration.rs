use foundation_core::{CoreError, CreateRequest, DeployOutcome, Engine, ErrorCategory};
use foundation_runtime::mock::{MockEngine, MockPlanner, MockSupervisor, MockVcs};
use foundation_runtime::Collaborators;
use foundation_schema::{BuildStrategy, SchemaError, Settings};
use foundation_store::{
    DocumentKind, DocumentStore, ServiceState, StateStore, StoreError, StoreLayout,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const EMAIL: &str = "ops@example.com";

struct Fixture {
    home: tempfile::TempDir,
    engine: Engine,
    docker: Arc<MockEngine>,
    vcs: Arc<MockVcs>,
    planner: Arc<MockPlanner>,
    supervisor: Arc<MockSupervisor>,
}

impl Fixture {
    fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        let docker = Arc::new(MockEngine::new());
        let vcs = Arc::new(MockVcs::new());
        let planner = Arc::new(MockPlanner::new());
        let supervisor = Arc::new(MockSupervisor::new());
        let engine = Engine::with_settings(
            StoreLayout::new(home.path()),
            Settings::default(),
            Self::collaborators(&docker, &vcs, &planner, &supervisor),
        );
        Self {
            home,
            engine,
            docker,
            vcs,
            planner,
            supervisor,
        }
    }

    fn installed() -> Self {
        let mut fx = Self::new();
        fx.engine.install(EMAIL).unwrap();
        fx.docker.clear_calls();
        fx
    }

    fn collaborators(
        docker: &Arc<MockEngine>,
        vcs: &Arc<MockVcs>,
        planner: &Arc<MockPlanner>,
        supervisor: &Arc<MockSupervisor>,
    ) -> Collaborators {
        Collaborators {
            engine: docker.clone(),
            vcs: vcs.clone(),
            planner: planner.clone(),
            supervisor: supervisor.clone(),
        }
    }

    /// A second engine on the same home that never saw `install`.
    fn engine_without_email(&self) -> Engine {
        Engine::with_settings(
            StoreLayout::new(self.home.path()),
            Settings::default(),
            Self::collaborators(&self.docker, &self.vcs, &self.planner, &self.supervisor),
        )
    }

    fn layout(&self) -> StoreLayout {
        StoreLayout::new(self.home.path())
    }

    fn services_path(&self) -> PathBuf {
        self.layout().services_document()
    }

    fn services_bytes(&self) -> Vec<u8> {
        fs::read(self.services_path()).unwrap()
    }

    fn ledger(&self) -> StateStore {
        StateStore::new(self.layout())
    }

    fn documents(&self) -> DocumentStore {
        DocumentStore::new(self.layout())
    }
}

fn request(name: &str, source: &str) -> CreateRequest {
    CreateRequest {
        name: name.to_owned(),
        source: source.to_owned(),
        ..CreateRequest::default()
    }
}

fn exposed(name: &str, source: &str, host: &str) -> CreateRequest {
    CreateRequest {
        host: Some(host.to_owned()),
        ..request(name, source)
    }
}

fn staged_leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".compose-"))
        .collect()
}

#[test]
fn install_writes_both_documents_and_settings() {
    let mut fx = Fixture::new();
    let report = fx.engine.install(EMAIL).unwrap();

    assert_eq!(report.preserved_services, 0);
    let layout = fx.layout();
    assert!(layout.proxy_document().is_file());
    assert!(layout.services_document().is_file());
    assert!(layout.settings_file().is_file());

    let proxy = fx.documents().load(DocumentKind::Proxy).unwrap();
    assert_eq!(
        proxy.service("nginx-proxy-acme").unwrap().environment["DEFAULT_EMAIL"],
        EMAIL
    );
    let saved = Settings::load(&layout.settings_file()).unwrap();
    assert_eq!(saved.default_email.as_deref(), Some(EMAIL));
}

#[test]
fn reinstall_keeps_registered_services() {
    let mut fx = Fixture::installed();
    fx.engine.create(request("web", "nginx:alpine")).unwrap();

    let report = fx.engine.install("new@example.com").unwrap();
    assert_eq!(report.preserved_services, 1);
    assert!(fx
        .documents()
        .load(DocumentKind::Services)
        .unwrap()
        .contains("web"));
}

#[test]
fn install_registers_watcher_with_supervisor() {
    let fx = Fixture::installed();
    fx.engine
        .install_supervisor(Path::new("/usr/local/bin/foundation"))
        .unwrap();
    let installs = fx.supervisor.installs();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].1, fx.home.path());
}

#[test]
fn commands_before_install_report_not_initialized() {
    let fx = Fixture::new();
    let err = fx.engine.status().unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::NotInitialized(_))));
    assert_eq!(err.category(), ErrorCategory::Store);
}

#[test]
fn image_service_create_then_delete() {
    let fx = Fixture::installed();
    let report = fx
        .engine
        .create(exposed("web", "nginx:alpine", "web.example.com"))
        .unwrap();
    assert_eq!(report.strategy, BuildStrategy::Image);
    assert_eq!(report.update.pulled, ["web"]);
    assert_eq!(
        report.deploy,
        DeployOutcome::Deployed {
            services: vec!["web".to_owned()]
        }
    );

    let calls = fx.docker.calls();
    assert!(calls.contains(&"pull web".to_owned()));
    assert!(calls.contains(&"apply foundation orphans=false".to_owned()));
    assert!(calls.contains(&"apply foundation-services orphans=true".to_owned()));

    let status = fx.engine.status().unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].host.as_deref(), Some("web.example.com"));
    assert_eq!(status[0].state.as_deref(), Some("running"));
    assert_eq!(status[0].lifecycle, ServiceState::Deployed);

    let deleted = fx.engine.delete("web").unwrap();
    assert!(deleted.removed);
    assert_eq!(deleted.deploy, DeployOutcome::NothingToDeploy);
    assert!(fx
        .docker
        .calls()
        .contains(&"remove-orphans foundation-services".to_owned()));
    assert_eq!(fx.ledger().state_of("web").unwrap(), ServiceState::Absent);
    assert!(fx.engine.status().unwrap().is_empty());
}

#[test]
fn deleting_an_unknown_service_still_reconciles() {
    let fx = Fixture::installed();
    let before = fx.services_bytes();
    let report = fx.engine.delete("ghost").unwrap();
    assert!(!report.removed);
    assert_eq!(report.deploy, DeployOutcome::NothingToDeploy);
    assert_eq!(fx.services_bytes(), before);
}

#[test]
fn repository_without_build_file_uses_inferred_plan() {
    let fx = Fixture::installed();
    let report = fx
        .engine
        .create(exposed(
            "svc1",
            "https://example.com/svc1.git",
            "svc1.example.com",
        ))
        .unwrap();
    assert_eq!(report.strategy, BuildStrategy::InferredPlan);
    assert!(report.update.failures.is_empty());

    let layout = fx.layout();
    assert!(layout.checkout_dir("svc1").join("README.md").is_file());
    assert!(layout.plan_path("svc1").is_file());
    assert!(fx
        .docker
        .calls()
        .contains(&"build-plan foundation/svc1".to_owned()));

    let status = fx.engine.status().unwrap();
    assert_eq!(status[0].host.as_deref(), Some("svc1.example.com"));
    assert_eq!(status[0].strategy, BuildStrategy::InferredPlan);

    let entry = fx.ledger().get("svc1").unwrap().unwrap();
    assert_eq!(entry.state, ServiceState::Deployed);
    assert_eq!(entry.artifact.as_deref(), Some("foundation/svc1"));

    fx.engine.delete("svc1").unwrap();
    assert!(!layout.checkout_dir("svc1").exists());
    assert!(!layout.plan_path("svc1").exists());
}

#[test]
fn repository_with_dockerfile_is_built_by_compose() {
    let fx = Fixture::installed();
    let url = "https://example.com/svc2.git";
    fx.vcs.with_dockerfile(url);

    let report = fx.engine.create(request("svc2", url)).unwrap();
    assert_eq!(report.strategy, BuildStrategy::Dockerfile);
    assert!(fx.docker.calls().contains(&"build svc2".to_owned()));
    assert!(fx.planner.calls().is_empty());

    let doc = fx.documents().load(DocumentKind::Services).unwrap();
    let build = doc.service("svc2").unwrap().source.build().unwrap().clone();
    assert_eq!(
        Path::new(&build.context),
        fx.layout().checkout_dir("svc2").as_path()
    );
}

#[test]
fn upstream_changes_are_pulled_on_update() {
    let fx = Fixture::installed();
    fx.engine
        .create(request("svc1", "https://example.com/svc1.git"))
        .unwrap();

    let checkout = fx.layout().checkout_dir("svc1");
    fx.vcs.push_upstream(&checkout);
    let report = fx.engine.update().unwrap();
    assert_eq!(report.refreshed, ["svc1"]);

    let report = fx.engine.update().unwrap();
    assert!(report.refreshed.is_empty());
}

#[test]
fn repeated_update_leaves_document_byte_identical() {
    let fx = Fixture::installed();
    fx.engine
        .create(exposed("web", "nginx:alpine", "web.example.com"))
        .unwrap();
    fx.engine
        .create(request("svc1", "https://example.com/svc1.git"))
        .unwrap();
    let url = "https://example.com/svc2.git";
    fx.vcs.with_dockerfile(url);
    fx.engine.create(request("svc2", url)).unwrap();

    let first = fx.engine.update().unwrap();
    let before = fx.services_bytes();
    let plans_before = fx.planner.calls().len();
    fx.docker.clear_calls();
    let second = fx.engine.update().unwrap();

    assert!(!first.document_changed);
    assert!(!second.document_changed);
    assert_eq!(fx.services_bytes(), before);

    // One pull per image service and one rebuild per checkout, nothing more.
    assert_eq!(
        fx.docker.calls(),
        ["pull web", "build-plan foundation/svc1", "build svc2"]
    );
    assert_eq!(fx.planner.calls().len(), plans_before + 1);
}

#[test]
fn rejected_document_keeps_previous_bytes() {
    let fx = Fixture::installed();
    fx.engine.create(request("web", "nginx:alpine")).unwrap();
    let before = fx.services_bytes();

    fx.docker.reject_validation(true);
    let err = fx
        .engine
        .create(request("api", "redis:7"))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Store(StoreError::InvalidDocument { .. })
    ));

    assert_eq!(fx.services_bytes(), before);
    assert!(staged_leftovers(&fx.layout().services_dir()).is_empty());
}

#[test]
fn duplicate_name_is_rejected() {
    let fx = Fixture::installed();
    fx.engine.create(request("web", "nginx:alpine")).unwrap();
    let err = fx
        .engine
        .create(request("web", "nginx:latest"))
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateService(ref n) if n == "web"));
    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[test]
fn invalid_input_is_rejected_before_cloning() {
    let fx = Fixture::installed();
    let url = "https://example.com/svc1.git";

    let err = fx
        .engine
        .create(CreateRequest {
            volumes: vec!["/srv/data:/data".to_owned()],
            ..request("svc1", url)
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Schema(SchemaError::HostPathNotAllowed(_))
    ));

    let err = fx
        .engine
        .create(CreateRequest {
            env: vec!["NOEQUALS".to_owned()],
            ..request("svc1", url)
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Schema(SchemaError::MalformedEnvEntry(_))
    ));

    let err = fx.engine.create(request("Bad_Name", url)).unwrap_err();
    assert!(matches!(err, CoreError::Schema(SchemaError::InvalidName { .. })));

    assert!(fx.vcs.calls().is_empty());
    assert!(!fx.layout().checkout_dir("svc1").exists());
}

#[test]
fn exposed_service_needs_an_email() {
    let fx = Fixture::installed();
    let engine = fx.engine_without_email();
    let err = engine
        .create(exposed("web", "nginx:alpine", "web.example.com"))
        .unwrap_err();
    assert!(matches!(err, CoreError::MissingEmail(_)));

    let ok = engine.create(CreateRequest {
        letsencrypt_email: Some("web@example.com".to_owned()),
        ..exposed("web", "nginx:alpine", "web.example.com")
    });
    assert!(ok.is_ok());
}

#[test]
fn unpullable_source_is_invalid() {
    let fx = Fixture::installed();
    fx.docker.mark_unpullable("nosuch/image:1");
    let err = fx
        .engine
        .create(request("web", "nosuch/image:1"))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidSource(_)));
    assert!(!fx
        .documents()
        .load(DocumentKind::Services)
        .unwrap()
        .contains("web"));
}

#[test]
fn failed_clone_leaves_nothing_behind() {
    let fx = Fixture::installed();
    let url = "https://example.com/broken.git";
    fx.vcs.fail_clone(url);

    let before = fx.services_bytes();
    assert!(fx.engine.create(request("broken", url)).is_err());
    assert!(!fx.layout().checkout_dir("broken").exists());
    assert_eq!(fx.services_bytes(), before);
    assert_eq!(fx.ledger().state_of("broken").unwrap(), ServiceState::Absent);
}

#[test]
fn one_failing_service_does_not_block_others() {
    let fx = Fixture::installed();
    fx.engine
        .create(request("alpha", "https://example.com/alpha.git"))
        .unwrap();
    fx.engine
        .create(request("beta", "https://example.com/beta.git"))
        .unwrap();

    fx.planner.fail_for(&fx.layout().checkout_dir("alpha"));
    fx.docker.clear_calls();
    let report = fx.engine.update().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service, "alpha");
    assert!(report.built.iter().any(|b| b.service == "beta"));
    assert!(fx
        .docker
        .calls()
        .contains(&"build-plan foundation/beta".to_owned()));

    let alpha = fx.ledger().get("alpha").unwrap().unwrap();
    assert_eq!(alpha.state, ServiceState::Registered);
    assert!(alpha.last_error.is_some());
    assert_eq!(
        fx.ledger().state_of("beta").unwrap(),
        ServiceState::Built
    );
}

#[test]
fn failed_build_recovers_on_next_update() {
    let fx = Fixture::installed();
    let url = "https://example.com/svc2.git";
    fx.vcs.with_dockerfile(url);
    fx.docker.fail_build("svc2");

    let report = fx.engine.create(request("svc2", url)).unwrap();
    assert_eq!(report.update.failures[0].service, "svc2");
    assert_eq!(
        fx.ledger().state_of("svc2").unwrap(),
        ServiceState::Registered
    );

    fx.docker.clear_build_failures();
    let report = fx.engine.update().unwrap();
    assert!(report.is_clean());
    fx.engine.deploy().unwrap();
    assert_eq!(
        fx.ledger().state_of("svc2").unwrap(),
        ServiceState::Deployed
    );
}

#[test]
fn pull_failure_is_isolated_to_its_service() {
    let fx = Fixture::installed();
    fx.engine.create(request("api", "redis:7")).unwrap();
    fx.engine.create(request("web", "nginx:alpine")).unwrap();
    fx.docker.fail_pull("api");
    fx.docker.clear_calls();

    let report = fx.engine.update().unwrap();
    assert_eq!(report.pulled, ["web"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service, "api");
    assert!(!report.is_clean());
    assert_eq!(fx.docker.calls(), ["pull api", "pull web"]);

    let api = fx.ledger().get("api").unwrap().unwrap();
    assert_eq!(api.state, ServiceState::Registered);
    assert!(api.last_error.is_some());
    assert_eq!(api.artifact.as_deref(), Some("redis:7"));
    assert_eq!(fx.ledger().state_of("web").unwrap(), ServiceState::Built);
}

#[test]
fn service_created_while_its_pull_fails_is_reported() {
    let fx = Fixture::installed();
    fx.docker.fail_pull("api");

    let report = fx.engine.create(request("api", "redis:7")).unwrap();
    assert_eq!(report.update.failures.len(), 1);
    assert_eq!(report.update.failures[0].service, "api");
    assert!(fx
        .ledger()
        .get("api")
        .unwrap()
        .unwrap()
        .last_error
        .is_some());
}

#[test]
fn failed_build_after_switch_to_dockerfile_keeps_previous_image() {
    let fx = Fixture::installed();
    fx.engine
        .create(request("svc", "https://example.com/svc.git"))
        .unwrap();
    let before = fx.services_bytes();

    fs::write(
        fx.layout().checkout_dir("svc").join("Dockerfile"),
        "FROM scratch\n",
    )
    .unwrap();
    fx.docker.fail_build("svc");
    let report = fx.engine.update().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].service, "svc");
    assert!(fx.docker.calls().contains(&"build svc".to_owned()));

    let doc = fx.documents().load(DocumentKind::Services).unwrap();
    let record = doc.service("svc").unwrap();
    assert_eq!(record.source.image(), Some("foundation/svc"));
    assert_eq!(record.strategy(), BuildStrategy::InferredPlan);
    assert_eq!(fx.services_bytes(), before);

    let entry = fx.ledger().get("svc").unwrap().unwrap();
    assert_eq!(entry.state, ServiceState::Registered);
    assert_eq!(entry.artifact.as_deref(), Some("foundation/svc"));

    fx.docker.clear_build_failures();
    let report = fx.engine.update().unwrap();
    assert!(report.is_clean());
    let doc = fx.documents().load(DocumentKind::Services).unwrap();
    assert_eq!(
        doc.service("svc").unwrap().strategy(),
        BuildStrategy::Dockerfile
    );
}

#[test]
fn empty_stack_deploys_nothing() {
    let fx = Fixture::installed();
    assert_eq!(fx.engine.deploy().unwrap(), DeployOutcome::NothingToDeploy);
    assert_eq!(
        fx.docker.calls(),
        [
            "apply foundation orphans=false",
            "remove-orphans foundation-services"
        ]
    );
}

#[test]
fn proxy_failure_with_bound_ports_is_port_conflict() {
    let fx = Fixture::installed();
    fx.docker.fail_apply("foundation");

    let err = fx.engine.deploy().unwrap_err();
    assert!(matches!(err, CoreError::DeployFailed { ref document, .. } if document == "proxy"));

    fx.docker.bind_port(443);
    let err = fx.engine.deploy().unwrap_err();
    assert!(matches!(err, CoreError::PortConflict(ref ports) if ports == &[443]));
}

#[test]
fn services_failure_is_deploy_failed() {
    let fx = Fixture::installed();
    fx.engine.create(request("web", "nginx:alpine")).unwrap();
    fx.docker.fail_apply("foundation-services");
    let err = fx.engine.deploy().unwrap_err();
    assert!(
        matches!(err, CoreError::DeployFailed { ref document, .. } if document == "services")
    );
}

#[test]
fn preflight_checks_proxy_containers() {
    let fx = Fixture::installed();
    fx.engine.preflight(true).unwrap();

    fx.docker.stop("nginx-proxy");
    let err = fx.engine.preflight(true).unwrap_err();
    assert!(matches!(err, CoreError::ProxyInactive(ref names) if names == &["nginx-proxy"]));
    assert_eq!(err.category(), ErrorCategory::Prerequisite);

    fx.engine.preflight(false).unwrap();
}

#[test]
fn preflight_reports_missing_tools() {
    let fx = Fixture::installed();
    fx.planner.set_available(false);
    let err = fx.engine.preflight(false).unwrap_err();
    assert!(matches!(err, CoreError::CollaboratorUnavailable(ref msg) if msg.contains("railpack")));
}

#[test]
fn second_command_is_busy() {
    let fx = Fixture::installed();
    let _held = fx.engine.lock().unwrap();
    let err = fx.engine.lock().err().unwrap();
    assert!(matches!(err, CoreError::Busy(_)));
    assert_eq!(err.category(), ErrorCategory::Store);
}
