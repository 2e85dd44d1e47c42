use crate::concurrency::CommandLock;
use crate::lifecycle::validate_transition;
use crate::report::{
    BuiltService, CreateReport, DeleteReport, DeployOutcome, InstallReport, ServiceFailure,
    ServiceStatus, UpdateReport,
};
use crate::resolver::BuildResolver;
use crate::CoreError;
use foundation_runtime::{
    check_collaborators, format_missing, run_installer, Collaborators, ContainerEngine, Tool,
};
use foundation_schema::{
    parse_environment, parse_volumes, proxy_document, services_document, BuildStrategy,
    ComposeDocument, ImageSource, PublicExposure, RestartPolicy, ServiceName, ServiceOrigin,
    ServiceRecord, ServiceSpec, Settings, ACME_SERVICE, PROXY_PORTS, PROXY_SERVICE,
};
use foundation_store::{DocumentKind, DocumentStore, ServiceState, StateStore, StoreLayout};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A request to register a new managed service.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: String,
    /// Git repository URL or image reference.
    pub source: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub letsencrypt_email: Option<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub restart: RestartPolicy,
    pub gpu: bool,
}

/// Orchestrates the service lifecycle for one Foundation home.
///
/// Every mutation of the compose documents goes through the
/// [`DocumentStore`], which validates before replacing anything on disk.
/// Callers hold a [`CommandLock`] around each public operation.
pub struct Engine {
    layout: StoreLayout,
    settings: Settings,
    documents: DocumentStore,
    ledger: StateStore,
    collaborators: Collaborators,
}

impl Engine {
    /// Open the home at `home`, reading `config.toml` if present.
    pub fn new(home: impl Into<PathBuf>, collaborators: Collaborators) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(home);
        let settings = Settings::load(&layout.settings_file())?;
        Ok(Self::with_settings(layout, settings, collaborators))
    }

    pub fn with_settings(
        layout: StoreLayout,
        settings: Settings,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            documents: DocumentStore::new(layout.clone()),
            ledger: StateStore::new(layout.clone()),
            layout,
            settings,
            collaborators,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    fn container_engine(&self) -> &dyn ContainerEngine {
        &*self.collaborators.engine
    }

    fn resolver(&self) -> BuildResolver<'_> {
        BuildResolver::new(
            &self.layout,
            &self.settings.namespace,
            &*self.collaborators.engine,
            &*self.collaborators.planner,
        )
    }

    /// Take the command lock, failing fast when another command holds it.
    pub fn lock(&self) -> Result<CommandLock, CoreError> {
        CommandLock::try_acquire(&self.layout.lock_file())
    }

    /// Take the command lock, waiting for a running command to finish.
    pub fn lock_blocking(&self) -> Result<CommandLock, CoreError> {
        CommandLock::acquire(&self.layout.lock_file())
    }

    /// Initialize the home, record `email` as the default Let's Encrypt
    /// contact and write both compose documents. Services already present in
    /// a readable services document are kept.
    pub fn install(&mut self, email: &str) -> Result<InstallReport, CoreError> {
        info!("installing into {}", self.layout.root().display());
        self.layout.initialize()?;

        self.settings.default_email = Some(email.to_owned());
        self.settings.save(&self.layout.settings_file())?;

        let proxy = proxy_document(&self.settings, email);
        self.documents
            .write(DocumentKind::Proxy, &proxy, self.container_engine())?;

        let (services, volumes) = match self.documents.load(DocumentKind::Services) {
            Ok(existing) => (existing.services, existing.volumes),
            Err(e) => {
                if self.documents.exists(DocumentKind::Services) {
                    warn!("replacing unreadable services document: {e}");
                }
                (BTreeMap::new(), BTreeMap::new())
            }
        };
        let preserved_services = services.len();
        let doc = services_document(&self.settings, services, volumes);
        self.documents
            .write(DocumentKind::Services, &doc, self.container_engine())?;

        Ok(InstallReport {
            home: self.layout.root().to_path_buf(),
            email: email.to_owned(),
            preserved_services,
        })
    }

    /// Run the official installer of every missing tool that has one.
    /// Returns the tools that were installed.
    pub fn bootstrap_prerequisites(&self) -> Result<Vec<Tool>, CoreError> {
        let missing = check_collaborators(
            &*self.collaborators.engine,
            &*self.collaborators.vcs,
            &*self.collaborators.planner,
        );
        let mut installed = Vec::new();
        for tool in missing.iter().filter_map(|m| m.installer) {
            run_installer(tool, self.settings.build_timeout())?;
            installed.push(tool);
        }
        Ok(installed)
    }

    /// Register the watcher with the OS service supervisor.
    pub fn install_supervisor(&self, executable: &Path) -> Result<(), CoreError> {
        self.collaborators
            .supervisor
            .install(executable, self.layout.root())?;
        Ok(())
    }

    /// Check that collaborators are usable and both documents are in place.
    /// With `require_proxy`, the proxy containers must also be running.
    pub fn preflight(&self, require_proxy: bool) -> Result<(), CoreError> {
        let missing = check_collaborators(
            &*self.collaborators.engine,
            &*self.collaborators.vcs,
            &*self.collaborators.planner,
        );
        if !missing.is_empty() {
            return Err(CoreError::CollaboratorUnavailable(format_missing(&missing)));
        }

        self.documents
            .read(DocumentKind::Proxy, self.container_engine())?;
        self.documents
            .read(DocumentKind::Services, self.container_engine())?;

        if require_proxy {
            let containers = self
                .container_engine()
                .status(&self.documents.path(DocumentKind::Proxy))?;
            let inactive: Vec<String> = [PROXY_SERVICE, ACME_SERVICE]
                .into_iter()
                .filter(|name| !containers.get(*name).is_some_and(|c| c.is_running()))
                .map(str::to_owned)
                .collect();
            if !inactive.is_empty() {
                return Err(CoreError::ProxyInactive(inactive));
            }
        }
        Ok(())
    }

    /// Register a service, then update and deploy.
    pub fn create(&self, request: CreateRequest) -> Result<CreateReport, CoreError> {
        let name = ServiceName::parse(&request.name)?;
        let mut doc = self
            .documents
            .read(DocumentKind::Services, self.container_engine())?;
        if doc.contains(&name) {
            return Err(CoreError::DuplicateService(name.into_inner()));
        }

        // Everything that can be rejected is checked before the clone.
        let environment = parse_environment(&request.env)?;
        let volumes = parse_volumes(&request.volumes)?;
        let exposure = match request.host {
            Some(host) => {
                let email = request
                    .letsencrypt_email
                    .or_else(|| self.settings.default_email.clone())
                    .ok_or_else(|| CoreError::MissingEmail(name.to_string()))?;
                Some(PublicExposure {
                    host,
                    port: request.port.unwrap_or(PublicExposure::DEFAULT_PORT),
                    letsencrypt_email: email,
                })
            }
            None => None,
        };

        let checkout = self.layout.checkout_dir(&name);
        let (source, strategy) = if self.collaborators.vcs.is_remote(&request.source) {
            self.clone_checkout(&request.source, &checkout)?;
            let resolution = self.resolver().classify(&name, &checkout);
            (resolution.source, resolution.strategy)
        } else if self
            .container_engine()
            .is_pullable_image(&request.source)
        {
            (
                ImageSource::Image(request.source.clone()),
                BuildStrategy::Image,
            )
        } else {
            return Err(CoreError::InvalidSource(request.source));
        };
        info!("registering {name} ({strategy}) from {}", request.source);

        let spec = ServiceSpec {
            name: name.clone(),
            source,
            origin: ServiceOrigin {
                source: request.source,
                strategy,
            },
            exposure,
            environment,
            volumes,
            restart: request.restart,
            gpu: request.gpu,
            network: doc.shared_network()?.to_owned(),
        };
        doc.insert_service(name.as_str(), spec.into_record());

        if let Err(e) = self
            .documents
            .write(DocumentKind::Services, &doc, self.container_engine())
        {
            remove_dir_best_effort(&checkout);
            return Err(e.into());
        }
        self.transition(&name, ServiceState::Registered, None, None)?;

        let update = self.update()?;
        let deploy = self.deploy()?;
        Ok(CreateReport {
            service: name.into_inner(),
            strategy,
            update,
            deploy,
        })
    }

    fn clone_checkout(&self, url: &str, checkout: &Path) -> Result<(), CoreError> {
        if checkout.exists() {
            warn!("removing stale checkout {}", checkout.display());
            fs::remove_dir_all(checkout)?;
        }
        if let Err(e) = self.collaborators.vcs.clone_repo(url, checkout) {
            remove_dir_best_effort(checkout);
            return Err(e.into());
        }
        Ok(())
    }

    fn is_checkout_backed(&self, name: &str, record: &ServiceRecord) -> bool {
        record.strategy() != BuildStrategy::Image || self.layout.checkout_dir(name).is_dir()
    }

    /// Pull images, refresh checkouts from upstream, re-resolve and rebuild.
    ///
    /// A failing service is reported and skipped; the others still update.
    /// The services document is only rewritten when it changed.
    pub fn update(&self) -> Result<UpdateReport, CoreError> {
        let mut doc = self
            .documents
            .read(DocumentKind::Services, self.container_engine())?;
        let doc_path = self.documents.path(DocumentKind::Services);
        let mut report = UpdateReport::default();

        let mut checkout_backed = Vec::new();
        let mut image_backed = Vec::new();
        for (name, record) in &doc.services {
            if self.is_checkout_backed(name, record) {
                checkout_backed.push(name.clone());
            } else {
                image_backed.push(name.clone());
            }
        }

        for name in image_backed {
            match self.container_engine().pull(&doc_path, &name) {
                Ok(()) => {
                    let artifact = doc
                        .service(&name)
                        .and_then(|r| r.source.image())
                        .map(str::to_owned);
                    self.transition_lenient(&name, ServiceState::Built, artifact, None)?;
                    report.pulled.push(name);
                }
                Err(e) => self.record_failure(&mut report, name, &CoreError::from(e))?,
            }
        }

        let mut dockerfile_services = Vec::new();
        for name in checkout_backed {
            match self.refresh_checkout(&name, &mut doc, &mut report) {
                Ok((BuildStrategy::Dockerfile, previous)) => {
                    dockerfile_services.push((name, previous));
                }
                Ok((strategy, _)) => {
                    let artifact = doc
                        .service(&name)
                        .and_then(|r| r.source.image())
                        .map(str::to_owned);
                    self.transition_lenient(&name, ServiceState::Built, artifact, None)?;
                    report.built.push(BuiltService {
                        service: name,
                        strategy,
                    });
                }
                Err(e) => self.record_failure(&mut report, name, &e)?,
            }
        }

        report.document_changed = self.documents.write_if_changed(
            DocumentKind::Services,
            &doc,
            self.container_engine(),
        )?;

        // `compose build` reads the build context from the written document,
        // so a failed build has to put the previous source back afterwards.
        let mut restored = false;
        for (name, previous) in dockerfile_services {
            info!("{name}: building from its build file");
            match self.container_engine().build_service(&doc_path, &name) {
                Ok(()) => {
                    self.transition_lenient(&name, ServiceState::Built, None, None)?;
                    report.built.push(BuiltService {
                        service: name,
                        strategy: BuildStrategy::Dockerfile,
                    });
                }
                Err(e) => {
                    if let Some((source, strategy)) = previous {
                        if let Some(record) = doc.services.get_mut(&name) {
                            if record.source != source {
                                record.set_source(source, strategy);
                                restored = true;
                            }
                        }
                    }
                    let e = CoreError::BuildFailed {
                        service: name.clone(),
                        reason: e.to_string(),
                    };
                    self.record_failure(&mut report, name, &e)?;
                }
            }
        }
        if restored {
            report.document_changed |= self.documents.write_if_changed(
                DocumentKind::Services,
                &doc,
                self.container_engine(),
            )?;
        }

        debug!(
            "update finished: {} built, {} failed",
            report.built.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Bring one checkout up to date and re-resolve its build strategy.
    /// Returns the new strategy and the source the record held before.
    fn refresh_checkout(
        &self,
        name: &str,
        doc: &mut ComposeDocument,
        report: &mut UpdateReport,
    ) -> Result<(BuildStrategy, Option<(ImageSource, BuildStrategy)>), CoreError> {
        let service = ServiceName::parse(name)?;
        let checkout = self.layout.checkout_dir(name);
        if !checkout.is_dir() {
            return Err(CoreError::BuildFailed {
                service: name.to_owned(),
                reason: format!("checkout {} is missing", checkout.display()),
            });
        }

        let vcs = &self.collaborators.vcs;
        if vcs.has_upstream_changes(&checkout)? {
            info!("{name}: pulling upstream changes");
            vcs.reset_to_upstream(&checkout)?;
            report.refreshed.push(name.to_owned());
        }

        let resolution = self.resolver().resolve(&service, &checkout)?;
        let previous = doc.services.get_mut(name).map(|record| {
            let previous = (record.source.clone(), record.strategy());
            record.set_source(resolution.source, resolution.strategy);
            previous
        });
        Ok((resolution.strategy, previous))
    }

    fn record_failure(
        &self,
        report: &mut UpdateReport,
        name: String,
        error: &CoreError,
    ) -> Result<(), CoreError> {
        warn!("{name}: update failed: {error}");
        self.transition_lenient(&name, ServiceState::Registered, None, Some(error.to_string()))?;
        report.failures.push(ServiceFailure {
            service: name,
            reason: error.to_string(),
        });
        Ok(())
    }

    /// Remove a service and reconcile. Its named volumes are kept.
    pub fn delete(&self, name: &str) -> Result<DeleteReport, CoreError> {
        let mut doc = self
            .documents
            .read(DocumentKind::Services, self.container_engine())?;
        let removed = doc.remove_service(name).is_some();
        if removed {
            info!("removing {name}");
            self.documents
                .write(DocumentKind::Services, &doc, self.container_engine())?;
        } else {
            debug!("{name} is not registered");
        }

        // Only a valid name can own a checkout; anything else could escape
        // the services directory.
        if ServiceName::parse(name).is_ok() {
            remove_dir_best_effort(&self.layout.checkout_dir(name));
            let plan = self.layout.plan_path(name);
            if plan.exists() {
                if let Err(e) = fs::remove_file(&plan) {
                    warn!("could not remove {}: {e}", plan.display());
                }
            }
        }
        self.transition(name, ServiceState::Absent, None, None)?;

        let update = self.update()?;
        let deploy = self.deploy()?;
        Ok(DeleteReport {
            service: name.to_owned(),
            removed,
            update,
            deploy,
        })
    }

    /// Apply the proxy stack, then the services stack.
    pub fn deploy(&self) -> Result<DeployOutcome, CoreError> {
        let engine = self.container_engine();

        let proxy_path = self.documents.path(DocumentKind::Proxy);
        if let Err(e) = engine.apply(&proxy_path, false) {
            let bound: Vec<u16> = PROXY_PORTS
                .into_iter()
                .filter(|port| engine.port_in_use(*port))
                .collect();
            if !bound.is_empty() {
                return Err(CoreError::PortConflict(bound));
            }
            return Err(CoreError::DeployFailed {
                document: DocumentKind::Proxy.to_string(),
                reason: e.to_string(),
            });
        }

        let doc = self.documents.read(DocumentKind::Services, engine)?;
        let services_path = self.documents.path(DocumentKind::Services);
        let deploy_failed = |e: foundation_runtime::RuntimeError| CoreError::DeployFailed {
            document: DocumentKind::Services.to_string(),
            reason: e.to_string(),
        };

        if doc.services.is_empty() {
            engine
                .remove_orphans(&services_path)
                .map_err(deploy_failed)?;
            info!("no services to deploy");
            return Ok(DeployOutcome::NothingToDeploy);
        }

        engine.apply(&services_path, true).map_err(deploy_failed)?;

        let ledger = self.ledger.all()?;
        for name in doc.services.keys() {
            let built = ledger
                .get(name)
                .is_some_and(|e| matches!(e.state, ServiceState::Built | ServiceState::Deployed));
            if built {
                self.transition(name, ServiceState::Deployed, None, None)?;
            }
        }
        let services: Vec<String> = doc.services.keys().cloned().collect();
        info!("deployed {} service(s)", services.len());
        Ok(DeployOutcome::Deployed { services })
    }

    /// Container state of every registered service, merged with what the
    /// document and the ledger know about it.
    pub fn status(&self) -> Result<Vec<ServiceStatus>, CoreError> {
        let doc = self
            .documents
            .read(DocumentKind::Services, self.container_engine())?;
        let mut containers = self
            .container_engine()
            .status(&self.documents.path(DocumentKind::Services))?;
        let ledger = self.ledger.all()?;

        Ok(doc
            .services
            .iter()
            .map(|(name, record)| {
                let container = containers.remove(name).unwrap_or_default();
                ServiceStatus {
                    name: name.clone(),
                    state: container.state,
                    status: container.status,
                    created_at: container.created_at,
                    host: record.public_host().map(str::to_owned),
                    strategy: record.strategy(),
                    lifecycle: ledger
                        .get(name)
                        .map_or(ServiceState::Registered, |e| e.state),
                }
            })
            .collect())
    }

    fn transition(
        &self,
        name: &str,
        to: ServiceState,
        artifact: Option<String>,
        last_error: Option<String>,
    ) -> Result<(), CoreError> {
        let from = self.ledger.state_of(name)?;
        validate_transition(from, to)?;
        if to == ServiceState::Absent {
            self.ledger.remove(name)?;
        } else {
            self.ledger.record(name, to, artifact, last_error)?;
        }
        debug!("{name}: {from} -> {to}");
        Ok(())
    }

    /// Like [`transition`](Self::transition), for services that may predate
    /// the ledger: an unknown service counts as registered.
    fn transition_lenient(
        &self,
        name: &str,
        to: ServiceState,
        artifact: Option<String>,
        last_error: Option<String>,
    ) -> Result<(), CoreError> {
        if self.ledger.state_of(name)? == ServiceState::Absent {
            self.ledger
                .record(name, ServiceState::Registered, None, None)?;
        }
        self.transition(name, to, artifact, last_error)
    }
}

fn remove_dir_best_effort(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("could not remove {}: {e}", path.display());
        }
    }
}

