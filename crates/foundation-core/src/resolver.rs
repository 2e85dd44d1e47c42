use crate::CoreError;
use foundation_runtime::{ContainerEngine, PlanBuilder};
use foundation_schema::{ArtifactTag, BuildContext, BuildStrategy, ImageSource, ServiceName};
use foundation_store::StoreLayout;
use std::path::Path;
use tracing::{debug, info};

/// Build files looked up at the checkout root, in order of preference.
pub const BUILD_FILES: [&str; 2] = ["Dockerfile", "Containerfile"];

/// How a checkout-backed service is to be built and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub source: ImageSource,
    pub strategy: BuildStrategy,
    /// Tag of the image produced from an inferred plan.
    pub artifact: Option<ArtifactTag>,
}

pub fn find_build_file(checkout: &Path) -> Option<&'static str> {
    BUILD_FILES
        .into_iter()
        .find(|file| checkout.join(file).is_file())
}

/// Decides between a build file and an inferred plan, and builds plan images.
pub struct BuildResolver<'a> {
    layout: &'a StoreLayout,
    namespace: &'a str,
    engine: &'a dyn ContainerEngine,
    planner: &'a dyn PlanBuilder,
}

impl<'a> BuildResolver<'a> {
    pub fn new(
        layout: &'a StoreLayout,
        namespace: &'a str,
        engine: &'a dyn ContainerEngine,
        planner: &'a dyn PlanBuilder,
    ) -> Self {
        Self {
            layout,
            namespace,
            engine,
            planner,
        }
    }

    /// Pick the strategy for `checkout` without building anything.
    pub fn classify(&self, service: &ServiceName, checkout: &Path) -> Resolution {
        match find_build_file(checkout) {
            Some(file) => Resolution {
                source: ImageSource::Build(BuildContext {
                    context: checkout.to_string_lossy().into_owned(),
                    dockerfile: (file != BUILD_FILES[0]).then(|| file.to_owned()),
                }),
                strategy: BuildStrategy::Dockerfile,
                artifact: None,
            },
            None => {
                let tag = ArtifactTag::for_service(self.namespace, service);
                Resolution {
                    source: ImageSource::Image(tag.to_string()),
                    strategy: BuildStrategy::InferredPlan,
                    artifact: Some(tag),
                }
            }
        }
    }

    /// Classify `checkout` and, for the inferred-plan strategy, infer the plan
    /// and build the image. Build-file services are built later through the
    /// services document.
    pub fn resolve(&self, service: &ServiceName, checkout: &Path) -> Result<Resolution, CoreError> {
        let resolution = self.classify(service, checkout);
        debug!("{service}: strategy {}", resolution.strategy);

        if let Some(tag) = &resolution.artifact {
            let build_failed = |e: foundation_runtime::RuntimeError| CoreError::BuildFailed {
                service: service.to_string(),
                reason: e.to_string(),
            };
            let plan = self.layout.plan_path(service);
            self.planner
                .infer_plan(checkout, &plan)
                .map_err(build_failed)?;
            info!("{service}: building {tag} from inferred plan");
            self.engine
                .build_from_plan(tag, &plan, checkout)
                .map_err(build_failed)?;
        }
        Ok(resolution)
    }
}
