use crate::SchemaError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Environment keys the reverse proxy and ACME companion read from a service.
pub const VIRTUAL_HOST: &str = "VIRTUAL_HOST";
pub const VIRTUAL_PORT: &str = "VIRTUAL_PORT";
pub const LETSENCRYPT_HOST: &str = "LETSENCRYPT_HOST";
pub const LETSENCRYPT_EMAIL: &str = "LETSENCRYPT_EMAIL";

/// One compose file: the proxy stack or the managed services stack.
///
/// Maps are ordered so that serializing an unchanged document always yields
/// the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComposeDocument {
    pub name: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceRecord>,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeDecl>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkDecl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VolumeDecl {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

impl ComposeDocument {
    /// The single network every service joins.
    pub fn shared_network(&self) -> Result<&str, SchemaError> {
        let mut networks = self.networks.keys();
        match (networks.next(), networks.next()) {
            (Some(name), None) => Ok(name),
            _ => Err(SchemaError::NetworkCount(self.networks.len())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.get(name)
    }

    /// Insert a record and declare every named volume it mounts.
    pub fn insert_service(&mut self, name: impl Into<String>, record: ServiceRecord) {
        for volume in record.named_volumes() {
            self.volumes.entry(volume.to_owned()).or_default();
        }
        self.services.insert(name.into(), record);
    }

    /// Remove a record. Its volumes stay declared so data survives a re-create.
    pub fn remove_service(&mut self, name: &str) -> Option<ServiceRecord> {
        self.services.remove(name)
    }
}

/// How a service obtains its runnable image. Exactly one of the compose
/// `image` and `build` keys is ever present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Image(String),
    Build(BuildContext),
}

impl ImageSource {
    pub fn image(&self) -> Option<&str> {
        match self {
            ImageSource::Image(reference) => Some(reference),
            ImageSource::Build(_) => None,
        }
    }

    pub fn build(&self) -> Option<&BuildContext> {
        match self {
            ImageSource::Image(_) => None,
            ImageSource::Build(ctx) => Some(ctx),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildContext {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestartPolicy {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            other => Err(SchemaError::InvalidRestartPolicy(other.to_owned())),
        }
    }
}

/// Method used to produce a service's image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStrategy {
    Image,
    Dockerfile,
    InferredPlan,
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStrategy::Image => write!(f, "image"),
            BuildStrategy::Dockerfile => write!(f, "dockerfile"),
            BuildStrategy::InferredPlan => write!(f, "inferred-plan"),
        }
    }
}

/// Where a managed service came from, stored in the `x-foundation`
/// extension block that compose ignores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceOrigin {
    pub source: String,
    pub strategy: BuildStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeploySpec {
    pub resources: Resources,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    pub reservations: Reservations,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Reservations {
    pub devices: Vec<DeviceRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceRequest {
    pub driver: String,
    pub count: String,
    pub capabilities: Vec<String>,
}

impl DeploySpec {
    /// Reserve every NVIDIA GPU on the host.
    pub fn nvidia_gpu() -> Self {
        Self {
            resources: Resources {
                reservations: Reservations {
                    devices: vec![DeviceRequest {
                        driver: "nvidia".to_owned(),
                        count: "all".to_owned(),
                        capabilities: vec!["gpu".to_owned()],
                    }],
                },
            },
        }
    }

    pub fn requests_gpu(&self) -> bool {
        self.resources
            .reservations
            .devices
            .iter()
            .any(|d| d.capabilities.iter().any(|c| c == "gpu"))
    }
}

/// A single service entry of a compose document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServiceRecord", into = "RawServiceRecord")]
pub struct ServiceRecord {
    pub container_name: Option<String>,
    pub source: ImageSource,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub volumes_from: Vec<String>,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub restart: Option<RestartPolicy>,
    pub deploy: Option<DeploySpec>,
    pub origin: Option<ServiceOrigin>,
}

impl ServiceRecord {
    pub fn from_image(reference: impl Into<String>) -> Self {
        Self {
            container_name: None,
            source: ImageSource::Image(reference.into()),
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            volumes_from: Vec::new(),
            ports: Vec::new(),
            networks: Vec::new(),
            restart: None,
            deploy: None,
            origin: None,
        }
    }

    /// Public hostname routed to this service by the proxy, if any.
    pub fn public_host(&self) -> Option<&str> {
        self.environment.get(VIRTUAL_HOST).map(String::as_str)
    }

    pub fn gpu_enabled(&self) -> bool {
        self.deploy.as_ref().is_some_and(DeploySpec::requests_gpu)
    }

    /// Strategy recorded at the last resolution; records written without an
    /// origin block fall back to what the source implies.
    pub fn strategy(&self) -> BuildStrategy {
        match (&self.origin, &self.source) {
            (Some(origin), _) => origin.strategy,
            (None, ImageSource::Build(_)) => BuildStrategy::Dockerfile,
            (None, ImageSource::Image(_)) => BuildStrategy::Image,
        }
    }

    /// Named volumes mounted by this record. Host-path mounts are skipped.
    pub fn named_volumes(&self) -> impl Iterator<Item = &str> {
        self.volumes.iter().filter_map(|entry| {
            let (name, _) = entry.split_once(':')?;
            let is_path = name.starts_with(['/', '.', '~']) || name.contains('/');
            (!is_path && !name.is_empty()).then_some(name)
        })
    }

    /// Replace the image source and keep the origin block in step with it.
    pub fn set_source(&mut self, source: ImageSource, strategy: BuildStrategy) {
        self.source = source;
        if let Some(origin) = self.origin.as_mut() {
            origin.strategy = strategy;
        }
    }
}

/// Compose-shaped mirror of [`ServiceRecord`] with two optional source keys;
/// conversion enforces that exactly one is present.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServiceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build: Option<RawBuild>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "deserialize_environment"
    )]
    environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    volumes_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    restart: Option<RestartPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deploy: Option<DeploySpec>,
    #[serde(
        rename = "x-foundation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    origin: Option<ServiceOrigin>,
}

/// Compose accepts `build: <path>` as shorthand for `build: {context: <path>}`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Path(String),
    Context(BuildContext),
}

/// Environment values may be written as strings, numbers or booleans;
/// a `null` value means "not set" and is dropped.
#[derive(Deserialize)]
#[serde(untagged)]
enum EnvValue {
    Text(String),
    Integer(i64),
    Flag(bool),
}

fn deserialize_environment<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Option<EnvValue>> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value? {
                EnvValue::Text(s) => s,
                EnvValue::Integer(n) => n.to_string(),
                EnvValue::Flag(b) => b.to_string(),
            };
            Some((key, value))
        })
        .collect())
}

impl TryFrom<RawServiceRecord> for ServiceRecord {
    type Error = SchemaError;

    fn try_from(raw: RawServiceRecord) -> Result<Self, Self::Error> {
        let source = match (raw.image, raw.build) {
            (Some(image), None) => ImageSource::Image(image),
            (None, Some(RawBuild::Path(context))) => ImageSource::Build(BuildContext {
                context,
                dockerfile: None,
            }),
            (None, Some(RawBuild::Context(ctx))) => ImageSource::Build(ctx),
            _ => return Err(SchemaError::AmbiguousSource),
        };
        Ok(Self {
            container_name: raw.container_name,
            source,
            environment: raw.environment,
            volumes: raw.volumes,
            volumes_from: raw.volumes_from,
            ports: raw.ports,
            networks: raw.networks,
            restart: raw.restart,
            deploy: raw.deploy,
            origin: raw.origin,
        })
    }
}

impl From<ServiceRecord> for RawServiceRecord {
    fn from(record: ServiceRecord) -> Self {
        let (image, build) = match record.source {
            ImageSource::Image(image) => (Some(image), None),
            ImageSource::Build(ctx) => (None, Some(RawBuild::Context(ctx))),
        };
        Self {
            container_name: record.container_name,
            image,
            build,
            environment: record.environment,
            volumes: record.volumes,
            volumes_from: record.volumes_from,
            ports: record.ports,
            networks: record.networks,
            restart: record.restart,
            deploy: record.deploy,
            origin: record.origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_record(json: &str) -> Result<ServiceRecord, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn image_record_serializes_without_build_key() {
        let mut record = ServiceRecord::from_image("nginx:alpine");
        record.restart = Some(RestartPolicy::UnlessStopped);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["image"], "nginx:alpine");
        assert!(json.get("build").is_none());
        assert_eq!(json["restart"], "unless-stopped");
    }

    #[test]
    fn switching_to_build_clears_image() {
        let mut record = ServiceRecord::from_image("foundation/web");
        record.set_source(
            ImageSource::Build(BuildContext {
                context: "/srv/web".to_owned(),
                dockerfile: None,
            }),
            BuildStrategy::Dockerfile,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("image").is_none());
        assert_eq!(json["build"]["context"], "/srv/web");
    }

    #[test]
    fn rejects_record_with_both_sources() {
        let err = parse_record(r#"{"image": "a", "build": {"context": "/x"}}"#).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn rejects_record_without_source() {
        assert!(parse_record(r#"{"container_name": "a"}"#).is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_record(r#"{"image": "a", "privileged": true}"#).is_err());
    }

    #[test]
    fn accepts_build_shorthand() {
        let record = parse_record(r#"{"build": "/srv/api"}"#).unwrap();
        assert_eq!(record.source.build().unwrap().context, "/srv/api");
        assert_eq!(record.strategy(), BuildStrategy::Dockerfile);
    }

    #[test]
    fn environment_accepts_scalars_and_drops_null() {
        let record = parse_record(
            r#"{"image": "a", "environment": {"VIRTUAL_PORT": 8080, "DEBUG": true, "LETSENCRYPT_EMAIL": null}}"#,
        )
        .unwrap();
        assert_eq!(record.environment["VIRTUAL_PORT"], "8080");
        assert_eq!(record.environment["DEBUG"], "true");
        assert!(!record.environment.contains_key(LETSENCRYPT_EMAIL));
    }

    #[test]
    fn gpu_reservation_is_detected() {
        let mut record = ServiceRecord::from_image("a");
        assert!(!record.gpu_enabled());
        record.deploy = Some(DeploySpec::nvidia_gpu());
        assert!(record.gpu_enabled());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json["deploy"]["resources"]["reservations"]["devices"][0]["driver"],
            "nvidia"
        );
    }

    #[test]
    fn named_volumes_skip_host_paths() {
        let mut record = ServiceRecord::from_image("a");
        record.volumes = vec![
            "certs:/etc/nginx/certs".to_owned(),
            "/var/run/docker.sock:/tmp/docker.sock:ro".to_owned(),
        ];
        assert_eq!(record.named_volumes().collect::<Vec<_>>(), ["certs"]);
    }

    #[test]
    fn shared_network_requires_exactly_one() {
        let mut doc = ComposeDocument {
            name: "t".to_owned(),
            services: BTreeMap::new(),
            volumes: BTreeMap::new(),
            networks: BTreeMap::new(),
        };
        assert!(matches!(
            doc.shared_network(),
            Err(SchemaError::NetworkCount(0))
        ));
        doc.networks.insert(
            "net".to_owned(),
            NetworkDecl {
                name: "net".to_owned(),
                external: true,
            },
        );
        assert_eq!(doc.shared_network().unwrap(), "net");
    }

    #[test]
    fn insert_declares_volumes_and_remove_keeps_them() {
        let mut doc = ComposeDocument {
            name: "t".to_owned(),
            services: BTreeMap::new(),
            volumes: BTreeMap::new(),
            networks: BTreeMap::new(),
        };
        let mut record = ServiceRecord::from_image("a");
        record.volumes = vec!["data:/app/data".to_owned()];
        doc.insert_service("svc", record);
        assert!(doc.volumes.contains_key("data"));
        assert!(doc.remove_service("svc").is_some());
        assert!(doc.volumes.contains_key("data"));
        assert!(doc.remove_service("svc").is_none());
    }

    #[test]
    fn restart_policy_parses_and_displays() {
        for text in ["no", "always", "on-failure", "unless-stopped"] {
            let policy: RestartPolicy = text.parse().unwrap();
            assert_eq!(policy.to_string(), text);
        }
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }
}
