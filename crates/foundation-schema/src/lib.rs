//! Declarative document model and validation rules for Foundation.
//!
//! This crate defines the schema layer: the typed compose documents
//! (`ComposeDocument`, `ServiceRecord`) with the `image`/`build` exclusivity
//! expressed as the `ImageSource` sum type, parsing of `--env` and `--volume`
//! entries, service-name rules, the fixed proxy and services document
//! templates, and the TOML `Settings` file.

pub mod compose;
pub mod environment;
pub mod service;
pub mod settings;
pub mod templates;
pub mod types;
pub mod volume;

pub use compose::{
    BuildContext, BuildStrategy, ComposeDocument, DeploySpec, ImageSource, NetworkDecl,
    RestartPolicy, ServiceOrigin, ServiceRecord, VolumeDecl,
};
pub use environment::{parse_environment, PublicExposure};
pub use service::ServiceSpec;
pub use settings::Settings;
pub use templates::{
    proxy_document, services_document, ACME_SERVICE, PROXY_PORTS, PROXY_SERVICE, RESERVED_NAMES,
};
pub use types::{ArtifactTag, ServiceName};
pub use volume::{parse_volumes, VolumeMount};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid service name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("invalid environment entry '{0}', expected KEY=VALUE")]
    MalformedEnvEntry(String),
    #[error("invalid volume entry '{0}', expected NAME:PATH")]
    MalformedVolumeEntry(String),
    #[error("host paths are not allowed, use a named volume instead: '{0}'")]
    HostPathNotAllowed(String),
    #[error("unknown restart policy '{0}' (expected: no, always, on-failure, unless-stopped)")]
    InvalidRestartPolicy(String),
    #[error("service must declare exactly one of 'image' or 'build'")]
    AmbiguousSource,
    #[error("document must declare exactly one shared network, found {0}")]
    NetworkCount(usize),
    #[error("failed to read settings: {0}")]
    SettingsIo(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    SettingsSerialize(#[from] toml::ser::Error),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}
