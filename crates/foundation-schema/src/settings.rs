use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Contents of `config.toml` in the Foundation home directory.
///
/// Every field has a default; a missing file means "all defaults".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Prefix of images built from inferred plans (`<namespace>/<service>`).
    pub namespace: String,
    /// The shared network joining the proxy and every service.
    pub network: String,
    pub proxy_project: String,
    pub services_project: String,
    pub proxy_image: String,
    pub acme_image: String,
    /// Let's Encrypt contact recorded at install; used when a service is
    /// exposed without its own email.
    pub default_email: Option<String>,
    pub watch_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "foundation".to_owned(),
            network: "foundation_network".to_owned(),
            proxy_project: "foundation".to_owned(),
            services_project: "foundation-services".to_owned(),
            proxy_image: "nginxproxy/nginx-proxy".to_owned(),
            acme_image: "nginxproxy/acme-companion".to_owned(),
            default_email: None,
            watch_interval_secs: 300,
            probe_timeout_secs: 10,
            build_timeout_secs: 3600,
            deploy_timeout_secs: 900,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SchemaError> {
        self.validate()?;
        let content = toml::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| SchemaError::SettingsIo(e.error))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let lowercase_ident = |s: &str| {
            !s.is_empty()
                && s.bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        };
        if !lowercase_ident(&self.namespace) {
            return Err(SchemaError::InvalidSettings(format!(
                "namespace '{}' must match [a-z0-9_-]",
                self.namespace
            )));
        }
        for project in [&self.proxy_project, &self.services_project] {
            if !lowercase_ident(project) {
                return Err(SchemaError::InvalidSettings(format!(
                    "project name '{project}' must match [a-z0-9_-]"
                )));
            }
        }
        if self.network.is_empty() {
            return Err(SchemaError::InvalidSettings(
                "network must not be empty".to_owned(),
            ));
        }
        if self.probe_timeout_secs == 0 || self.build_timeout_secs == 0 {
            return Err(SchemaError::InvalidSettings(
                "timeouts must be at least one second".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }
}
