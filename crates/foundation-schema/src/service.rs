use crate::compose::{DeploySpec, ImageSource, RestartPolicy, ServiceOrigin, ServiceRecord};
use crate::environment::PublicExposure;
use crate::types::ServiceName;
use crate::volume::VolumeMount;
use std::collections::BTreeMap;

/// Validated inputs for a new managed service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub source: ImageSource,
    pub origin: ServiceOrigin,
    pub exposure: Option<PublicExposure>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub restart: RestartPolicy,
    pub gpu: bool,
    pub network: String,
}

impl ServiceSpec {
    pub fn into_record(self) -> ServiceRecord {
        let mut environment = self.environment;
        if let Some(exposure) = &self.exposure {
            exposure.apply(&mut environment);
        }
        ServiceRecord {
            container_name: Some(self.name.into_inner()),
            source: self.source,
            environment,
            volumes: self.volumes.iter().map(ToString::to_string).collect(),
            volumes_from: Vec::new(),
            ports: Vec::new(),
            networks: vec![self.network],
            restart: Some(self.restart),
            deploy: self.gpu.then(DeploySpec::nvidia_gpu),
            origin: Some(self.origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{BuildStrategy, VIRTUAL_HOST};
    use crate::environment::parse_environment;
    use crate::volume::parse_volumes;

    fn spec(exposure: Option<PublicExposure>) -> ServiceSpec {
        ServiceSpec {
            name: ServiceName::parse("svc1").unwrap(),
            source: ImageSource::Image("nginx:alpine".to_owned()),
            origin: ServiceOrigin {
                source: "nginx:alpine".to_owned(),
                strategy: BuildStrategy::Image,
            },
            exposure,
            environment: parse_environment(&["FOO=bar"]).unwrap(),
            volumes: parse_volumes(&["data:/app/data"]).unwrap(),
            restart: RestartPolicy::Always,
            gpu: false,
            network: "foundation_network".to_owned(),
        }
    }

    #[test]
    fn record_without_host_has_no_proxy_keys() {
        let record = spec(None).into_record();
        assert_eq!(record.environment.len(), 1);
        assert!(record.public_host().is_none());
        assert_eq!(record.container_name.as_deref(), Some("svc1"));
        assert_eq!(record.networks, ["foundation_network"]);
        assert_eq!(record.volumes, ["data:/app/data"]);
        assert!(record.deploy.is_none());
    }

    #[test]
    fn record_with_host_is_exposed() {
        let record = spec(Some(PublicExposure {
            host: "svc1.example.com".to_owned(),
            port: 8080,
            letsencrypt_email: "ops@example.com".to_owned(),
        }))
        .into_record();
        assert_eq!(record.environment.len(), 5);
        assert_eq!(record.environment[VIRTUAL_HOST], "svc1.example.com");
        assert_eq!(record.public_host(), Some("svc1.example.com"));
    }

    #[test]
    fn gpu_flag_adds_reservation() {
        let mut s = spec(None);
        s.gpu = true;
        assert!(s.into_record().gpu_enabled());
    }
}
