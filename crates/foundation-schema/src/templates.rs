//! The fixed proxy stack and the empty services stack written by `install`.

use crate::compose::{ComposeDocument, NetworkDecl, RestartPolicy, ServiceRecord, VolumeDecl};
use crate::settings::Settings;
use std::collections::BTreeMap;

pub const PROXY_SERVICE: &str = "nginx-proxy";
pub const ACME_SERVICE: &str = "nginx-proxy-acme";

/// Host ports the reverse proxy must bind.
pub const PROXY_PORTS: [u16; 2] = [80, 443];

/// Container names owned by the proxy stack.
pub const RESERVED_NAMES: [&str; 2] = [PROXY_SERVICE, ACME_SERVICE];

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

pub fn proxy_document(settings: &Settings, email: &str) -> ComposeDocument {
    let network = settings.network.clone();

    let mut proxy = ServiceRecord::from_image(&settings.proxy_image);
    proxy.container_name = Some(PROXY_SERVICE.to_owned());
    proxy.volumes = vec![
        "certs:/etc/nginx/certs".to_owned(),
        "html:/usr/share/nginx/html".to_owned(),
        format!("{DOCKER_SOCKET}:/tmp/docker.sock:ro"),
    ];
    proxy.ports = PROXY_PORTS.iter().map(|p| format!("{p}:{p}")).collect();
    proxy.networks = vec![network.clone()];
    proxy.restart = Some(RestartPolicy::UnlessStopped);

    let mut acme = ServiceRecord::from_image(&settings.acme_image);
    acme.container_name = Some(ACME_SERVICE.to_owned());
    acme.environment.insert("DEFAULT_EMAIL".to_owned(), email.to_owned());
    acme.volumes = vec![
        format!("{DOCKER_SOCKET}:{DOCKER_SOCKET}:ro"),
        "acme:/etc/acme.sh".to_owned(),
    ];
    acme.volumes_from = vec![PROXY_SERVICE.to_owned()];
    acme.networks = vec![network.clone()];
    acme.restart = Some(RestartPolicy::UnlessStopped);

    let mut doc = ComposeDocument {
        name: settings.proxy_project.clone(),
        services: BTreeMap::new(),
        volumes: BTreeMap::new(),
        networks: BTreeMap::from([(
            network.clone(),
            NetworkDecl {
                name: network,
                external: false,
            },
        )]),
    };
    doc.insert_service(PROXY_SERVICE, proxy);
    doc.insert_service(ACME_SERVICE, acme);
    doc
}

/// The managed services stack. It joins the proxy's network as external so
/// that tearing it down never removes the network.
pub fn services_document(
    settings: &Settings,
    services: BTreeMap<String, ServiceRecord>,
    volumes: BTreeMap<String, VolumeDecl>,
) -> ComposeDocument {
    ComposeDocument {
        name: settings.services_project.clone(),
        services,
        volumes,
        networks: BTreeMap::from([(
            settings.network.clone(),
            NetworkDecl {
                name: settings.network.clone(),
                external: true,
            },
        )]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_binds_http_and_https() {
        let doc = proxy_document(&Settings::default(), "ops@example.com");
        let proxy = doc.service(PROXY_SERVICE).unwrap();
        assert_eq!(proxy.ports, ["80:80", "443:443"]);
        assert_eq!(doc.shared_network().unwrap(), "foundation_network");
        assert!(!doc.networks["foundation_network"].external);
    }

    #[test]
    fn proxy_declares_only_named_volumes() {
        let doc = proxy_document(&Settings::default(), "ops@example.com");
        let names: Vec<_> = doc.volumes.keys().map(String::as_str).collect();
        assert_eq!(names, ["acme", "certs", "html"]);
    }

    #[test]
    fn acme_companion_gets_default_email() {
        let doc = proxy_document(&Settings::default(), "ops@example.com");
        let acme = doc.service(ACME_SERVICE).unwrap();
        assert_eq!(acme.environment["DEFAULT_EMAIL"], "ops@example.com");
        assert_eq!(acme.volumes_from, [PROXY_SERVICE]);
    }

    #[test]
    fn services_document_uses_external_network() {
        let doc = services_document(&Settings::default(), BTreeMap::new(), BTreeMap::new());
        assert!(doc.services.is_empty());
        assert!(doc.networks["foundation_network"].external);
        assert_eq!(doc.name, "foundation-services");
    }
}
