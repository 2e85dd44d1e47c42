use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

/// Lifecycle position of a managed service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Absent,
    Registered,
    Built,
    Deployed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Absent => write!(f, "absent"),
            ServiceState::Registered => write!(f, "registered"),
            ServiceState::Built => write!(f, "built"),
            ServiceState::Deployed => write!(f, "deployed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceLifecycle {
    pub state: ServiceState,
    pub updated_at: String,
    /// Image tag of the last successful build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServiceLifecycle {
    pub fn new(state: ServiceState) -> Self {
        Self {
            state,
            updated_at: chrono::Utc::now().to_rfc3339(),
            artifact: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    services: BTreeMap<String, ServiceLifecycle>,
}

/// Per-service lifecycle ledger kept in `state.json`.
pub struct StateStore {
    layout: StoreLayout,
}

impl StateStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn all(&self) -> Result<BTreeMap<String, ServiceLifecycle>, StoreError> {
        Ok(self.load()?.services)
    }

    pub fn get(&self, service: &str) -> Result<Option<ServiceLifecycle>, StoreError> {
        Ok(self.load()?.services.remove(service))
    }

    /// Current state; services the ledger has never seen count as absent.
    pub fn state_of(&self, service: &str) -> Result<ServiceState, StoreError> {
        Ok(self
            .get(service)?
            .map_or(ServiceState::Absent, |entry| entry.state))
    }

    pub fn put(&self, service: &str, entry: ServiceLifecycle) -> Result<(), StoreError> {
        let mut ledger = self.load()?;
        ledger.services.insert(service.to_owned(), entry);
        self.save(&ledger)
    }

    /// Move a service to `state`, keeping its artifact. `last_error` replaces
    /// whatever was recorded before.
    pub fn record(
        &self,
        service: &str,
        state: ServiceState,
        artifact: Option<String>,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut ledger = self.load()?;
        let entry = ledger
            .services
            .entry(service.to_owned())
            .or_insert_with(|| ServiceLifecycle::new(state));
        entry.state = state;
        entry.updated_at = chrono::Utc::now().to_rfc3339();
        if artifact.is_some() {
            entry.artifact = artifact;
        }
        entry.last_error = last_error;
        self.save(&ledger)
    }

    pub fn remove(&self, service: &str) -> Result<(), StoreError> {
        let mut ledger = self.load()?;
        if ledger.services.remove(service).is_some() {
            self.save(&ledger)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<Ledger, StoreError> {
        let path = self.layout.state_file();
        if !path.exists() {
            return Ok(Ledger::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let mut content = serde_json::to_string_pretty(ledger)?;
        content.push('\n');
        write_atomic(&self.layout.state_file(), content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, StateStore::new(layout))
    }

    #[test]
    fn unknown_service_is_absent() {
        let (_dir, store) = test_state_store();
        assert_eq!(store.state_of("svc1").unwrap(), ServiceState::Absent);
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn record_keeps_artifact_across_failures() {
        let (_dir, store) = test_state_store();
        store
            .record("svc1", ServiceState::Built, Some("foundation/svc1".to_owned()), None)
            .unwrap();
        store
            .record(
                "svc1",
                ServiceState::Registered,
                None,
                Some("plan inference failed".to_owned()),
            )
            .unwrap();

        let entry = store.get("svc1").unwrap().unwrap();
        assert_eq!(entry.state, ServiceState::Registered);
        assert_eq!(entry.artifact.as_deref(), Some("foundation/svc1"));
        assert_eq!(entry.last_error.as_deref(), Some("plan inference failed"));
    }

    #[test]
    fn remove_drops_entry() {
        let (_dir, store) = test_state_store();
        store
            .put("svc1", ServiceLifecycle::new(ServiceState::Registered))
            .unwrap();
        store.remove("svc1").unwrap();
        assert_eq!(store.state_of("svc1").unwrap(), ServiceState::Absent);
        store.remove("svc1").unwrap();
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&ServiceState::Deployed).unwrap();
        assert_eq!(json, "\"deployed\"");
        assert_eq!(ServiceState::Registered.to_string(), "registered");
    }
}
