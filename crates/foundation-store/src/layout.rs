use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

const PROXY_DOCUMENT: &str = "compose.json";
const SERVICES_DIR: &str = "services";
const PLANS_DIR: &str = "plans";

/// Directory layout of a Foundation home.
///
/// ```text
/// <home>/compose.json            proxy stack
/// <home>/services/compose.json   managed services stack
/// <home>/services/<name>/        source checkouts
/// <home>/plans/<name>.json       inferred build plans
/// <home>/state.json              lifecycle ledger
/// <home>/config.toml             settings
/// <home>/.lock                   command lock
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn proxy_document(&self) -> PathBuf {
        self.root.join(PROXY_DOCUMENT)
    }

    #[inline]
    pub fn services_dir(&self) -> PathBuf {
        self.root.join(SERVICES_DIR)
    }

    #[inline]
    pub fn services_document(&self) -> PathBuf {
        self.services_dir().join(PROXY_DOCUMENT)
    }

    /// Working directory of a checkout-backed service.
    #[inline]
    pub fn checkout_dir(&self, service: &str) -> PathBuf {
        self.services_dir().join(service)
    }

    #[inline]
    pub fn plans_dir(&self) -> PathBuf {
        self.root.join(PLANS_DIR)
    }

    #[inline]
    pub fn plan_path(&self, service: &str) -> PathBuf {
        self.plans_dir().join(format!("{service}.json"))
    }

    #[inline]
    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    #[inline]
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.services_dir())?;
        fs::create_dir_all(self.plans_dir())?;
        Ok(())
    }

    /// Both documents are present on disk.
    pub fn is_installed(&self) -> bool {
        self.proxy_document().is_file() && self.services_document().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/foundation-test");
        assert_eq!(
            layout.proxy_document(),
            PathBuf::from("/tmp/foundation-test/compose.json")
        );
        assert_eq!(
            layout.services_document(),
            PathBuf::from("/tmp/foundation-test/services/compose.json")
        );
        assert_eq!(
            layout.checkout_dir("svc1"),
            PathBuf::from("/tmp/foundation-test/services/svc1")
        );
        assert_eq!(
            layout.plan_path("svc1"),
            PathBuf::from("/tmp/foundation-test/plans/svc1.json")
        );
        assert_eq!(layout.lock_file(), PathBuf::from("/tmp/foundation-test/.lock"));
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("home"));
        layout.initialize().unwrap();

        assert!(layout.services_dir().is_dir());
        assert!(layout.plans_dir().is_dir());
        assert!(!layout.is_installed());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(layout.services_document(), "{}").unwrap();
        layout.initialize().unwrap();
        assert!(layout.services_document().is_file());
    }
}
