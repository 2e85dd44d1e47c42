use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use foundation_schema::ComposeDocument;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The two compose documents Foundation owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Proxy,
    Services,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Proxy => write!(f, "proxy"),
            DocumentKind::Services => write!(f, "services"),
        }
    }
}

/// Accepts or rejects a compose file as the container engine would.
pub trait DocumentValidator {
    /// `Err` carries the engine's explanation.
    fn validate(&self, path: &Path) -> Result<(), String>;
}

/// Reads and commits the compose documents.
///
/// A write stages the serialized document next to its target, has the
/// validator check the staged copy and only then renames it into place, so a
/// rejected document never replaces the previous one.
pub struct DocumentStore {
    layout: StoreLayout,
}

impl DocumentStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn path(&self, kind: DocumentKind) -> PathBuf {
        match kind {
            DocumentKind::Proxy => self.layout.proxy_document(),
            DocumentKind::Services => self.layout.services_document(),
        }
    }

    pub fn exists(&self, kind: DocumentKind) -> bool {
        self.path(kind).is_file()
    }

    /// Parse a document into the typed model without consulting the engine.
    pub fn load(&self, kind: DocumentKind) -> Result<ComposeDocument, StoreError> {
        let path = self.path(kind);
        if !path.is_file() {
            return Err(StoreError::NotInitialized(path));
        }
        let content = fs::read_to_string(&path)?;
        parse_document(&path, &content)
    }

    /// Parse a document and have the engine confirm it.
    pub fn read<V>(&self, kind: DocumentKind, validator: &V) -> Result<ComposeDocument, StoreError>
    where
        V: DocumentValidator + ?Sized,
    {
        let doc = self.load(kind)?;
        let path = self.path(kind);
        validator
            .validate(&path)
            .map_err(|reason| StoreError::InvalidDocument { path, reason })?;
        Ok(doc)
    }

    pub fn write<V>(
        &self,
        kind: DocumentKind,
        doc: &ComposeDocument,
        validator: &V,
    ) -> Result<(), StoreError>
    where
        V: DocumentValidator + ?Sized,
    {
        let dest = self.path(kind);
        let content = render(&dest, doc)?;
        self.commit(&dest, &content, validator)
    }

    /// Like [`write`](Self::write), but leaves the file alone when its bytes
    /// would not change. Returns whether a write happened.
    pub fn write_if_changed<V>(
        &self,
        kind: DocumentKind,
        doc: &ComposeDocument,
        validator: &V,
    ) -> Result<bool, StoreError>
    where
        V: DocumentValidator + ?Sized,
    {
        let dest = self.path(kind);
        let content = render(&dest, doc)?;
        if fs::read(&dest).is_ok_and(|current| current == content.as_bytes()) {
            debug!("{kind} document unchanged, skipping write");
            return Ok(false);
        }
        self.commit(&dest, &content, validator)?;
        Ok(true)
    }

    fn commit<V>(&self, dest: &Path, content: &str, validator: &V) -> Result<(), StoreError>
    where
        V: DocumentValidator + ?Sized,
    {
        let dir = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        // Same directory as the target: relative paths in the document
        // resolve identically and the rename stays on one filesystem.
        let mut staged = tempfile::Builder::new()
            .prefix(".compose-")
            .suffix(".json")
            .tempfile_in(dir)?;
        staged.write_all(content.as_bytes())?;
        staged.as_file().sync_all()?;

        if let Err(reason) = validator.validate(staged.path()) {
            debug!("staged document for {} rejected: {reason}", dest.display());
            return Err(StoreError::InvalidDocument {
                path: dest.to_path_buf(),
                reason,
            });
        }

        staged.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        debug!("committed {}", dest.display());
        Ok(())
    }
}

fn render(dest: &Path, doc: &ComposeDocument) -> Result<String, StoreError> {
    doc.shared_network()
        .map_err(|e| StoreError::InvalidDocument {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        })?;
    let mut content = serde_json::to_string_pretty(doc)?;
    content.push('\n');
    Ok(content)
}

fn parse_document(path: &Path, content: &str) -> Result<ComposeDocument, StoreError> {
    let invalid = |reason: String| StoreError::InvalidDocument {
        path: path.to_path_buf(),
        reason,
    };
    let doc: ComposeDocument = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    doc.shared_network().map_err(|e| invalid(e.to_string()))?;
    Ok(doc)
}
