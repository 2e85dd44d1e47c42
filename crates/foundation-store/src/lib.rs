//! Persistence layer for Foundation.
//!
//! `StoreLayout` owns every path under the Foundation home directory,
//! `DocumentStore` reads and writes the proxy and services compose documents
//! under a validate-before-swap contract, and `StateStore` keeps the
//! per-service lifecycle ledger.

pub mod documents;
pub mod layout;
pub mod state;

pub use documents::{DocumentKind, DocumentStore, DocumentValidator};
pub use layout::StoreLayout;
pub use state::{ServiceLifecycle, ServiceState, StateStore};

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` through a synced temp file in the same
/// directory.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("foundation is not installed: {} does not exist (run 'foundation install')", .0.display())]
    NotInitialized(PathBuf),
    #[error("invalid document {}: {reason}", path.display())]
    InvalidDocument { path: PathBuf, reason: String },
}
