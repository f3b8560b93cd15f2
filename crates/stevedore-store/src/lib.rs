//! On-disk side of stevedore bundles.
//!
//! This crate owns everything that touches the bundle directory before the
//! runtime spec is written: `BundleLayout` for the fixed directory structure,
//! `BundleStager` for the destructive reset and post-extraction fixups, and
//! `ArchiveUnpacker` for replaying a tar stream into the root filesystem.

pub mod layout;
pub mod staging;
pub mod unpack;

pub use layout::{BundleLayout, CONFIG_FILE, RESOLV_CONF, ROOTFS_DIR};
pub use staging::{BundleStager, DEFAULT_NAMESERVERS};
pub use unpack::{ArchiveEntry, ArchiveUnpacker, EntryKind, LinkKind, UnpackReport};

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("staging failed at {path}: {source}")]
    Staging { path: PathBuf, source: io::Error },
    #[error("extraction failed at {path}: {source}")]
    Extraction { path: PathBuf, source: io::Error },
    #[error("archive entry escapes the destination root: {0}")]
    PathEscape(PathBuf),
    /// The stream itself is unreadable. `path` is the last entry read before
    /// the failure, or the destination root when none was.
    #[error("archive read failed after {path}: {source}")]
    Archive { path: PathBuf, source: io::Error },
}

impl StoreError {
    /// Whether the error came from bundle staging rather than archive replay.
    pub fn is_staging(&self) -> bool {
        matches!(self, Self::Staging { .. })
    }
}

pub(crate) fn staging_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Staging {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn extraction_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Extraction {
        path: path.to_path_buf(),
        source,
    }
}
