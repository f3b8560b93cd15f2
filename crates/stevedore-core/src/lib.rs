//! Bundle build orchestration for stevedore.
//!
//! This crate ties the parameters schema, bundle staging and unpacking, and
//! the runtime layer together into `BundlePipeline`: stage, export and unpack,
//! fixups, write spec. It also owns the error taxonomy every failure is
//! classified into, the settings file, caller-side bundle locking, and the
//! process-wide cancellation flag.

pub mod concurrency;
pub mod config;
pub mod pipeline;

pub use concurrency::{install_signal_handler, shutdown_requested, BundleLock};
pub use config::{default_settings_path, settings_source, Settings};
pub use pipeline::{spec_for, BuiltBundle, BundlePipeline, PipelineOptions};

use std::fmt;
use std::path::PathBuf;
use stevedore_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid parameters: {0}")]
    Params(#[from] stevedore_schema::ParamsError),
    #[error("{0}")]
    Store(#[from] stevedore_store::StoreError),
    #[error("{0}")]
    Runtime(#[from] RuntimeError),
    #[error("invalid settings in {path}: {reason}")]
    Settings { path: PathBuf, reason: String },
    #[error("bundle {0} is in use by another build")]
    Locked(PathBuf),
    #[error("build cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes a caller reports on. Every `CoreError` belongs to exactly
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Staging,
    ImageRetrieval,
    Extraction,
    SpecWrite,
    Sandbox,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "InputError",
            Self::Staging => "StagingError",
            Self::ImageRetrieval => "ImageRetrievalError",
            Self::Extraction => "ExtractionError",
            Self::SpecWrite => "SpecWriteError",
            Self::Sandbox => "SandboxError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Params(_) | Self::Settings { .. } => ErrorKind::Input,
            Self::Store(e) if e.is_staging() => ErrorKind::Staging,
            Self::Store(_) => ErrorKind::Extraction,
            Self::Runtime(e) => match e {
                RuntimeError::SourceUnavailable(_) | RuntimeError::ImageRetrieval(_) => {
                    ErrorKind::ImageRetrieval
                }
                RuntimeError::EmptyEntrypoint => ErrorKind::Input,
                RuntimeError::SpecSerialize(_) | RuntimeError::SpecWrite { .. } => {
                    ErrorKind::SpecWrite
                }
                RuntimeError::Sandbox(_) => ErrorKind::Sandbox,
            },
            Self::Locked(_) | Self::Io(_) => ErrorKind::Staging,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
