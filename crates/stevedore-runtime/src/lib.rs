//! Runtime side of stevedore bundles.
//!
//! This crate implements everything that talks to the outside world or
//! describes how the sandbox is run: the OCI runtime spec (`RuntimeSpec`)
//! built from a fixed security and mount policy, the pluggable `ImageSource`
//! trait with a docker/podman CLI adapter and a mock, `ImageExporter` which
//! drives presence check, pull, export and cleanup, the `SandboxRuntime`
//! launcher, and prerequisite checking.

pub mod docker;
pub mod image;
pub mod mock;
pub mod policy;
pub mod prereq;
pub mod sandbox;
pub mod spec;

pub use image::{select_source, EnsureOutcome, ExportStream, ImageExporter, ImageSource};
pub use mock::{MockImageSource, SourceCall};
pub use prereq::{check_prereqs, executable_exists, format_missing, MissingPrereq};
pub use sandbox::{SandboxRuntime, DEFAULT_INSTANCE_NAME, DEFAULT_RUNTIME_BINARY};
pub use spec::{build_spec, render_spec, write_spec, RuntimeSpec, SpecParams};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image source '{0}' is not supported")]
    SourceUnavailable(String),
    #[error("image retrieval failed: {0}")]
    ImageRetrieval(String),
    #[error("runtime spec requires a non-empty entrypoint")]
    EmptyEntrypoint,
    #[error("failed to serialize runtime spec: {0}")]
    SpecSerialize(#[source] serde_json::Error),
    #[error("failed to write runtime spec to {path}: {source}")]
    SpecWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sandbox runtime failed: {0}")]
    Sandbox(String),
}

impl RuntimeError {
    pub(crate) fn retrieval(context: &str, err: impl std::fmt::Display) -> Self {
        Self::ImageRetrieval(format!("{context}: {err}"))
    }
}
