use crate::docker::DockerCli;
use crate::mock::MockImageSource;
use crate::RuntimeError;
use std::io::Read;
use stevedore_schema::ImageReference;
use tracing::{debug, info, warn};

/// Filesystem export of a throwaway instance, readable as a tar stream.
pub trait ExportStream: Read {
    /// Release the stream once consumed. Failures the source could only
    /// report after producing data (e.g. a non-zero exit) surface here.
    fn finish(self: Box<Self>) -> Result<(), RuntimeError>;
}

/// Client for wherever images come from: a local daemon, a CLI, or a mock.
pub trait ImageSource: Send + Sync {
    fn name(&self) -> &str;

    /// `repo:tag` strings of every image available locally.
    fn local_tags(&self) -> Result<Vec<String>, RuntimeError>;

    fn pull(&self, reference: &ImageReference, progress: &dyn Fn(&str))
        -> Result<(), RuntimeError>;

    /// Create, but never start, an instance of the image. Returns its id.
    fn create_instance(&self, reference: &ImageReference) -> Result<String, RuntimeError>;

    fn export(&self, instance: &str) -> Result<Box<dyn ExportStream>, RuntimeError>;

    fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError>;
}

pub fn select_source(name: &str) -> Result<Box<dyn ImageSource>, RuntimeError> {
    match name {
        "docker" | "podman" => Ok(Box::new(DockerCli::new(name))),
        "mock" => Ok(Box::new(MockImageSource::new())),
        other => Err(RuntimeError::SourceUnavailable(other.to_owned())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyPresent,
    Pulled,
}

/// Drives an `ImageSource` through presence check, pull, and export of a
/// throwaway instance.
pub struct ImageExporter<'a> {
    source: &'a dyn ImageSource,
}

impl<'a> ImageExporter<'a> {
    pub fn new(source: &'a dyn ImageSource) -> Self {
        Self { source }
    }

    pub fn is_present(&self, reference: &ImageReference) -> Result<bool, RuntimeError> {
        let tags = self.source.local_tags()?;
        Ok(tags.iter().any(|tag| reference.matches(tag)))
    }

    /// Pull the image unless a local copy already matches the reference.
    pub fn ensure_present(
        &self,
        reference: &ImageReference,
        progress: &dyn Fn(&str),
    ) -> Result<EnsureOutcome, RuntimeError> {
        if self.is_present(reference)? {
            info!("image {reference} exists already, skipping pull");
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        info!("pulling {reference} via {}", self.source.name());
        let sink = |line: &str| {
            info!("{line}");
            progress(line);
        };
        self.source.pull(reference, &sink)?;
        Ok(EnsureOutcome::Pulled)
    }

    /// Export the image's filesystem through a throwaway instance and hand
    /// the archive stream to `consume`.
    ///
    /// The instance is removed afterwards whatever the outcome; a failed
    /// removal is logged and otherwise ignored.
    pub fn export_with<T, E>(
        &self,
        reference: &ImageReference,
        consume: impl FnOnce(&mut dyn Read) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RuntimeError>,
    {
        let instance = self.source.create_instance(reference)?;
        debug!("created throwaway instance {instance} from {reference}");

        let result = self.export_instance(&instance, consume);

        match self.source.remove_instance(&instance) {
            Ok(()) => debug!("removed throwaway instance {instance}"),
            Err(e) => warn!("failed to remove throwaway instance {instance}: {e}"),
        }
        result
    }

    fn export_instance<T, E>(
        &self,
        instance: &str,
        consume: impl FnOnce(&mut dyn Read) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RuntimeError>,
    {
        let mut stream = self.source.export(instance)?;
        let value = consume(&mut stream)?;
        stream.finish()?;
        Ok(value)
    }
}
