use crate::image::{ExportStream, ImageSource};
use crate::RuntimeError;
use std::io::{self, Cursor, Read};
use std::sync::Mutex;
use stevedore_schema::ImageReference;

/// A call made against `MockImageSource`, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    LocalTags,
    Pull(String),
    Create(String),
    Export(String),
    Remove(String),
}

/// In-memory image source for tests. Serves a fixed archive for every export
/// and records each call.
#[derive(Default)]
pub struct MockImageSource {
    local: Mutex<Vec<String>>,
    archive: Vec<u8>,
    calls: Mutex<Vec<SourceCall>>,
    fail_pull: bool,
    fail_create: bool,
    fail_remove: bool,
}

impl MockImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_local_tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local: Mutex::new(tags.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    /// Bytes returned by every export, normally a tar archive.
    #[must_use]
    pub fn with_archive(self, archive: Vec<u8>) -> Self {
        Self { archive, ..self }
    }

    #[must_use]
    pub fn failing_pull(self) -> Self {
        Self {
            fail_pull: true,
            ..self
        }
    }

    #[must_use]
    pub fn failing_create(self) -> Self {
        Self {
            fail_create: true,
            ..self
        }
    }

    #[must_use]
    pub fn failing_remove(self) -> Self {
        Self {
            fail_remove: true,
            ..self
        }
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: SourceCall) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::ImageRetrieval(format!("mutex poisoned: {e}")))?
            .push(call);
        Ok(())
    }

    fn instance_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, SourceCall::Create(_))).count()
    }
}

impl ImageSource for MockImageSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn local_tags(&self) -> Result<Vec<String>, RuntimeError> {
        self.record(SourceCall::LocalTags)?;
        self.local
            .lock()
            .map(|l| l.clone())
            .map_err(|e| RuntimeError::ImageRetrieval(format!("mutex poisoned: {e}")))
    }

    fn pull(
        &self,
        reference: &ImageReference,
        progress: &dyn Fn(&str),
    ) -> Result<(), RuntimeError> {
        let reference = reference.to_string();
        self.record(SourceCall::Pull(reference.clone()))?;
        if self.fail_pull {
            return Err(RuntimeError::ImageRetrieval(format!(
                "mock registry unreachable for {reference}"
            )));
        }
        progress(&format!("{reference}: pulling from mock"));
        progress(&format!("Status: downloaded newer image for {reference}"));
        self.local
            .lock()
            .map_err(|e| RuntimeError::ImageRetrieval(format!("mutex poisoned: {e}")))?
            .push(reference);
        Ok(())
    }

    fn create_instance(&self, reference: &ImageReference) -> Result<String, RuntimeError> {
        let id = format!("mock-{}", self.instance_count());
        self.record(SourceCall::Create(reference.to_string()))?;
        if self.fail_create {
            return Err(RuntimeError::ImageRetrieval(format!(
                "no such image: {reference}"
            )));
        }
        Ok(id)
    }

    fn export(&self, instance: &str) -> Result<Box<dyn ExportStream>, RuntimeError> {
        self.record(SourceCall::Export(instance.to_owned()))?;
        Ok(Box::new(MockExport(Cursor::new(self.archive.clone()))))
    }

    fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError> {
        self.record(SourceCall::Remove(instance.to_owned()))?;
        if self.fail_remove {
            return Err(RuntimeError::ImageRetrieval(format!(
                "instance {instance} is busy"
            )));
        }
        Ok(())
    }
}

struct MockExport(Cursor<Vec<u8>>);

impl Read for MockExport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl ExportStream for MockExport {
    fn finish(self: Box<Self>) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_makes_image_present() {
        let source = MockImageSource::new();
        let reference = ImageReference::parse("alpine").unwrap();
        assert!(source.local_tags().unwrap().is_empty());
        source.pull(&reference, &|_| {}).unwrap();
        assert_eq!(source.local_tags().unwrap(), vec!["alpine:latest"]);
    }

    #[test]
    fn instance_ids_are_distinct() {
        let source = MockImageSource::new();
        let reference = ImageReference::parse("alpine").unwrap();
        let a = source.create_instance(&reference).unwrap();
        let b = source.create_instance(&reference).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn export_serves_archive() {
        let source = MockImageSource::new().with_archive(vec![1, 2, 3]);
        let mut stream = source.export("mock-0").unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        stream.finish().unwrap();
    }

    #[test]
    fn failing_pull_records_attempt() {
        let source = MockImageSource::new().failing_pull();
        let reference = ImageReference::parse("alpine:3.20").unwrap();
        assert!(source.pull(&reference, &|_| {}).is_err());
        assert_eq!(source.calls(), vec![SourceCall::Pull("alpine:3.20".to_owned())]);
    }
}
