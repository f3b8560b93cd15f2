use crate::reference::ImageReference;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("failed to read parameters file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse parameters: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("Image must not be empty")]
    EmptyImage,
    #[error("invalid image reference: '{0}'")]
    InvalidReference(String),
    #[error("Entrypoint must not be empty")]
    EmptyEntrypoint,
}

/// The parameters document as it appears on disk.
///
/// `Entrypoint` is a single executable path; it is never split into
/// arguments.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ParametersDocument {
    pub image: String,
    #[serde(default)]
    pub name: String,
    pub entrypoint: String,
}

/// Validated build parameters. Created once from the document and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeParameters {
    image_reference: ImageReference,
    container_name: String,
    entrypoint: Vec<String>,
}

impl RuntimeParameters {
    pub fn new(
        image_reference: ImageReference,
        container_name: impl Into<String>,
        entrypoint: Vec<String>,
    ) -> Result<Self, ParamsError> {
        if entrypoint.is_empty() || entrypoint[0].trim().is_empty() {
            return Err(ParamsError::EmptyEntrypoint);
        }
        Ok(Self {
            image_reference,
            container_name: container_name.into(),
            entrypoint,
        })
    }

    pub fn image_reference(&self) -> &ImageReference {
        &self.image_reference
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn entrypoint(&self) -> &[String] {
        &self.entrypoint
    }
}

impl ParametersDocument {
    pub fn validate(&self) -> Result<RuntimeParameters, ParamsError> {
        let reference = ImageReference::parse(&self.image)?;
        RuntimeParameters::new(
            reference,
            self.name.trim(),
            vec![self.entrypoint.trim().to_owned()],
        )
    }
}

pub fn parse_parameters_str(input: &str) -> Result<RuntimeParameters, ParamsError> {
    let doc: ParametersDocument = serde_json::from_str(input)?;
    doc.validate()
}

pub fn parse_parameters_file(path: impl AsRef<Path>) -> Result<RuntimeParameters, ParamsError> {
    let content = fs::read_to_string(path)?;
    parse_parameters_str(&content)
}
