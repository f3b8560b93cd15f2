use crate::ParamsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag assumed when a reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

const HUB_PREFIXES: &[&str] = &["docker.io/library/", "docker.io/"];

/// A container image reference in `name[:tag]` form.
///
/// Digest references (`name@sha256:...`) are kept verbatim as the name and
/// carry no tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    name: String,
    tag: Option<String>,
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self, ParamsError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParamsError::EmptyImage);
        }
        if input.chars().any(char::is_whitespace) {
            return Err(ParamsError::InvalidReference(input.to_owned()));
        }

        if input.contains('@') {
            return Ok(Self {
                name: input.to_owned(),
                tag: None,
            });
        }

        // A colon followed by a '/' belongs to a registry port, not a tag.
        let (name, tag) = match input.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (input, DEFAULT_TAG),
        };
        if name.is_empty() || tag.is_empty() {
            return Err(ParamsError::InvalidReference(input.to_owned()));
        }

        Ok(Self {
            name: name.to_owned(),
            tag: Some(tag.to_owned()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Whether a locally known `repo:tag` string names this image.
    ///
    /// Docker Hub prefixes are ignored on both sides, so `alpine:latest`
    /// matches `docker.io/library/alpine:latest`.
    pub fn matches(&self, local: &str) -> bool {
        let Ok(other) = Self::parse(local) else {
            return false;
        };
        normalize_name(&self.name) == normalize_name(&other.name) && self.tag == other.tag
    }
}

fn normalize_name(name: &str) -> &str {
    HUB_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{tag}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
