use crate::CoreError;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use stevedore_runtime::{DEFAULT_INSTANCE_NAME, DEFAULT_RUNTIME_BINARY};
use stevedore_store::DEFAULT_NAMESERVERS;
use tracing::debug;

pub const DEFAULT_NETNS_PATH: &str = "/var/run/netns/userappnet";
pub const DEFAULT_IMAGE_SOURCE: &str = "docker";

/// User settings, read from `~/.config/stevedore/config.json`.
///
/// Every field is optional in the file; absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub image_source: String,
    pub netns_path: String,
    pub runtime_binary: PathBuf,
    pub instance_name: String,
    pub nameservers: Vec<String>,
    pub working_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_source: DEFAULT_IMAGE_SOURCE.to_owned(),
            netns_path: DEFAULT_NETNS_PATH.to_owned(),
            runtime_binary: PathBuf::from(DEFAULT_RUNTIME_BINARY),
            instance_name: DEFAULT_INSTANCE_NAME.to_owned(),
            nameservers: DEFAULT_NAMESERVERS
                .iter()
                .map(|ns| (*ns).to_owned())
                .collect(),
            working_dir: "/".to_owned(),
        }
    }
}

impl Settings {
    /// Load from an explicitly named file. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path).map_err(|e| CoreError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let settings: Self = serde_json::from_str(&content).map_err(|e| CoreError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        settings.validate(path)?;
        debug!("loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load_default() -> Result<Self, CoreError> {
        match default_settings_path() {
            Some(path) => Self::load_if_exists(&path),
            None => Ok(Self::default()),
        }
    }

    /// `explicit` (from `--config`) must exist; otherwise the default file is
    /// optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, CoreError> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    fn load_if_exists(path: &Path) -> Result<Self, CoreError> {
        match fs::metadata(path) {
            Ok(_) => Self::load(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CoreError::Settings {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    fn validate(&self, path: &Path) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::Settings {
            path: path.to_path_buf(),
            reason: reason.to_owned(),
        };
        if self.instance_name.trim().is_empty() {
            return Err(invalid("instance_name must not be empty"));
        }
        if self.runtime_binary.as_os_str().is_empty() {
            return Err(invalid("runtime_binary must not be empty"));
        }
        if !self.working_dir.starts_with('/') {
            return Err(invalid("working_dir must be an absolute path"));
        }
        Ok(())
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/stevedore/config.json"))
}

/// The file `Settings::resolve(explicit)` reads, or `None` when it falls back
/// to defaults.
pub fn settings_source(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_settings_path().filter(|p| p.exists()),
    }
}
