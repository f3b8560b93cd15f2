use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the root filesystem directory inside a bundle. The runtime spec's
/// `root.path` must carry exactly this value.
pub const ROOTFS_DIR: &str = "rootfs";
pub const CONFIG_FILE: &str = "config.json";
/// Resolver configuration injected into every root filesystem, relative to it.
pub const RESOLV_CONF: &str = "etc/resolv.conf";

/// Directory layout of an OCI runtime bundle.
///
/// ```text
/// <root>/config.json
/// <root>/rootfs/...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join(ROOTFS_DIR)
    }

    #[inline]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    #[inline]
    pub fn resolv_conf_path(&self) -> PathBuf {
        self.rootfs_dir().join(RESOLV_CONF)
    }

    /// Advisory lock file used by callers to serialize builds of this bundle.
    ///
    /// Lives next to the bundle, not inside it, since the bundle directory is
    /// deleted at the start of every build.
    pub fn lock_file(&self) -> PathBuf {
        let mut name = self
            .root
            .file_name()
            .map_or_else(|| OsString::from("bundle"), ToOwned::to_owned);
        name.push(".lock");
        self.root.with_file_name(name)
    }
}
