use crate::layout::BundleLayout;
use crate::{staging_err, StoreError};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Resolvers written into the root filesystem when none are configured.
pub const DEFAULT_NAMESERVERS: &[&str] = &["8.8.8.8"];

const BUNDLE_DIR_MODE: u32 = 0o755;
const RESOLV_CONF_MODE: u32 = 0o644;

/// Prepares a pristine bundle directory and applies post-extraction fixups.
pub struct BundleStager {
    layout: BundleLayout,
    nameservers: Vec<String>,
}

impl BundleStager {
    pub fn new(layout: BundleLayout) -> Self {
        Self {
            layout,
            nameservers: DEFAULT_NAMESERVERS
                .iter()
                .map(|ns| (*ns).to_owned())
                .collect(),
        }
    }

    #[must_use]
    pub fn with_nameservers(mut self, nameservers: Vec<String>) -> Self {
        if !nameservers.is_empty() {
            self.nameservers = nameservers;
        }
        self
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    /// Remove whatever is at the bundle path and recreate the bundle and
    /// rootfs directories empty. A missing bundle path is not an error.
    pub fn reset(&self) -> Result<(), StoreError> {
        let root = self.layout.root();
        remove_tree(root)?;

        DirBuilder::new()
            .recursive(true)
            .mode(BUNDLE_DIR_MODE)
            .create(root)
            .map_err(staging_err(root))?;

        let rootfs = self.layout.rootfs_dir();
        DirBuilder::new()
            .mode(BUNDLE_DIR_MODE)
            .create(&rootfs)
            .map_err(staging_err(&rootfs))?;

        info!("staged empty bundle at {}", root.display());
        Ok(())
    }

    /// Fixups applied once the image has been unpacked into the rootfs.
    ///
    /// Writes a minimal resolver configuration, replacing whatever the image
    /// shipped at that path. An `/etc` symlink is followed only while it stays
    /// inside the root filesystem.
    pub fn apply_fixups(&self) -> Result<(), StoreError> {
        let rootfs = self.layout.rootfs_dir();
        let etc = rootfs.join("etc");
        let resolv = match fs::symlink_metadata(&etc) {
            Ok(meta) if meta.is_dir() => self.layout.resolv_conf_path(),
            Ok(meta) if meta.file_type().is_symlink() => {
                confined_dir(&rootfs, &etc)?.join("resolv.conf")
            }
            Ok(_) => {
                return Err(StoreError::Staging {
                    path: etc,
                    source: io::Error::other("not a directory"),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                DirBuilder::new()
                    .mode(BUNDLE_DIR_MODE)
                    .create(&etc)
                    .map_err(staging_err(&etc))?;
                self.layout.resolv_conf_path()
            }
            Err(e) => return Err(staging_err(&etc)(e)),
        };

        // Images commonly ship resolv.conf as a symlink; never write through it.
        if let Ok(meta) = fs::symlink_metadata(&resolv) {
            if !meta.is_dir() {
                fs::remove_file(&resolv).map_err(staging_err(&resolv))?;
            }
        }

        let contents: String = self
            .nameservers
            .iter()
            .map(|ns| format!("nameserver {ns}\n"))
            .collect();
        fs::write(&resolv, contents).map_err(staging_err(&resolv))?;
        fs::set_permissions(&resolv, fs::Permissions::from_mode(RESOLV_CONF_MODE))
            .map_err(staging_err(&resolv))?;

        debug!("wrote {}", resolv.display());
        Ok(())
    }
}

/// Resolve `link` to the directory it names, which must lie under `rootfs`.
fn confined_dir(rootfs: &Path, link: &Path) -> Result<PathBuf, StoreError> {
    let root = fs::canonicalize(rootfs).map_err(staging_err(rootfs))?;
    let resolved = fs::canonicalize(link).map_err(staging_err(link))?;
    if !resolved.starts_with(&root) || !resolved.is_dir() {
        return Err(StoreError::Staging {
            path: link.to_path_buf(),
            source: io::Error::other("does not resolve to a directory inside the root filesystem"),
        });
    }
    Ok(resolved)
}

fn remove_tree(path: &Path) -> Result<(), StoreError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return fs::remove_file(path).map_err(staging_err(path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(staging_err(path)(e)),
    }

    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            // Extracted images contain read-only directories.
            debug!("making {} writable before removal", path.display());
            let _ = Command::new("chmod")
                .args(["-R", "u+rwX", &path.to_string_lossy()])
                .status();
            fs::remove_dir_all(path).map_err(staging_err(path))
        }
        Err(e) => Err(staging_err(path)(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stager() -> (tempfile::TempDir, BundleStager) {
        let dir = tempfile::tempdir().unwrap();
        let layout = BundleLayout::new(dir.path().join("container"));
        (dir, BundleStager::new(layout))
    }

    #[test]
    fn reset_creates_empty_bundle() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();

        let layout = stager.layout();
        assert!(layout.root().is_dir());
        assert!(layout.rootfs_dir().is_dir());
        assert_eq!(fs::read_dir(layout.rootfs_dir()).unwrap().count(), 0);

        let mode = fs::metadata(layout.rootfs_dir())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o700, 0o700);
    }

    #[test]
    fn reset_is_idempotent() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();
        fs::write(stager.layout().config_path(), "{}").unwrap();
        fs::create_dir_all(stager.layout().rootfs_dir().join("usr/bin")).unwrap();
        fs::write(stager.layout().rootfs_dir().join("usr/bin/stale"), "old").unwrap();

        stager.reset().unwrap();

        assert!(!stager.layout().config_path().exists());
        assert_eq!(
            fs::read_dir(stager.layout().rootfs_dir()).unwrap().count(),
            0
        );
    }

    #[test]
    fn reset_removes_read_only_trees() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();
        let locked = stager.layout().rootfs_dir().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("file"), "x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        stager.reset().unwrap();
        assert!(!locked.exists());
    }

    #[test]
    fn reset_replaces_a_plain_file() {
        let (_dir, stager) = test_stager();
        fs::write(stager.layout().root(), "not a directory").unwrap();
        stager.reset().unwrap();
        assert!(stager.layout().rootfs_dir().is_dir());
    }

    #[test]
    fn fixups_write_resolv_conf() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();
        stager.apply_fixups().unwrap();

        let resolv = stager.layout().resolv_conf_path();
        assert_eq!(fs::read_to_string(&resolv).unwrap(), "nameserver 8.8.8.8\n");
        let mode = fs::metadata(&resolv).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn fixups_overwrite_image_resolv_conf() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();
        let etc = stager.layout().rootfs_dir().join("etc");
        fs::create_dir(&etc).unwrap();
        fs::write(etc.join("resolv.conf"), "nameserver 127.0.0.53\n").unwrap();

        stager.apply_fixups().unwrap();
        assert_eq!(
            fs::read_to_string(stager.layout().resolv_conf_path()).unwrap(),
            "nameserver 8.8.8.8\n"
        );
    }

    #[test]
    fn fixups_replace_symlinked_resolv_conf() {
        let (dir, stager) = test_stager();
        stager.reset().unwrap();
        let outside = dir.path().join("host-resolv.conf");
        fs::write(&outside, "host content").unwrap();
        let etc = stager.layout().rootfs_dir().join("etc");
        fs::create_dir(&etc).unwrap();
        std::os::unix::fs::symlink(&outside, etc.join("resolv.conf")).unwrap();

        stager.apply_fixups().unwrap();

        assert_eq!(fs::read_to_string(&outside).unwrap(), "host content");
        let resolv = stager.layout().resolv_conf_path();
        assert!(!fs::symlink_metadata(&resolv).unwrap().file_type().is_symlink());
    }

    #[test]
    fn custom_nameservers() {
        let (_dir, stager) = test_stager();
        let stager = stager.with_nameservers(vec!["1.1.1.1".to_owned(), "9.9.9.9".to_owned()]);
        stager.reset().unwrap();
        stager.apply_fixups().unwrap();
        assert_eq!(
            fs::read_to_string(stager.layout().resolv_conf_path()).unwrap(),
            "nameserver 1.1.1.1\nnameserver 9.9.9.9\n"
        );
    }

    #[test]
    fn fixups_follow_in_root_etc_symlink() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();
        let rootfs = stager.layout().rootfs_dir();
        fs::create_dir_all(rootfs.join("private/etc")).unwrap();
        std::os::unix::fs::symlink("private/etc", rootfs.join("etc")).unwrap();

        stager.apply_fixups().unwrap();

        assert_eq!(
            fs::read_to_string(rootfs.join("private/etc/resolv.conf")).unwrap(),
            "nameserver 8.8.8.8\n"
        );
        assert!(fs::symlink_metadata(rootfs.join("etc"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn fixups_reject_etc_symlink_leaving_rootfs() {
        let (dir, stager) = test_stager();
        stager.reset().unwrap();
        let host_etc = dir.path().join("host-etc");
        fs::create_dir(&host_etc).unwrap();
        std::os::unix::fs::symlink(&host_etc, stager.layout().rootfs_dir().join("etc")).unwrap();

        let err = stager.apply_fixups().unwrap_err();

        assert!(err.is_staging());
        assert!(!host_etc.join("resolv.conf").exists());
    }

    #[test]
    fn fixups_reject_non_directory_etc() {
        let (_dir, stager) = test_stager();
        stager.reset().unwrap();
        fs::write(stager.layout().rootfs_dir().join("etc"), "file").unwrap();
        let err = stager.apply_fixups().unwrap_err();
        assert!(err.is_staging());
    }
}
