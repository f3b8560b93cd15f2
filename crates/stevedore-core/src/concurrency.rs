use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use stevedore_store::BundleLayout;
use tracing::debug;

/// Advisory exclusive lock serializing builds of one bundle path.
///
/// The pipeline itself never locks; callers that may run concurrently take
/// this around the whole build.
pub struct BundleLock {
    lock_file: File,
}

impl BundleLock {
    pub fn acquire(layout: &BundleLayout) -> Result<Self, CoreError> {
        let file = open_lock_file(&layout.lock_file())?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        debug!("acquired {}", layout.lock_file().display());
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(layout: &BundleLayout) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(&layout.lock_file())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }

    /// Like `try_acquire`, but a held lock is an error.
    pub fn acquire_now(layout: &BundleLayout) -> Result<Self, CoreError> {
        Self::try_acquire(layout)?.ok_or_else(|| CoreError::Locked(layout.root().to_path_buf()))
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C requests cancellation at the next checkpoint; a second one
/// exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ncancellation requested, stopping at the next step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(dir: &Path) -> BundleLayout {
        BundleLayout::new(dir.join("bundles/container"))
    }

    #[test]
    fn lock_file_sits_next_to_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        {
            let _lock = BundleLock::acquire(&layout).unwrap();
            assert!(dir.path().join("bundles/container.lock").exists());
        }
        assert!(!layout.root().exists());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        let _lock = BundleLock::acquire(&layout).unwrap();
        assert!(BundleLock::try_acquire(&layout).unwrap().is_none());
        assert!(matches!(
            BundleLock::acquire_now(&layout),
            Err(CoreError::Locked(_))
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        {
            let _lock = BundleLock::acquire(&layout).unwrap();
        }

        assert!(BundleLock::try_acquire(&layout).unwrap().is_some());
    }
}
