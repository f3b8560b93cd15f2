use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::info;

pub const DEFAULT_RUNTIME_BINARY: &str = "/usr/local/bin/runsc";
pub const DEFAULT_INSTANCE_NAME: &str = "user-container";

/// Launches a finished bundle under a low-level sandbox runtime (runsc or
/// any runtime accepting `run -bundle <dir> <name>`).
#[derive(Debug, Clone)]
pub struct SandboxRuntime {
    binary: PathBuf,
}

impl Default for SandboxRuntime {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME_BINARY)
    }
}

impl SandboxRuntime {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The launch command. Standard streams and working directory are
    /// inherited from this process.
    pub fn command(&self, bundle: &Path, instance: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg("-bundle")
            .arg(bundle)
            .arg(instance)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }

    /// Run the bundle and block until the sandboxed process exits.
    pub fn run(&self, bundle: &Path, instance: &str) -> Result<ExitStatus, RuntimeError> {
        info!(
            "starting {} for bundle {} as {instance}",
            self.binary.display(),
            bundle.display()
        );
        let status = self.command(bundle, instance).status().map_err(|e| {
            RuntimeError::Sandbox(format!("failed to start {}: {e}", self.binary.display()))
        })?;
        info!("exited container: {status}");
        Ok(status)
    }
}
