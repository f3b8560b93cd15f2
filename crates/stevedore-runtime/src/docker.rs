use crate::image::{ExportStream, ImageSource};
use crate::RuntimeError;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use stevedore_schema::ImageReference;
use tracing::debug;

const LIST_FORMAT: &str = "{{.Repository}}:{{.Tag}}";

/// Image source backed by the `docker` or `podman` command line client.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!("{} {}", self.binary, args.join(" "));
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd
    }

    fn run_captured(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::retrieval(&format!("failed to run {}", self.binary), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::ImageRetrieval(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ImageSource for DockerCli {
    fn name(&self) -> &str {
        &self.binary
    }

    fn local_tags(&self) -> Result<Vec<String>, RuntimeError> {
        let stdout = self.run_captured(&["images", "--format", LIST_FORMAT])?;
        Ok(parse_image_list(&stdout))
    }

    fn pull(
        &self,
        reference: &ImageReference,
        progress: &dyn Fn(&str),
    ) -> Result<(), RuntimeError> {
        let reference = reference.to_string();
        let mut child = self
            .command(&["pull", &reference])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RuntimeError::retrieval(&format!("failed to run {}", self.binary), e))?;
        let stderr = drain_stderr(&mut child);

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = line.map_err(|e| RuntimeError::retrieval("reading pull output", e))?;
                let line = line.trim();
                if !line.is_empty() {
                    progress(line);
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| RuntimeError::retrieval("waiting for pull", e))?;
        let stderr = collect_stderr(stderr);
        if !status.success() {
            return Err(RuntimeError::ImageRetrieval(format!(
                "pull of {reference} failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn create_instance(&self, reference: &ImageReference) -> Result<String, RuntimeError> {
        let stdout = self.run_captured(&["create", &reference.to_string()])?;
        let id = stdout.trim();
        if id.is_empty() {
            return Err(RuntimeError::ImageRetrieval(format!(
                "{} create returned no instance id",
                self.binary
            )));
        }
        Ok(id.to_owned())
    }

    fn export(&self, instance: &str) -> Result<Box<dyn ExportStream>, RuntimeError> {
        let mut child = self
            .command(&["export", instance])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RuntimeError::retrieval(&format!("failed to run {}", self.binary), e))?;
        let stdout = child.stdout.take();
        let stderr = drain_stderr(&mut child);
        Ok(Box::new(ChildExport {
            child,
            stdout,
            stderr,
            instance: instance.to_owned(),
        }))
    }

    fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError> {
        self.run_captured(&["rm", instance]).map(|_| ())
    }
}

/// `repo:tag` lines of an image listing. Untagged images are skipped.
fn parse_image_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains("<none>"))
        .map(ToOwned::to_owned)
        .collect()
}

/// Read the child's stderr on its own thread so a chatty client cannot fill
/// the pipe while stdout is being consumed.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut pipe = child.stderr.take()?;
    Some(thread::spawn(move || {
        let mut stderr = String::new();
        let _ = pipe.read_to_string(&mut stderr);
        stderr
    }))
}

fn collect_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Export streamed from a child process' stdout.
struct ChildExport {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    instance: String,
}

impl Read for ChildExport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl ExportStream for ChildExport {
    fn finish(mut self: Box<Self>) -> Result<(), RuntimeError> {
        // tar stops at the end-of-archive marker; drain any trailing padding.
        if let Some(mut stdout) = self.stdout.take() {
            io::copy(&mut stdout, &mut io::sink())
                .map_err(|e| RuntimeError::retrieval("reading export stream", e))?;
        }
        let status = self
            .child
            .wait()
            .map_err(|e| RuntimeError::retrieval("waiting for export", e))?;
        let stderr = collect_stderr(self.stderr.take());
        if !status.success() {
            return Err(RuntimeError::ImageRetrieval(format!(
                "export of {} failed: {}",
                self.instance,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for ChildExport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
