use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether `program` can be executed: an executable file when given as a
/// path, otherwise a command found on `PATH`.
pub fn executable_exists(program: &Path) -> bool {
    if program.components().count() > 1 {
        return program
            .metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
    }
    program.to_str().is_some_and(command_exists)
}

/// Check the image client named by `source` and, when given, the sandbox
/// runtime binary. A build needs only the former.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(source: &str, runtime_binary: Option<&Path>) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    match source {
        "docker" if !command_exists("docker") => missing.push(MissingPrereq {
            name: "docker".to_owned(),
            purpose: "pulling and exporting container images",
            install_hint: "zypper install docker | apt install docker.io | dnf install moby-engine | pacman -S docker",
        }),
        "podman" if !command_exists("podman") => missing.push(MissingPrereq {
            name: "podman".to_owned(),
            purpose: "pulling and exporting container images",
            install_hint: "zypper install podman | apt install podman | dnf install podman | pacman -S podman",
        }),
        _ => {}
    }

    if let Some(binary) = runtime_binary.filter(|b| !executable_exists(b)) {
        missing.push(MissingPrereq {
            name: binary.display().to_string(),
            purpose: "sandboxed execution of the bundle",
            install_hint: "install gVisor runsc from https://gvisor.dev/docs/user_guide/install/",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nstevedore needs these tools to build and run bundles.");
    msg
}
