//! Fixed security and mount policy shared by every generated runtime spec.
//!
//! There is no per-image or per-container negotiation: every bundle gets
//! exactly these tables.

/// OCI runtime spec version written into `ociVersion`.
pub const OCI_VERSION: &str = "1.0.0";

/// Capability set applied identically to bounding, effective, inheritable and
/// permitted.
pub const BASELINE_CAPABILITIES: [&str; 14] = [
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
];

/// Process environment. Callers cannot extend it.
pub const BASELINE_ENV: [&str; 2] = [
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    "TERM=xterm",
];

pub struct MountRule {
    pub destination: &'static str,
    pub kind: &'static str,
    pub source: &'static str,
    pub options: &'static [&'static str],
}

pub const BASELINE_MOUNTS: [MountRule; 3] = [
    MountRule {
        destination: "/proc",
        kind: "proc",
        source: "proc",
        options: &[],
    },
    MountRule {
        destination: "/dev",
        kind: "tmpfs",
        source: "tmpfs",
        options: &[],
    },
    MountRule {
        destination: "/sys",
        kind: "sysfs",
        source: "sysfs",
        options: &["nosuid", "noexec", "nodev", "ro"],
    },
];

pub const NETWORK_NAMESPACE: &str = "network";

/// Namespaces in the order they appear in the spec. Only the network
/// namespace may be bound to an external path.
pub const NAMESPACES: [&str; 5] = ["pid", NETWORK_NAMESPACE, "ipc", "uts", "mount"];

pub const NOFILE_LIMIT: u64 = 1024;

/// Root user inside the sandbox.
pub const PROCESS_UID: u32 = 0;
pub const PROCESS_GID: u32 = 0;
