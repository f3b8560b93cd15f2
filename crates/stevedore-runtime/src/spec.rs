use crate::policy::{
    BASELINE_CAPABILITIES, BASELINE_ENV, BASELINE_MOUNTS, NAMESPACES, NETWORK_NAMESPACE,
    NOFILE_LIMIT, OCI_VERSION, PROCESS_GID, PROCESS_UID,
};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use stevedore_store::ROOTFS_DIR;
use tracing::info;

/// OCI runtime specification, limited to the fields stevedore emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    pub oci_version: String,
    pub process: Process,
    pub root: Root,
    pub hostname: String,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: Capabilities,
    pub rlimits: Vec<Rlimit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
}

impl Capabilities {
    fn baseline() -> Self {
        let caps: Vec<String> = BASELINE_CAPABILITIES
            .iter()
            .map(|c| (*c).to_owned())
            .collect();
        Self {
            bounding: caps.clone(),
            effective: caps.clone(),
            inheritable: caps.clone(),
            permitted: caps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub kind: String,
    pub hard: u64,
    pub soft: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linux {
    pub namespaces: Vec<Namespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Inputs that vary between bundles. Everything else comes from the fixed
/// policy tables.
#[derive(Debug, Clone, Copy)]
pub struct SpecParams<'a> {
    pub hostname: &'a str,
    pub cwd: &'a str,
    /// Path of an existing network namespace to join. Empty means a private
    /// namespace.
    pub netns: &'a str,
    pub args: &'a [String],
}

/// Build the runtime spec. Pure: no I/O, same input gives the same value.
pub fn build_spec(params: &SpecParams<'_>) -> Result<RuntimeSpec, RuntimeError> {
    if !params.args.first().is_some_and(|a| !a.trim().is_empty()) {
        return Err(RuntimeError::EmptyEntrypoint);
    }

    let namespaces = NAMESPACES
        .iter()
        .map(|kind| Namespace {
            kind: (*kind).to_owned(),
            path: (*kind == NETWORK_NAMESPACE && !params.netns.is_empty())
                .then(|| params.netns.to_owned()),
        })
        .collect();

    let mounts = BASELINE_MOUNTS
        .iter()
        .map(|m| Mount {
            destination: m.destination.to_owned(),
            kind: m.kind.to_owned(),
            source: m.source.to_owned(),
            options: m.options.iter().map(|o| (*o).to_owned()).collect(),
        })
        .collect();

    Ok(RuntimeSpec {
        oci_version: OCI_VERSION.to_owned(),
        process: Process {
            terminal: true,
            user: User {
                uid: PROCESS_UID,
                gid: PROCESS_GID,
            },
            args: params.args.to_vec(),
            env: BASELINE_ENV.iter().map(|e| (*e).to_owned()).collect(),
            cwd: params.cwd.to_owned(),
            capabilities: Capabilities::baseline(),
            rlimits: vec![Rlimit {
                kind: "RLIMIT_NOFILE".to_owned(),
                hard: NOFILE_LIMIT,
                soft: NOFILE_LIMIT,
            }],
        },
        root: Root {
            path: ROOTFS_DIR.to_owned(),
            readonly: false,
        },
        hostname: params.hostname.to_owned(),
        mounts,
        linux: Linux { namespaces },
    })
}

/// Serialize as a tab-indented JSON document with a trailing newline.
pub fn render_spec(spec: &RuntimeSpec) -> Result<String, RuntimeError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    spec.serialize(&mut ser).map_err(RuntimeError::SpecSerialize)?;
    buf.push(b'\n');
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn write_spec(spec: &RuntimeSpec, path: &Path) -> Result<(), RuntimeError> {
    let rendered = render_spec(spec)?;
    fs::write(path, rendered).map_err(|source| RuntimeError::SpecWrite {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote runtime spec to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_owned()).collect()
    }

    fn params<'a>(netns: &'a str, argv: &'a [String]) -> SpecParams<'a> {
        SpecParams {
            hostname: "demo",
            cwd: "/",
            netns,
            args: argv,
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let argv = args(&["/bin/sh"]);
        let a = render_spec(&build_spec(&params("/var/run/netns/x", &argv)).unwrap()).unwrap();
        let b = render_spec(&build_spec(&params("/var/run/netns/x", &argv)).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn capability_sets_match_baseline() {
        for argv in [args(&["/bin/sh"]), args(&["/usr/bin/env", "-i"])] {
            for netns in ["", "/var/run/netns/userappnet"] {
                let spec = build_spec(&params(netns, &argv)).unwrap();
                let caps = &spec.process.capabilities;
                assert_eq!(caps.bounding, BASELINE_CAPABILITIES);
                assert_eq!(caps.effective, caps.bounding);
                assert_eq!(caps.inheritable, caps.bounding);
                assert_eq!(caps.permitted, caps.bounding);
            }
        }
    }

    #[test]
    fn namespaces_in_fixed_order() {
        let argv = args(&["/bin/sh"]);
        let spec = build_spec(&params("/var/run/netns/userappnet", &argv)).unwrap();
        let kinds: Vec<_> = spec
            .linux
            .namespaces
            .iter()
            .map(|n| n.kind.as_str())
            .collect();
        assert_eq!(kinds, ["pid", "network", "ipc", "uts", "mount"]);
        assert_eq!(
            spec.linux.namespaces[1].path.as_deref(),
            Some("/var/run/netns/userappnet")
        );
        assert!(spec
            .linux
            .namespaces
            .iter()
            .filter(|n| n.kind != "network")
            .all(|n| n.path.is_none()));
    }

    #[test]
    fn empty_netns_is_private() {
        let argv = args(&["/bin/sh"]);
        let spec = build_spec(&params("", &argv)).unwrap();
        assert!(spec.linux.namespaces[1].path.is_none());
        let json = render_spec(&spec).unwrap();
        assert!(!json.contains("\"path\": \"\""));
    }

    #[test]
    fn empty_args_rejected() {
        assert!(matches!(
            build_spec(&params("", &[])),
            Err(RuntimeError::EmptyEntrypoint)
        ));
        let blank = args(&[""]);
        assert!(build_spec(&params("", &blank)).is_err());
    }

    #[test]
    fn fixed_process_fields() {
        let argv = args(&["/bin/sh"]);
        let spec = build_spec(&params("", &argv)).unwrap();
        assert_eq!(spec.oci_version, "1.0.0");
        assert_eq!(spec.process.args, argv);
        assert_eq!(spec.process.env, BASELINE_ENV);
        assert_eq!(spec.process.user, User { uid: 0, gid: 0 });
        assert_eq!(spec.process.rlimits.len(), 1);
        assert_eq!(spec.process.rlimits[0].soft, 1024);
        assert_eq!(spec.process.rlimits[0].hard, 1024);
        assert_eq!(spec.root.path, "rootfs");
        assert!(!spec.root.readonly);
        assert_eq!(spec.hostname, "demo");
    }

    #[test]
    fn rendered_document_uses_oci_keys_and_tabs() {
        let argv = args(&["/bin/sh"]);
        let json = render_spec(&build_spec(&params("", &argv)).unwrap()).unwrap();
        assert!(json.starts_with("{\n\t\"ociVersion\": \"1.0.0\""));
        assert!(json.ends_with("}\n"));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["process"]["rlimits"][0]["type"], "RLIMIT_NOFILE");
        assert_eq!(value["mounts"][2]["type"], "sysfs");
        assert!(value["mounts"][0].get("options").is_none());
        assert_eq!(value["root"]["path"], "rootfs");
    }

    #[test]
    fn write_spec_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let argv = args(&["/bin/sh"]);
        let spec = build_spec(&params("", &argv)).unwrap();
        write_spec(&spec, &path).unwrap();
        let parsed: RuntimeSpec =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let argv = args(&["/bin/sh"]);
        let spec = build_spec(&params("", &argv)).unwrap();
        let result = write_spec(&spec, &dir.path().join("absent/config.json"));
        assert!(matches!(result, Err(RuntimeError::SpecWrite { .. })));
    }
}
