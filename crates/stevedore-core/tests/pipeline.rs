//! End-to-end bundle builds against a mock image source.

use std::cell::Cell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use stevedore_core::{BundlePipeline, CoreError, ErrorKind, PipelineOptions};
use stevedore_runtime::{EnsureOutcome, MockImageSource, RuntimeSpec, SourceCall};
use stevedore_schema::parse_parameters_str;
use stevedore_store::BundleLayout;

const DEMO_PARAMS: &str = r#"{"Image": "alpine:latest", "Name": "demo", "Entrypoint": "/bin/sh"}"#;

fn shell_archive() -> Vec<u8> {
    let mut ar = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_size(0);
    ar.append_data(&mut dir, "bin/", &[] as &[u8]).unwrap();

    let content = b"#!/bin/busybox\n";
    let mut sh = tar::Header::new_gnu();
    sh.set_entry_type(tar::EntryType::Regular);
    sh.set_mode(0o755);
    sh.set_size(content.len() as u64);
    ar.append_data(&mut sh, "bin/sh", &content[..]).unwrap();

    ar.into_inner().unwrap()
}

fn options() -> PipelineOptions {
    PipelineOptions::default().with_ownership(false)
}

fn not_cancelled() -> bool {
    false
}

fn read_spec(layout: &BundleLayout) -> RuntimeSpec {
    serde_json::from_str(&fs::read_to_string(layout.config_path()).unwrap()).unwrap()
}

fn mode(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

#[test]
fn builds_runnable_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new().with_archive(shell_archive());
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    let built = BundlePipeline::new(&source, layout.clone(), options())
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap();

    let sh = layout.rootfs_dir().join("bin/sh");
    assert!(sh.is_file());
    assert_eq!(mode(&sh), 0o755);

    let spec = read_spec(&layout);
    assert_eq!(spec.process.args, vec!["/bin/sh"]);
    assert_eq!(spec.root.path, "rootfs");
    assert_eq!(spec.hostname, "demo");
    assert_eq!(spec, built.spec);

    assert_eq!(
        fs::read_to_string(layout.resolv_conf_path()).unwrap(),
        "nameserver 8.8.8.8\n"
    );
    assert_eq!(built.image, EnsureOutcome::Pulled);
    assert_eq!(built.unpack.files, 1);
    assert!(built.unpack.skipped.is_empty());
}

#[test]
fn present_image_skips_pull() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new()
        .with_local_tags(["docker.io/library/alpine:latest"])
        .with_archive(shell_archive());
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    let built = BundlePipeline::new(&source, layout, options())
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap();

    assert_eq!(built.image, EnsureOutcome::AlreadyPresent);
    assert!(!source
        .calls()
        .iter()
        .any(|c| matches!(c, SourceCall::Pull(_))));
}

#[test]
fn second_build_leaves_no_stale_files() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new().with_archive(shell_archive());
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();
    let pipeline = BundlePipeline::new(&source, layout.clone(), options());

    pipeline
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap();
    fs::write(layout.rootfs_dir().join("leftover"), "stale").unwrap();
    fs::write(layout.root().join("notes.txt"), "stale").unwrap();

    pipeline
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap();

    assert!(!layout.rootfs_dir().join("leftover").exists());
    assert!(!layout.root().join("notes.txt").exists());
    assert!(layout.rootfs_dir().join("bin/sh").exists());
    // The image was pulled on the first run only.
    let pulls = source
        .calls()
        .iter()
        .filter(|c| matches!(c, SourceCall::Pull(_)))
        .count();
    assert_eq!(pulls, 1);
}

#[test]
fn registry_failure_is_retrieval_error() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new().failing_pull();
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    let err = BundlePipeline::new(&source, layout.clone(), options())
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ImageRetrieval);
    assert!(!layout.config_path().exists());
}

#[test]
fn hostile_archive_is_extraction_error() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));

    let mut ar = tar::Builder::new(Vec::new());
    let mut h = tar::Header::new_gnu();
    h.set_entry_type(tar::EntryType::Regular);
    h.set_mode(0o644);
    h.set_size(1);
    h.as_gnu_mut().unwrap().name[..13].copy_from_slice(b"../../escaped");
    h.set_cksum();
    ar.append(&h, &b"x"[..]).unwrap();
    let source = MockImageSource::new().with_archive(ar.into_inner().unwrap());
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    let err = BundlePipeline::new(&source, layout.clone(), options())
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Extraction);
    assert!(!dir.path().join("escaped").exists());
    assert!(!layout.config_path().exists());
    assert!(matches!(source.calls().last(), Some(SourceCall::Remove(_))));
}

#[test]
fn staging_failure_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the bundle's parent directory should be.
    fs::write(dir.path().join("blocker"), "file").unwrap();
    let layout = BundleLayout::new(dir.path().join("blocker/container"));
    let source = MockImageSource::new();
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    let err = BundlePipeline::new(&source, layout, options())
        .build_with_cancel(&params, &|_| {}, &not_cancelled)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Staging);
    assert!(source.calls().is_empty());
}

#[test]
fn cancellation_before_export() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new().with_archive(shell_archive());
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    // Let the first checkpoint pass, cancel at the second.
    let polls = Cell::new(0);
    let cancelled = || {
        polls.set(polls.get() + 1);
        polls.get() > 1
    };

    let err = BundlePipeline::new(&source, layout, options())
        .build_with_cancel(&params, &|_| {}, &cancelled)
        .unwrap_err();

    assert!(matches!(err, CoreError::Cancelled));
    assert_eq!(polls.get(), 2);
    assert!(!source
        .calls()
        .iter()
        .any(|c| matches!(c, SourceCall::Create(_) | SourceCall::Export(_))));
}

#[test]
fn cancellation_before_pull() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new();
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();

    let err = BundlePipeline::new(&source, layout, options())
        .build_with_cancel(&params, &|_| {}, &|| true)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(source.calls().is_empty());
}

#[test]
fn progress_reports_each_step() {
    let dir = tempfile::tempdir().unwrap();
    let layout = BundleLayout::new(dir.path().join("container"));
    let source = MockImageSource::new().with_archive(shell_archive());
    let params = parse_parameters_str(DEMO_PARAMS).unwrap();
    let lines = std::cell::RefCell::new(Vec::new());

    BundlePipeline::new(&source, layout, options())
        .build_with_cancel(
            &params,
            &|l| lines.borrow_mut().push(l.to_owned()),
            &not_cancelled,
        )
        .unwrap();

    let lines = lines.into_inner();
    assert_eq!(lines.first().map(String::as_str), Some("staging bundle directory"));
    assert!(lines.iter().any(|l| l == "exporting alpine:latest"));
}
