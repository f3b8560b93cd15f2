use super::{running_as_root, Context, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use std::path::Path;
use stevedore_core::BundleLock;
use stevedore_runtime::{check_prereqs, executable_exists, format_missing, select_source};
use stevedore_schema::parse_parameters_file;

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_settings(ctx, &mut checks);
    check_tools(ctx, &mut checks, &mut all_pass);
    check_netns(&ctx.settings.netns_path, &mut checks);
    check_parameters(&ctx.user_data, &mut checks, &mut all_pass);
    check_bundle(ctx, &mut checks, &mut all_pass);

    if running_as_root() {
        checks.push(Check::pass(
            "ownership",
            "Running as root: image file ownership is preserved",
        ));
    } else {
        checks.push(Check::warn(
            "ownership",
            "Not running as root: extracted files will be owned by the current user",
        ));
    }

    print_results(&checks, all_pass, ctx.json)
}

fn check_settings(ctx: &Context, checks: &mut Vec<Check>) {
    match &ctx.settings_path {
        Some(path) => checks.push(Check::info(
            "settings",
            &format!("Settings file: {}", path.display()),
        )),
        None => checks.push(Check::info("settings", "No settings file, using defaults")),
    }
    checks.push(Check::info(
        "image_source",
        &format!("Image source: {}", ctx.settings.image_source),
    ));
}

fn check_tools(ctx: &Context, checks: &mut Vec<Check>, all_pass: &mut bool) {
    if let Err(e) = select_source(&ctx.settings.image_source) {
        *all_pass = false;
        checks.push(Check::fail("image_source_supported", &e.to_string()));
        return;
    }

    let runtime = ctx.settings.runtime_binary.as_path();
    let missing = check_prereqs(&ctx.settings.image_source, Some(runtime));
    if missing.is_empty() {
        checks.push(Check::pass("prereqs", "Image source and sandbox runtime found"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "prereqs",
            &format!("Missing prerequisites: {}", format_missing(&missing)),
        ));
    }

    if executable_exists(runtime) {
        checks.push(Check::info(
            "runtime",
            &format!("Sandbox runtime: {}", runtime.display()),
        ));
    }
}

fn check_netns(netns: &str, checks: &mut Vec<Check>) {
    if netns.is_empty() {
        checks.push(Check::info(
            "netns",
            "No network namespace configured: the sandbox gets a private one",
        ));
    } else if Path::new(netns).exists() {
        checks.push(Check::pass(
            "netns",
            &format!("Network namespace {netns} exists"),
        ));
    } else {
        checks.push(Check::warn(
            "netns",
            &format!("Network namespace {netns} does not exist yet"),
        ));
    }
}

fn check_parameters(path: &Path, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match parse_parameters_file(path) {
        Ok(params) => checks.push(Check::pass(
            "parameters",
            &format!(
                "Parameters {}: {} running {}",
                path.display(),
                params.image_reference(),
                params.entrypoint().join(" ")
            ),
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "parameters",
                &format!("Parameters {}: {e}", path.display()),
            ));
        }
    }
}

fn check_bundle(ctx: &Context, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let layout = &ctx.layout;
    if layout.config_path().exists() {
        checks.push(Check::info(
            "bundle",
            &format!("Bundle {} exists from an earlier build", layout.root().display()),
        ));
    }

    if !layout.lock_file().exists() {
        return;
    }
    match BundleLock::try_acquire(layout) {
        Ok(Some(_)) => checks.push(Check::pass("bundle_lock", "Bundle lock is free")),
        Ok(None) => checks.push(Check::warn(
            "bundle_lock",
            "Bundle lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "bundle_lock",
                &format!("Cannot check bundle lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, Failure> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", super::json_pretty(&json)?);
    } else {
        println!("stevedore doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
