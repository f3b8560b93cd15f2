pub mod build;
pub mod completions;
pub mod doctor;
pub mod run;
pub mod spec;

use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use stevedore_core::{CoreError, ErrorKind, PipelineOptions, Settings};
use stevedore_schema::{parse_parameters_file, RuntimeParameters};
use stevedore_store::BundleLayout;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_BUNDLE_ERROR: u8 = 3;

/// Everything a command needs, resolved from flags and the settings file.
pub struct Context {
    pub user_data: PathBuf,
    pub layout: BundleLayout,
    /// File the settings came from; `None` when defaults are in effect.
    pub settings_path: Option<PathBuf>,
    pub settings: Settings,
    pub no_wait: bool,
    pub json: bool,
}

impl Context {
    pub fn parameters(&self) -> Result<RuntimeParameters, Failure> {
        parse_parameters_file(&self.user_data).map_err(|e| Failure {
            code: EXIT_INPUT_ERROR,
            message: format!("{}: {e}", self.user_data.display()),
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions::from_settings(&self.settings).with_ownership(running_as_root())
    }
}

/// A failed command: what to print and which exit code to return.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_FAILURE,
            message: message.into(),
        }
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        Self {
            code: exit_code(e.kind()),
            message: format!("{}: {e}", e.kind()),
        }
    }
}

pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Input => EXIT_INPUT_ERROR,
        ErrorKind::Staging | ErrorKind::Extraction => EXIT_BUNDLE_ERROR,
        ErrorKind::ImageRetrieval
        | ErrorKind::SpecWrite
        | ErrorKind::Sandbox
        | ErrorKind::Cancelled => EXIT_FAILURE,
    }
}

/// Ownership from the image can only be reproduced with root privileges.
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let euid = unsafe { libc::geteuid() };
    euid == 0
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, Failure> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Failure::generic(format!("JSON serialization failed: {e}")))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_plain(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish_plain(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish_plain(pb, format!("✗ {msg}"));
}
