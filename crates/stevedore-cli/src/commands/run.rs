use super::build::build_bundle;
use super::{Context, Failure, EXIT_FAILURE};
use std::os::unix::process::ExitStatusExt;
use stevedore_core::CoreError;
use stevedore_runtime::SandboxRuntime;

/// Build the bundle, then hand it to the sandbox runtime and exit with the
/// sandboxed process' status.
pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let (built, _lock) = build_bundle(ctx)?;

    let runtime = SandboxRuntime::new(&ctx.settings.runtime_binary);
    let status = runtime
        .run(built.layout.root(), &ctx.settings.instance_name)
        .map_err(CoreError::from)?;

    if let Some(code) = status.code() {
        return Ok(u8::try_from(code).unwrap_or(EXIT_FAILURE));
    }
    // Killed by a signal: report it the way a shell would.
    Ok(status
        .signal()
        .and_then(|sig| u8::try_from(128 + sig).ok())
        .unwrap_or(EXIT_FAILURE))
}
