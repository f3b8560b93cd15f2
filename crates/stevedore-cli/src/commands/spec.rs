use super::{Context, Failure, EXIT_SUCCESS};
use stevedore_core::{spec_for, CoreError};
use stevedore_runtime::render_spec;

/// Print the config.json a build would write. Reads only the parameters
/// document and settings.
pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let params = ctx.parameters()?;
    let spec = spec_for(&params, &ctx.pipeline_options())?;
    let rendered = render_spec(&spec).map_err(CoreError::from)?;
    print!("{rendered}");
    Ok(EXIT_SUCCESS)
}
