use super::{json_pretty, spin_fail, spin_ok, spinner, Context, Failure, EXIT_SUCCESS};
use stevedore_core::{BuiltBundle, BundleLock, BundlePipeline, CoreError};
use stevedore_runtime::{select_source, EnsureOutcome};

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let (built, _lock) = build_bundle(ctx)?;

    if ctx.json {
        let image = match built.image {
            EnsureOutcome::AlreadyPresent => "present",
            EnsureOutcome::Pulled => "pulled",
        };
        let payload = serde_json::json!({
            "bundle": built.layout.root(),
            "config": built.layout.config_path(),
            "image": image,
            "directories": built.unpack.directories,
            "files": built.unpack.files,
            "links": built.unpack.links,
            "skipped": built.unpack.skipped.len(),
            "status": "built"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("built bundle {}", built.layout.root().display());
        if !built.unpack.skipped.is_empty() {
            println!(
                "skipped {} unsupported archive entries",
                built.unpack.skipped.len()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Build the bundle under its lock. The lock is returned so callers can keep
/// the bundle stable while they use it.
pub fn build_bundle(ctx: &Context) -> Result<(BuiltBundle, BundleLock), Failure> {
    let params = ctx.parameters()?;
    let source = select_source(&ctx.settings.image_source).map_err(CoreError::from)?;
    let lock = if ctx.no_wait {
        BundleLock::acquire_now(&ctx.layout)?
    } else {
        BundleLock::acquire(&ctx.layout)?
    };

    let pipeline = BundlePipeline::new(&*source, ctx.layout.clone(), ctx.pipeline_options());
    let pb = if ctx.json {
        None
    } else {
        Some(spinner(&format!("building bundle from {}...", params.image_reference())))
    };
    let progress = |msg: &str| {
        if let Some(pb) = &pb {
            pb.set_message(msg.to_owned());
        }
    };

    match pipeline.build(&params, &progress) {
        Ok(built) => {
            if let Some(pb) = &pb {
                spin_ok(pb, "bundle built");
            }
            Ok((built, lock))
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "build failed");
            }
            Err(e.into())
        }
    }
}
