use crate::concurrency::shutdown_requested;
use crate::config::Settings;
use crate::CoreError;
use stevedore_runtime::{
    build_spec, write_spec, EnsureOutcome, ImageExporter, ImageSource, RuntimeSpec, SpecParams,
};
use stevedore_schema::RuntimeParameters;
use stevedore_store::{ArchiveUnpacker, BundleLayout, BundleStager, UnpackReport};
use tracing::{debug, info};

/// Knobs of a bundle build that do not come from the parameters document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Network namespace the sandbox joins. Empty for a private one.
    pub netns_path: String,
    pub working_dir: String,
    pub nameservers: Vec<String>,
    /// Hostname used when the parameters carry no name.
    pub default_hostname: String,
    pub preserve_ownership: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            netns_path: settings.netns_path.clone(),
            working_dir: settings.working_dir.clone(),
            nameservers: settings.nameservers.clone(),
            default_hostname: settings.instance_name.clone(),
            preserve_ownership: true,
        }
    }

    #[must_use]
    pub fn with_ownership(mut self, preserve: bool) -> Self {
        self.preserve_ownership = preserve;
        self
    }
}

/// Runtime spec the pipeline would write for `params`. Touches nothing.
pub fn spec_for(
    params: &RuntimeParameters,
    options: &PipelineOptions,
) -> Result<RuntimeSpec, CoreError> {
    let hostname = match params.container_name() {
        "" => options.default_hostname.as_str(),
        name => name,
    };
    Ok(build_spec(&SpecParams {
        hostname,
        cwd: &options.working_dir,
        netns: &options.netns_path,
        args: params.entrypoint(),
    })?)
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuiltBundle {
    pub layout: BundleLayout,
    pub spec: RuntimeSpec,
    pub image: EnsureOutcome,
    pub unpack: UnpackReport,
}

/// Builds an OCI bundle from an image: stage, export and unpack, fixups,
/// write spec.
///
/// Any failure aborts the build and leaves the bundle directory unusable
/// until the next run resets it. Two pipelines must not target the same
/// bundle at once; see `BundleLock`.
pub struct BundlePipeline<'a> {
    source: &'a dyn ImageSource,
    stager: BundleStager,
    options: PipelineOptions,
}

impl<'a> BundlePipeline<'a> {
    pub fn new(source: &'a dyn ImageSource, layout: BundleLayout, options: PipelineOptions) -> Self {
        let stager = BundleStager::new(layout).with_nameservers(options.nameservers.clone());
        Self {
            source,
            stager,
            options,
        }
    }

    /// Build, honoring the process-wide cancellation flag.
    pub fn build(
        &self,
        params: &RuntimeParameters,
        progress: &dyn Fn(&str),
    ) -> Result<BuiltBundle, CoreError> {
        self.build_with_cancel(params, progress, &shutdown_requested)
    }

    /// Build, polling `cancelled` before the two long-running steps: the
    /// presence check and pull, and the export.
    pub fn build_with_cancel(
        &self,
        params: &RuntimeParameters,
        progress: &dyn Fn(&str),
        cancelled: &dyn Fn() -> bool,
    ) -> Result<BuiltBundle, CoreError> {
        let reference = params.image_reference();
        let layout = self.stager.layout();
        info!("building bundle {} from {reference}", layout.root().display());

        // Build the spec first so an unusable entrypoint fails before the
        // previous bundle is destroyed.
        let spec = spec_for(params, &self.options)?;

        progress("staging bundle directory");
        self.stager.reset()?;

        check_cancelled(cancelled)?;
        let exporter = ImageExporter::new(self.source);
        let image = exporter.ensure_present(reference, progress)?;

        check_cancelled(cancelled)?;
        progress(&format!("exporting {reference}"));
        let unpacker =
            ArchiveUnpacker::new(layout.rootfs_dir()).with_ownership(self.options.preserve_ownership);
        let unpack = exporter.export_with(reference, |stream| {
            unpacker.unpack(stream).map_err(CoreError::from)
        })?;
        debug!(
            "unpacked {} directories, {} files, {} links ({} skipped)",
            unpack.directories,
            unpack.files,
            unpack.links,
            unpack.skipped.len()
        );

        self.stager.apply_fixups()?;
        write_spec(&spec, &layout.config_path())?;

        info!("bundle ready at {}", layout.root().display());
        Ok(BuiltBundle {
            layout: layout.clone(),
            spec,
            image,
            unpack,
        })
    }
}

fn check_cancelled(cancelled: &dyn Fn() -> bool) -> Result<(), CoreError> {
    if cancelled() {
        info!("build cancelled");
        return Err(CoreError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_schema::parse_parameters_str;

    fn params(json: &str) -> RuntimeParameters {
        parse_parameters_str(json).unwrap()
    }

    #[test]
    fn hostname_falls_back_to_instance_name() {
        let p = params(r#"{"Image": "alpine", "Entrypoint": "/bin/sh"}"#);
        let spec = spec_for(&p, &PipelineOptions::default()).unwrap();
        assert_eq!(spec.hostname, "user-container");

        let named = params(r#"{"Image": "alpine", "Name": "demo", "Entrypoint": "/bin/sh"}"#);
        let spec = spec_for(&named, &PipelineOptions::default()).unwrap();
        assert_eq!(spec.hostname, "demo");
    }

    #[test]
    fn options_flow_into_spec() {
        let options = PipelineOptions {
            netns_path: String::new(),
            working_dir: "/srv".to_owned(),
            ..PipelineOptions::default()
        };
        let p = params(r#"{"Image": "alpine", "Entrypoint": "/bin/sh"}"#);
        let spec = spec_for(&p, &options).unwrap();
        assert_eq!(spec.process.cwd, "/srv");
        assert!(spec.linux.namespaces.iter().all(|n| n.path.is_none()));
    }

    #[test]
    fn default_options_join_stock_netns() {
        let p = params(r#"{"Image": "alpine", "Entrypoint": "/bin/sh"}"#);
        let spec = spec_for(&p, &PipelineOptions::default()).unwrap();
        assert_eq!(
            spec.linux.namespaces[1].path.as_deref(),
            Some("/var/run/netns/userappnet")
        );
    }
}
