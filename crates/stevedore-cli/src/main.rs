mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, Failure, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;
use stevedore_core::{install_signal_handler, settings_source, Settings};
use stevedore_store::BundleLayout;

#[derive(Debug, Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Turn container images into OCI bundles and run them sandboxed"
)]
struct Cli {
    /// Runtime parameters document ({"Image", "Name", "Entrypoint"}).
    #[arg(long, default_value = "testing/runtime-data.json", global = true)]
    user_data: PathBuf,

    /// Bundle directory to (re)create.
    #[arg(long, default_value = "testing/container", global = true)]
    container: PathBuf,

    /// Settings file (default: ~/.config/stevedore/config.json if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Image source: docker or podman.
    #[arg(long, global = true)]
    source: Option<String>,

    /// Network namespace to join; pass "" for a private one.
    #[arg(long, global = true)]
    netns: Option<String>,

    /// Sandbox runtime binary.
    #[arg(long, global = true)]
    runtime: Option<PathBuf>,

    /// Instance name handed to the sandbox runtime.
    #[arg(long, global = true)]
    instance_name: Option<String>,

    /// Fail instead of waiting when another build holds the bundle lock.
    #[arg(long, default_value_t = false, global = true)]
    no_wait: bool,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Defaults to `run`.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the bundle from the parameters document.
    Build,
    /// Build the bundle, then run it under the sandbox runtime.
    Run,
    /// Print the runtime spec that a build would write.
    Spec,
    /// Check that the image source and sandbox runtime are usable.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Cli {
    fn settings(&self) -> Result<Settings, Failure> {
        let mut settings = Settings::resolve(self.config.as_deref())?;
        if let Some(source) = &self.source {
            settings.image_source.clone_from(source);
        }
        if let Some(netns) = &self.netns {
            settings.netns_path.clone_from(netns);
        }
        if let Some(runtime) = &self.runtime {
            settings.runtime_binary.clone_from(runtime);
        }
        if let Some(name) = &self.instance_name {
            settings.instance_name.clone_from(name);
        }
        Ok(settings)
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STEVEDORE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    if let Some(Commands::Completions { shell }) = cli.command {
        return exit(commands::completions::run::<Cli>(shell));
    }

    let settings = match cli.settings() {
        Ok(s) => s,
        Err(failure) => return exit(Err(failure)),
    };

    let command = cli.command.unwrap_or(Commands::Run);
    let skip_prereqs = std::env::var("STEVEDORE_SKIP_PREREQS").as_deref() == Ok("1")
        || settings.image_source == "mock";
    let needs_runtime = matches!(command, Commands::Run);
    if matches!(command, Commands::Build | Commands::Run) && !skip_prereqs {
        let missing = stevedore_runtime::check_prereqs(
            &settings.image_source,
            needs_runtime.then_some(settings.runtime_binary.as_path()),
        );
        if !missing.is_empty() {
            eprintln!("error: {}", stevedore_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    if matches!(command, Commands::Build | Commands::Run) {
        install_signal_handler();
    }

    let ctx = Context {
        user_data: cli.user_data,
        layout: BundleLayout::new(cli.container),
        settings_path: settings_source(cli.config.as_deref()),
        settings,
        no_wait: cli.no_wait,
        json: cli.json,
    };

    let result = match command {
        Commands::Build => commands::build::run(&ctx),
        Commands::Run => commands::run::run(&ctx),
        Commands::Spec => commands::spec::run(&ctx),
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
    };
    exit(result)
}

fn exit(result: Result<u8, Failure>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}
