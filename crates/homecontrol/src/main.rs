use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use homecontrol_core::config::HostConfig;
use homecontrol_core::kernel::Application;
use homecontrol_core::module_system::{LoadOutcome, ModuleCatalog, ModuleCode};

use core_logging::CoreLogging;
use heartbeat_example::Heartbeat;

/// HomeControl: home automation hub host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Print "pong" and exit
    #[arg(long)]
    ping: bool,

    /// Host configuration file (.json, .yaml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Module folder, overrides the configuration
    #[arg(short, long)]
    modules: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Commands {
    /// Load all modules and run until interrupted
    #[default]
    Run,
    /// Load all modules, report how each load went and unload them again
    Check,
}

/// Module code compiled into this binary, keyed by module name
fn catalog() -> ModuleCatalog {
    ModuleCatalog::new().with(heartbeat_example::MODULE_NAME, || Box::new(Heartbeat) as Box<dyn ModuleCode>)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    let mut config = match &args.config {
        Some(path) => match HostConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => HostConfig::default(),
    };
    if let Some(folder) = args.modules {
        config.module_manager.folder = folder;
    }
    let log_level = config.logging.level.clone();

    println!("Initializing application...");
    let mut app = match Application::new(config, catalog()) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Logging first, so the rest of startup is visible
    if let Err(failure) = app
        .module_manager()
        .load_builtin(core_logging::MODULE_NAME, Box::new(CoreLogging::new(log_level)))
        .await
    {
        eprintln!("Failed to set up logging: {}", failure);
    }

    if let Err(e) = app.initialize().await {
        error!("Initialization failed: {}", e);
        eprintln!("Initialization failed: {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = app.start().await {
        eprintln!("Start failed: {}", e);
        let _ = app.shutdown().await;
        return ExitCode::FAILURE;
    }

    let code = match args.command.unwrap_or_default() {
        Commands::Run => run(&app).await,
        Commands::Check => check(&app).await,
    };

    println!("Shutting down application...");
    if let Err(e) = app.shutdown().await {
        eprintln!("Shutdown incomplete: {}", e);
        return ExitCode::FAILURE;
    }
    code
}

async fn run(app: &Application) -> ExitCode {
    if let Err(code) = load_and_report(app).await {
        return code;
    }
    info!("Running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to wait for Ctrl-C: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn check(app: &Application) -> ExitCode {
    match load_and_report(app).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(code) => code,
    }
}

/// Load the configured module folder and print one line per module.
/// Returns how many modules failed to load.
async fn load_and_report(app: &Application) -> Result<usize, ExitCode> {
    let folder = &app.config().module_manager.folder;
    let outcomes = match app.load_modules().await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            eprintln!("Cannot load modules from {}: {}", folder.display(), e);
            return Err(ExitCode::FAILURE);
        }
    };

    if outcomes.is_empty() {
        println!("No modules found in {}", folder.display());
    }
    Ok(outcomes.iter().filter(|outcome| !report(outcome)).count())
}

fn report(outcome: &LoadOutcome) -> bool {
    match outcome {
        Ok(summary) => {
            println!(
                "loaded {} ({:?}, {} item(s)){}",
                summary.name,
                summary.kind,
                summary.items.len(),
                summary
                    .meta
                    .description
                    .as_deref()
                    .map(|d| format!(": {}", d))
                    .unwrap_or_default()
            );
            true
        }
        Err(failure) => {
            println!("failed {}: {}", failure.name, failure);
            false
        }
    }
}
