use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Env;

mod sync;

#[derive(Parser)]
#[command(name = "csynth")]
#[command(about = "Synchronize programmatic circuit descriptions with CAD project files", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true, hide = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a circuit netlist into a schematic project
    #[command(alias = "s")]
    Sync(sync::SyncArgs),
}

/// Exit code when the project path does not resolve to a valid project.
const EXIT_INVALID_PROJECT: i32 = 2;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e}", "Error:".red());
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
        let code = if is_invalid_project(&e) {
            EXIT_INVALID_PROJECT
        } else {
            1
        };
        std::process::exit(code);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env = if cli.debug {
        Env::default().default_filter_or("debug")
    } else {
        Env::default().default_filter_or("error")
    };
    env_logger::Builder::from_env(env).init();

    match cli.command {
        Commands::Sync(args) => sync::execute(args),
    }
}

fn is_invalid_project(error: &anyhow::Error) -> bool {
    use csynth_kicad::ProjectError;
    use csynth_sync::SyncError;

    let project_error = error.chain().find_map(|cause| {
        if let Some(SyncError::Project(inner)) = cause.downcast_ref::<SyncError>() {
            return Some(inner);
        }
        cause.downcast_ref::<ProjectError>()
    });
    matches!(
        project_error,
        Some(
            ProjectError::NotFound(_)
                | ProjectError::NotAProject(_)
                | ProjectError::Parse { .. }
        )
    )
}
