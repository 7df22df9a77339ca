use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use optobot::config::ExperimentConfig;
use optobot::store::manifest::ExperimentManifest;
use optobot::store::MANIFEST_FILE;
use optobot::{OptResult, OptobotError};
use std::process;
use tracing::Level;

mod cmd;
mod reports;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON experiment config. Flags given on the command line override it.
    #[arg(global = true, long)]
    config: Option<String>,

    #[arg(global = true, long, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print which wells and table rows each iteration uses.
    Plan(cmd::plan::PlanArgs),
    /// Run (or resume) an optimisation experiment.
    Run(cmd::run::RunArgs),
}

fn main() {
    // 1. Parse Raw Matches (to distinguish user input from defaults)
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    println!("\n🚀 Initializing OptoBot...");

    // 2. Resolve the experiment config: file or manifest first, then CLI overrides
    let config = match &cli.command {
        Commands::Plan(args) => resolve_config(
            cli.config.as_deref(),
            None,
            &args.config,
            matches.subcommand_matches("plan"),
        ),
        Commands::Run(args) => resolve_config(
            cli.config.as_deref(),
            args.resume.as_deref(),
            &args.config,
            matches.subcommand_matches("run"),
        ),
    }
    .unwrap_or_else(|e| {
        eprintln!("\n❌ FATAL ERROR LOADING CONFIG:");
        eprintln!("   {}", e);
        process::exit(1);
    });

    // 3. Execute
    let result = match &cli.command {
        Commands::Plan(args) => cmd::plan::run(args, &config),
        Commands::Run(args) => cmd::run::run(args, config),
    };

    if let Err(e) = result {
        eprintln!("\n❌ {}", e);
        if e.is_retryable() {
            eprintln!("   Nothing was recorded for the failed iteration; resume to retry it.");
        } else if let OptobotError::PartialDispense { .. } = e {
            eprintln!("   The interrupted iteration's wells were marked unusable; resume to continue on fresh wells.");
        }
        process::exit(1);
    }
}

fn resolve_config(
    config_path: Option<&str>,
    resume_dir: Option<&std::path::Path>,
    cli_config: &ExperimentConfig,
    sub_matches: Option<&ArgMatches>,
) -> OptResult<ExperimentConfig> {
    let base = if let Some(dir) = resume_dir {
        println!("📂 Resuming from: {}", dir.display());
        Some(ExperimentManifest::load(dir.join(MANIFEST_FILE))?.config)
    } else if let Some(path) = config_path {
        println!("⚙️  Loading Config from: {}", path);
        Some(ExperimentConfig::load_from_file(path)?)
    } else {
        None
    };

    Ok(match (base, sub_matches) {
        (Some(mut config), Some(m)) => {
            config.merge_from_cli(cli_config, m);
            config
        }
        (Some(config), None) => config,
        (None, _) => cli_config.clone(),
    })
}
