use crate::error::CliError;
use clap::Parser;
use engine_config::loader;
use engine_runtime::{
    RunCoordinator, RunOptions,
    validator::Validator,
};
use model::state::artifacts::LogLevel;
use std::{path::PathBuf, process, str::FromStr};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

mod error;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "drover",
    version,
    about = "Streams rows out of a relational source, transforms them and loads SQL Server / Azure SQL"
)]
struct Cli {
    #[arg(long, help = "Master migration config file (XML)")]
    config: String,

    #[arg(long, help = "Optional global config file supplying defaults")]
    global_config: Option<String>,

    #[arg(long, help = "Validate the configuration and schemas without writing any data")]
    validate_only: bool,

    #[arg(long, help = "Continue the most recent run of this migration")]
    resume: bool,

    #[arg(long, help = "Restrict the run to tables whose inclusion flag is set")]
    table_filter: bool,

    #[arg(long, help = "Error, Warning, Info, Verbose or Debug")]
    log_level: Option<String>,

    #[arg(
        long,
        default_value = "./drover-output",
        help = "Directory receiving the progress, row-error and error-log artefacts"
    )]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let cancel = CancellationToken::new();
    shutdown::register_handlers(cancel.clone());

    let exit_code = match run(cli, cancel).await {
        Ok(()) => 0,
        Err(CliError::ShutdownRequested) => {
            info!("Run stopped gracefully; re-invoke with --resume to continue");
            130
        }
        Err(err) => {
            tracing::error!("{err}");
            1
        }
    };
    process::exit(exit_code);
}

fn init_logging(cli: &Cli) {
    // Flag wins over the global config's default; Info otherwise.
    let configured = cli
        .log_level
        .as_deref()
        .map(str::to_string)
        .or_else(|| {
            cli.global_config.as_deref().and_then(|path| {
                loader::load_global(std::path::Path::new(path))
                    .map(|global| global.default_log_level)
                    .ok()
            })
        })
        .unwrap_or_else(|| "Info".to_string());

    let level = match LogLevel::from_str(&configured) {
        Ok(LogLevel::Error) => Level::ERROR,
        Ok(LogLevel::Warning) => Level::WARN,
        Ok(LogLevel::Info) => Level::INFO,
        Ok(LogLevel::Verbose) => Level::DEBUG,
        Ok(LogLevel::Debug) => Level::TRACE,
        Err(_) => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), CliError> {
    let loaded = match loader::load_plan(std::path::Path::new(&cli.config)) {
        Ok(loaded) => loaded,
        // A structurally broken config still produces a validation
        // artefact when validating; otherwise it aborts before any
        // database work.
        Err(engine_config::ConfigError::Structural { migration, errors })
            if cli.validate_only =>
        {
            let report = engine_runtime::validator::write_config_failure_report(
                &migration,
                errors,
                &cli.output_dir,
            )?;
            println!(
                "Validation FAILED: configuration has {} error(s)",
                report.configuration.errors.len()
            );
            return Err(CliError::ValidationInvalid);
        }
        Err(err) => return Err(err.into()),
    };
    for warning in &loaded.warnings {
        warn!("{warning}");
    }

    if cli.validate_only {
        let validator = Validator::new(loaded.plan, loaded.warnings);
        let report = validator.run(&cli.output_dir).await?;
        println!(
            "Validation {}: {} table(s), {} error(s), {} warning(s)",
            if report.is_valid { "passed" } else { "FAILED" },
            report.summary.tables_validated,
            report.summary.errors_found,
            report.summary.warnings_found
        );
        if !report.is_valid {
            return Err(CliError::ValidationInvalid);
        }
        return Ok(());
    }

    let coordinator = RunCoordinator::new(
        loaded.plan,
        RunOptions {
            resume: cli.resume,
            table_filter: cli.table_filter,
            output_dir: cli.output_dir.clone(),
        },
    );
    coordinator.run(cancel).await?;
    info!("Migration completed successfully");
    Ok(())
}
