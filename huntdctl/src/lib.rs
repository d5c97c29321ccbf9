use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use huntd_core::{
    load_bot_config, run_interest_task, run_job_task, run_tasks, BotConfig, BrowserError,
    BrowserLauncher, Credentials, Diagnostics, ProfileUpdater,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] huntd_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "huntd job-portal automation bot", long_about = None)]
pub struct Cli {
    /// Path to the run configuration
    #[arg(long, default_value = "configs/bot.toml")]
    pub config: PathBuf,
    /// Output format for task summaries
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the enabled tasks once (headline rotation, then applications)
    Run,
    /// Rotate the profile headline and re-upload the resume
    Headline,
    /// Search and apply to jobs until the quota is met
    Jobs,
    /// Share interest in recommended early-access roles
    Interest {
        /// Override the configured limit
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Validate and print the effective configuration
    Config,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = Arc::new(load_bot_config(&cli.config)?);
    let diagnostics = Arc::new(Diagnostics::new(
        &config.diagnostics.images_dir,
        &config.diagnostics.logs_dir,
    )?);
    init_logging(diagnostics.logs_dir());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli, config, diagnostics))
}

async fn dispatch(cli: Cli, config: Arc<BotConfig>, diagnostics: Arc<Diagnostics>) -> Result<()> {
    match cli.command {
        Commands::Run => {
            let summary = run_tasks(Arc::clone(&config), diagnostics).await?;
            emit(cli.format, &summary, |summary| {
                let mut lines = Vec::new();
                match &summary.headline {
                    Some(report) => lines.push(format!(
                        "headline: rotated={} resume_uploaded={}",
                        report.headline_rotated, report.resume_uploaded
                    )),
                    None => lines.push("headline: skipped".to_string()),
                }
                match &summary.jobs {
                    Some(stats) => lines.push(format!(
                        "jobs: applied {}/{} over {} search attempt(s)",
                        stats.applied, stats.target, stats.search_attempts
                    )),
                    None => lines.push("jobs: skipped".to_string()),
                }
                lines.join("\n")
            })
        }
        Commands::Headline => {
            diagnostics.clear_images();
            let launcher = BrowserLauncher::new(Arc::clone(&config));
            let credentials = Credentials::from_env();
            if credentials.is_none() {
                return Err(AppError::Browser(BrowserError::MissingCredentials));
            }
            let updater =
                ProfileUpdater::new(Arc::clone(&config), Arc::clone(&diagnostics), credentials);
            let report = updater.run(&launcher).await?;
            emit(cli.format, &report, |report| {
                format!(
                    "rotated={} verified={:?} resume_uploaded={} resume_confirmed={}",
                    report.headline_rotated,
                    report.headline_verified,
                    report.resume_uploaded,
                    report.resume_confirmed
                )
            })
        }
        Commands::Jobs => {
            diagnostics.clear_images();
            let launcher = BrowserLauncher::new(Arc::clone(&config));
            let credentials = Credentials::from_env();
            if credentials.is_none() {
                return Err(AppError::Browser(BrowserError::MissingCredentials));
            }
            let stats = run_job_task(&launcher, &config, &diagnostics, credentials).await?;
            emit(cli.format, &stats, |stats| {
                format!(
                    "applied {}/{} ({} processed, {} search attempts, {} unconfirmed)",
                    stats.applied,
                    stats.target,
                    stats.processed,
                    stats.search_attempts,
                    stats.unconfirmed
                )
            })
        }
        Commands::Interest { limit } => {
            let launcher = BrowserLauncher::new(Arc::clone(&config));
            let limit = limit.unwrap_or(config.search.early_access_limit);
            let shared = run_interest_task(&launcher, &config, &diagnostics, limit).await?;
            emit(cli.format, &shared, |shared| {
                format!("shared interest in {shared} role(s)")
            })
        }
        Commands::Config => emit(cli.format, &*config, |config| {
            format!(
                "tasks: rotate_headline={} apply_jobs={} interval_hours={}\n\
                 search: {} title(s), {} location(s), target {}\n\
                 diagnostics: images={} logs={}",
                config.tasks.rotate_headline,
                config.tasks.apply_jobs,
                config.tasks.interval_hours,
                config.search.job_titles.len(),
                config.search.locations.len(),
                config.search.max_applications,
                config.diagnostics.images_dir,
                config.diagnostics.logs_dir,
            )
        }),
    }
}

fn emit<T: serde::Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", text(value)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Idempotent logging setup: console plus a timestamped per-run log file.
fn init_logging(logs_dir: &Path) {
    if LOG_GUARD.get().is_some() {
        return;
    }
    let filename = format!(
        "huntd_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let appender = tracing_appender::rolling::never(logs_dir, &filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        );
    if registry.try_init().is_ok() {
        let _ = LOG_GUARD.set(guard);
        info!(file = %filename, "logging configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn interest_limit_parses() {
        let cli = Cli::parse_from(["huntdctl", "interest", "--limit", "4"]);
        match cli.command {
            Commands::Interest { limit } => assert_eq!(limit, Some(4)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
