use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::browser::{BrowserError, BrowserLauncher, BrowserResult};
use crate::config::{BotConfig, Credentials};
use crate::diagnostics::Diagnostics;
use crate::jobs::{ApplicationLoop, PortalSession, RunStats};
use crate::profile::{ProfileReport, ProfileUpdater};

/// Outcome of one top-level invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub headline: Option<ProfileReport>,
    pub jobs: Option<RunStats>,
}

/// Runs the enabled tasks once: headline rotation first, then job
/// applications, each in its own browser session. A failed task yields a
/// partial summary; only missing credentials abort the whole run.
pub async fn run_tasks(
    config: Arc<BotConfig>,
    diagnostics: Arc<Diagnostics>,
) -> BrowserResult<RunSummary> {
    diagnostics.clear_images();
    let started = Local::now();
    info!(start = %started.format("%Y-%m-%d %H:%M:%S"), "starting scheduled tasks");

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        error!("portal credentials not found in environment");
        return Err(BrowserError::MissingCredentials);
    }

    let launcher = BrowserLauncher::new(Arc::clone(&config));
    let mut summary = RunSummary::default();

    if config.tasks.rotate_headline {
        info!("running headline rotation task");
        let updater = ProfileUpdater::new(
            Arc::clone(&config),
            Arc::clone(&diagnostics),
            credentials.clone(),
        );
        match updater.run(&launcher).await {
            Ok(report) => {
                info!("headline rotation task completed");
                summary.headline = Some(report);
            }
            Err(err) => error!(error = %err, "headline rotation task failed"),
        }
    } else {
        info!("headline rotation is disabled in settings");
    }

    if config.tasks.apply_jobs {
        info!("running job application task");
        match run_job_task(&launcher, &config, &diagnostics, credentials.clone()).await {
            Ok(stats) => {
                info!(applied = stats.applied, "job application task completed");
                summary.jobs = Some(stats);
            }
            Err(err) => error!(error = %err, "job application task failed"),
        }
    } else {
        info!("job application is disabled in settings");
    }

    let elapsed = Local::now().signed_duration_since(started);
    info!(
        minutes = format!("{:.1}", elapsed.num_seconds() as f64 / 60.0),
        "all tasks completed"
    );
    if config.tasks.interval_hours > 0 {
        let next = Local::now() + ChronoDuration::hours(config.tasks.interval_hours as i64);
        info!(next_run = %next.format("%Y-%m-%d %H:%M:%S"), "next scheduled run");
    } else {
        info!("no schedule set, running in single execution mode");
    }

    Ok(summary)
}

/// One application run in its own session: login, search, apply.
pub async fn run_job_task(
    launcher: &BrowserLauncher,
    config: &Arc<BotConfig>,
    diagnostics: &Arc<Diagnostics>,
    credentials: Option<Credentials>,
) -> BrowserResult<RunStats> {
    let automation = Arc::new(launcher.launch().await?);

    let result = async {
        let context = automation.new_context().await?;
        let authenticator = crate::auth::Authenticator::new(
            credentials,
            Arc::clone(config),
            Arc::clone(diagnostics),
        );
        authenticator.login(&context).await?;
        info!("logged in successfully");
        context.close().await;

        let portal = PortalSession::open(
            Arc::clone(&automation),
            Arc::clone(config),
            Arc::clone(diagnostics),
        )
        .await?;
        let mut run = ApplicationLoop::new(Box::new(portal), config.search.clone());
        run.run().await
    }
    .await;

    match Arc::try_unwrap(automation) {
        Ok(automation) => {
            if let Err(err) = automation.shutdown().await {
                warn!(error = %err, "session teardown failed");
            }
        }
        Err(_) => warn!("browser session still referenced at teardown"),
    }
    info!("browser closed");
    result
}

/// Standalone entry point for the interest-sharing auxiliary.
pub async fn run_interest_task(
    launcher: &BrowserLauncher,
    config: &Arc<BotConfig>,
    diagnostics: &Arc<Diagnostics>,
    limit: usize,
) -> BrowserResult<usize> {
    let credentials = Credentials::from_env();
    if credentials.is_none() {
        error!("portal credentials not found in environment");
        return Err(BrowserError::MissingCredentials);
    }

    let automation = launcher.launch().await?;
    let result = async {
        let context = automation.new_context().await?;
        let authenticator = crate::auth::Authenticator::new(
            credentials,
            Arc::clone(config),
            Arc::clone(diagnostics),
        );
        authenticator.login(&context).await?;
        info!("logged in successfully");

        let mut feed =
            crate::interest::PortalFeed::new(&context, Arc::clone(config), Arc::clone(diagnostics));
        Ok(crate::interest::share_interest(&mut feed, limit).await)
    }
    .await;

    if let Err(err) = automation.shutdown().await {
        warn!(error = %err, "session teardown failed");
    }
    info!("browser closed");
    result
}
