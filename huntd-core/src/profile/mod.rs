mod headline;
mod resume;

pub use headline::{
    apply_headline, canonical_current, load_pool, read_current_headline, select_rotation,
    verify_headline, HeadlineApplied, HeadlineCandidate, VerifyMethod,
};
pub use resume::{find_resume_file, upload_resume, ResumeUploaded};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::auth::Authenticator;
use crate::browser::{BrowserAutomation, BrowserLauncher, BrowserResult};
use crate::config::{BotConfig, Credentials};
use crate::diagnostics::{Diagnostics, ShotStatus};

/// Outcome summary of one profile-update task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileReport {
    pub headline_rotated: bool,
    pub headline_verified: Option<VerifyMethod>,
    pub resume_uploaded: bool,
    pub resume_confirmed: bool,
    pub resume_file: Option<String>,
}

/// Rotates the profile headline from the candidate pool and re-uploads the
/// local resume, in its own browser session.
pub struct ProfileUpdater {
    config: Arc<BotConfig>,
    diagnostics: Arc<Diagnostics>,
    credentials: Option<Credentials>,
}

impl ProfileUpdater {
    pub fn new(
        config: Arc<BotConfig>,
        diagnostics: Arc<Diagnostics>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            config,
            diagnostics,
            credentials,
        }
    }

    pub async fn run(&self, launcher: &BrowserLauncher) -> BrowserResult<ProfileReport> {
        let automation = launcher.launch().await?;
        let result = self.run_inner(&automation).await;
        if let Err(err) = automation.shutdown().await {
            warn!(error = %err, "session teardown failed");
        }
        info!("browser closed");
        result
    }

    async fn run_inner(&self, automation: &BrowserAutomation) -> BrowserResult<ProfileReport> {
        let context = automation.new_context().await?;
        let authenticator = Authenticator::new(
            self.credentials.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.diagnostics),
        );
        authenticator.login(&context).await?;
        info!("logged in successfully");
        info!("starting headline rotation");

        context.goto(&self.config.portal.profile_url).await?;
        info!("navigated to profile page");
        sleep(Duration::from_secs(self.config.timeouts.settle_secs)).await;

        let displayed = read_current_headline(&context).await;
        match &displayed {
            Some(current) => info!(current = %current, "current headline"),
            None => warn!("could not read current headline"),
        }

        let pool = match load_pool(&self.config.profile.headlines_path) {
            Ok(pool) => pool,
            Err(err) => {
                error!(error = %err, "failed to load headline pool");
                self.diagnostics
                    .capture(context.page(), "headline_pool_error", ShotStatus::Failure)
                    .await;
                return Err(err);
            }
        };

        let chosen = {
            let mut rng = rand::thread_rng();
            select_rotation(&pool, displayed.as_deref(), &mut rng)
                .map(|candidate| candidate.headline.clone())
        };

        let mut report = ProfileReport::default();
        match chosen {
            None => {
                info!("no different headline available, skipping update");
            }
            Some(headline) => {
                info!(headline = %headline, "selected new headline");
                match apply_headline(&context, &self.config, &self.diagnostics, &headline).await {
                    Ok(applied) if applied.accepted => {
                        info!("profile headline updated");
                        report.headline_rotated = true;
                        report.headline_verified = applied.verified;
                    }
                    Ok(_) => {
                        error!("failed to update headline");
                        self.diagnostics
                            .capture(context.page(), "profile_update_failed", ShotStatus::Failure)
                            .await;
                    }
                    Err(err) => {
                        // The resume upload still runs; only session-level
                        // failures abort the task.
                        if err.is_session_fatal() {
                            return Err(err);
                        }
                        error!(error = %err, "error during headline update");
                    }
                }
            }
        }

        match upload_resume(&context, &self.config, &self.diagnostics).await {
            Ok(uploaded) => {
                report.resume_uploaded = true;
                report.resume_confirmed = uploaded.confirmed;
                report.resume_file = uploaded
                    .file
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string());
            }
            Err(err) => {
                if err.is_session_fatal() {
                    return Err(err);
                }
                error!(error = %err, "resume upload failed");
            }
        }

        Ok(report)
    }
}
