use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser::{
    clear_and_type, BrowserContext, BrowserError, BrowserResult, Locator, Strategy,
};
use crate::config::{BotConfig, Credentials};
use crate::diagnostics::{Diagnostics, ShotStatus};

const MAX_LOGIN_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

const USERNAME_FIELD: Locator = Locator::new(
    "login-username",
    &[
        Strategy::Css("input#usernameField"),
        Strategy::Css("form input[type='text'], form input[type='email']"),
    ],
);

const SECRET_FIELD: Locator = Locator::new(
    "login-secret",
    &[
        Strategy::Css("input#passwordField"),
        Strategy::Css("form input[type='password']"),
    ],
);

const SUBMIT_CONTROL: Locator = Locator::new(
    "login-submit",
    &[Strategy::Css("button[type='submit']")],
);

const INLINE_ERROR: &str = ".erLbl";

/// Logs in with credentials from the execution environment, retrying on
/// failure and short-circuiting when already authenticated.
pub struct Authenticator {
    credentials: Option<Credentials>,
    config: Arc<BotConfig>,
    diagnostics: Arc<Diagnostics>,
}

impl Authenticator {
    pub fn new(
        credentials: Option<Credentials>,
        config: Arc<BotConfig>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            credentials,
            config,
            diagnostics,
        }
    }

    pub async fn login(&self, context: &BrowserContext) -> BrowserResult<()> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(BrowserError::MissingCredentials)?;

        info!("navigating to login page");
        context.goto(&self.config.portal.login_url).await?;

        if !self.wait_for_login_surface(context).await {
            error!("login page did not load in time");
            self.diagnostics
                .capture(context.page(), "login_page_load_error", ShotStatus::Failure)
                .await;
            return Err(BrowserError::Timeout("login page load".into()));
        }

        for attempt in 1..=MAX_LOGIN_ATTEMPTS {
            info!(attempt, max = MAX_LOGIN_ATTEMPTS, "login attempt");
            match self.attempt_login(context, credentials, attempt).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => {
                    warn!(attempt, error = %err, "exception during login attempt");
                    self.diagnostics
                        .capture(
                            context.page(),
                            &format!("login_error_attempt{attempt}"),
                            ShotStatus::Failure,
                        )
                        .await;
                }
            }
            sleep(RETRY_DELAY).await;
        }

        error!("failed to login after multiple attempts");
        self.diagnostics
            .capture(context.page(), "login_failed_final", ShotStatus::Failure)
            .await;
        Err(BrowserError::LoginFailed {
            attempts: MAX_LOGIN_ATTEMPTS,
        })
    }

    async fn attempt_login(
        &self,
        context: &BrowserContext,
        credentials: &Credentials,
        attempt: usize,
    ) -> BrowserResult<bool> {
        let url = context.current_url().await?;
        if is_authenticated_url(&url) {
            info!("already logged in");
            return Ok(true);
        }

        let username = USERNAME_FIELD.find(context.page()).await?;
        clear_and_type(&username.element, &credentials.username).await?;
        debug!("username entered");

        let secret = SECRET_FIELD.find(context.page()).await?;
        clear_and_type(&secret.element, &credentials.secret).await?;
        debug!("secret entered");

        let submit = SUBMIT_CONTROL.find(context.page()).await?;
        submit.element.click().await?;
        debug!("login form submitted");

        sleep(Duration::from_secs(self.config.timeouts.settle_secs)).await;

        let url = context.current_url().await?;
        if !references_login(&url) {
            info!("login successful");
            return Ok(true);
        }

        // Still on the login surface; surface any inline error for the log.
        if let Ok(element) = context.page().find_element(INLINE_ERROR).await {
            if let Ok(Some(text)) = element.inner_text().await {
                warn!(error = %text.trim(), "login error reported by page");
            }
        }
        self.diagnostics
            .capture(
                context.page(),
                &format!("login_error_attempt{attempt}"),
                ShotStatus::Failure,
            )
            .await;
        Ok(false)
    }

    async fn wait_for_login_surface(&self, context: &BrowserContext) -> bool {
        let timeout = Duration::from_secs(self.config.timeouts.page_load_secs);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(Some(title)) = context.page().get_title().await {
                if title.to_lowercase().contains("login") {
                    debug!(title = %title, "login page loaded");
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(500)).await;
        }
    }
}

/// URL heuristic for an already-authenticated session.
pub fn is_authenticated_url(url: &str) -> bool {
    let url = url.to_lowercase();
    url.contains("logout") || url.contains("mnjuser/profile")
}

/// Whether the current URL still references the login surface.
pub fn references_login(url: &str) -> bool {
    url.to_lowercase().contains("login")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_url_heuristics() {
        assert!(is_authenticated_url(
            "https://www.naukri.com/mnjuser/profile?id=1"
        ));
        assert!(is_authenticated_url("https://example.com/a?next=LOGOUT"));
        assert!(!is_authenticated_url("https://www.naukri.com/nlogin/login"));
    }

    #[test]
    fn login_url_classification() {
        assert!(references_login("https://www.naukri.com/nlogin/Login"));
        assert!(!references_login("https://www.naukri.com/jobs-in-india"));
    }
}
