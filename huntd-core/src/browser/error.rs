use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("portal credentials missing or empty")]
    MissingCredentials,
    #[error("login failed after {attempts} attempts")]
    LoginFailed { attempts: usize },
    #[error("element not found: {chain} exhausted all lookup strategies")]
    ElementNotFound { chain: String },
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("stale reference: {0}")]
    Stale(String),
    #[error("no resume file found in {0}")]
    NoResumeFound(String),
    #[error("headline pool error: {0}")]
    HeadlinePool(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl BrowserError {
    /// Session-level failures abort the current top-level task; everything
    /// else is handled at the narrowest scope as a skip/continue decision.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            BrowserError::Launch(_)
                | BrowserError::MissingCredentials
                | BrowserError::LoginFailed { .. }
        )
    }
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}
