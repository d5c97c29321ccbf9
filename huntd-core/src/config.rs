use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const USERNAME_ENV: &str = "HUNTD_USERNAME";
pub const PASSWORD_ENV: &str = "HUNTD_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BotConfig {
    pub tasks: TasksSection,
    pub portal: PortalSection,
    pub search: SearchSection,
    pub profile: ProfileSection,
    pub chromium: ChromiumSection,
    pub timeouts: TimeoutSection,
    pub diagnostics: DiagnosticsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksSection {
    pub rotate_headline: bool,
    pub apply_jobs: bool,
    /// 0 means single-shot; an external scheduler drives repeated runs.
    pub interval_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSection {
    pub login_url: String,
    pub profile_url: String,
    pub profile_edit_url: String,
    pub search_fallback_url: String,
    pub recommended_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    pub job_titles: Vec<String>,
    pub locations: Vec<String>,
    pub experience_years: u32,
    pub max_applications: usize,
    pub early_access_roles: bool,
    pub early_access_limit: usize,
    pub pace_ms: [u64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSection {
    pub headlines_path: String,
    pub resume_dir: String,
    pub resume_keywords: Vec<String>,
    /// Whether a submitted-but-unverified headline or resume update counts
    /// as success. The original behavior is `true`.
    pub assume_unverified_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
    pub page_load_secs: u64,
    pub element_secs: u64,
    pub settle_secs: u64,
    pub save_wait_secs: u64,
    pub upload_wait_secs: u64,
    pub confirm_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSection {
    pub images_dir: String,
    pub logs_dir: String,
}

/// Account credentials, read from the execution environment only.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(USERNAME_ENV).unwrap_or_default();
        let secret = std::env::var(PASSWORD_ENV).unwrap_or_default();
        if username.trim().is_empty() || secret.trim().is_empty() {
            None
        } else {
            Some(Self { username, secret })
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub fn load_bot_config<P: AsRef<Path>>(path: P) -> Result<BotConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/bot.toml");
        let config = load_bot_config(path).expect("fixture config should parse");
        assert!(config.search.max_applications >= 1);
        assert!(!config.search.job_titles.is_empty());
        assert!(config.portal.login_url.starts_with("https://"));
        assert!(config.search.pace_ms[0] <= config.search.pace_ms[1]);
    }

    #[test]
    fn missing_config_reports_path() {
        let err = load_bot_config("does/not/exist.toml").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
    }
}
