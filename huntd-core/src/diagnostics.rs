use std::fs;
use std::path::{Path, PathBuf};

use chromiumoxide::page::{Page, ScreenshotParams};
use chrono::Local;
use tracing::{info, warn};

/// Status label embedded in screenshot filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotStatus {
    Success,
    Failure,
    Warning,
    Info,
}

impl ShotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ShotStatus::Success => "success",
            ShotStatus::Failure => "failure",
            ShotStatus::Warning => "warning",
            ShotStatus::Info => "info",
        }
    }
}

/// Screenshot and log artifact sink, constructed once per process and
/// passed to every component. Screenshots are cleared at the start of each
/// run; log files accumulate.
#[derive(Debug)]
pub struct Diagnostics {
    images_dir: PathBuf,
    logs_dir: PathBuf,
}

impl Diagnostics {
    pub fn new(
        images_dir: impl AsRef<Path>,
        logs_dir: impl AsRef<Path>,
    ) -> std::io::Result<Self> {
        let images_dir = images_dir.as_ref().to_path_buf();
        let logs_dir = logs_dir.as_ref().to_path_buf();
        fs::create_dir_all(&images_dir)?;
        fs::create_dir_all(&logs_dir)?;
        Ok(Self {
            images_dir,
            logs_dir,
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Removes leftover screenshots from the previous run.
    pub fn clear_images(&self) {
        let entries = match fs::read_dir(&self.images_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to list debug images directory");
                return;
            }
        };
        info!("clearing debug images");
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Err(err) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %err, "failed to remove debug image");
                }
            }
        }
    }

    /// Captures a timestamped screenshot tagged with a status label.
    ///
    /// Guarded: every internal failure is logged and swallowed so that
    /// capturing diagnostics can never take down the flow being diagnosed.
    pub async fn capture(&self, page: &Page, slug: &str, status: ShotStatus) -> Option<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}_{}_{}.png", status.label(), slugify(slug), timestamp);
        let path = self.images_dir.join(&filename);

        let params = ScreenshotParams::builder().build();
        let bytes = match page.screenshot(params).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(slug, error = %err, "failed to capture screenshot");
                return None;
            }
        };
        if let Err(err) = tokio::fs::write(&path, bytes).await {
            warn!(path = %path.display(), error = %err, "failed to write screenshot");
            return None;
        }
        info!(file = %filename, "screenshot saved");
        Some(path)
    }
}

/// Filename-safe slug, truncated so company names and job titles cannot
/// blow past filesystem limits.
pub fn slugify(input: &str) -> String {
    let mut slug: String = input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    slug.truncate(40);
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn slugify_replaces_and_truncates() {
        assert_eq!(slugify("Acme Corp (India)"), "Acme_Corp__India_");
        let long = "x".repeat(80);
        assert_eq!(slugify(&long).len(), 40);
    }

    #[test]
    fn clear_images_removes_only_files() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let logs = dir.path().join("logs");
        let diagnostics = Diagnostics::new(&images, &logs).unwrap();
        std::fs::write(images.join("failure_old_20240101_000000.png"), b"png").unwrap();
        std::fs::create_dir(images.join("keep")).unwrap();

        diagnostics.clear_images();

        let remaining: Vec<_> = std::fs::read_dir(&images)
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(remaining, vec![std::ffi::OsString::from("keep")]);
    }
}
