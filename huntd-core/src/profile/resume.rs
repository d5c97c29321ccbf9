use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::browser::{
    force_visible, wait_for_selector, wait_for_text, wait_until_gone, BrowserContext, BrowserError,
    BrowserResult, Locator, Strategy, LOADING_INDICATORS,
};
use crate::config::BotConfig;
use crate::diagnostics::{Diagnostics, ShotStatus};

const RESUME_EXTENSION: &str = "pdf";
const INDICATOR_WAIT: Duration = Duration::from_secs(5);
const SPINNER_WAIT: Duration = Duration::from_secs(15);

/// Locates a resume in the configured directory.
///
/// Priority: the first configured keyword with any filename match wins;
/// otherwise the first PDF by sorted name.
pub fn find_resume_file(dir: impl AsRef<Path>, keywords: &[String]) -> Option<PathBuf> {
    let dir = dir.as_ref();
    let mut pdf_files: Vec<String> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(RESUME_EXTENSION))
                .unwrap_or(false)
        })
        .collect();
    pdf_files.sort();

    if pdf_files.is_empty() {
        info!(dir = %dir.display(), "no PDF files found");
        return None;
    }

    for keyword in keywords {
        let keyword = keyword.to_lowercase();
        if let Some(name) = pdf_files
            .iter()
            .find(|name| name.to_lowercase().contains(&keyword))
        {
            info!(file = %name, "found resume file");
            return Some(dir.join(name));
        }
    }

    info!(file = %pdf_files[0], "using first PDF file");
    Some(dir.join(&pdf_files[0]))
}

const FILE_INPUT: Locator = Locator::new(
    "resume-file-input",
    &[
        Strategy::Css("input#attachCV"),
        Strategy::Css("input[type='file'].fileUpload"),
        // Walk up from the visible "Update resume" control to the hidden
        // input inside the same section.
        Strategy::Script(
            r#"(() => {
    document.querySelectorAll('[data-huntd-hit]').forEach(node => node.removeAttribute('data-huntd-hit'));
    const trigger = document.querySelector("input[value='Update resume']");
    if (!trigger) return false;
    const section = trigger.closest('section');
    if (!section) return false;
    const input = section.querySelector("input[type='file']");
    if (!input) return false;
    input.setAttribute('data-huntd-hit', '__MARKER__');
    return true;
})()"#,
        ),
    ],
);

#[derive(Debug, Clone)]
pub struct ResumeUploaded {
    pub file: PathBuf,
    pub confirmed: bool,
}

/// Re-uploads the local resume through the profile's hidden file input.
///
/// Inability to positively confirm the upload is a soft success: it is
/// logged and reported, never retried, since no error was raised.
pub async fn upload_resume(
    context: &BrowserContext,
    config: &BotConfig,
    diagnostics: &Diagnostics,
) -> BrowserResult<ResumeUploaded> {
    info!("starting resume upload process");

    let url = context.current_url().await.unwrap_or_default();
    if !url.starts_with(&config.portal.profile_url) {
        info!("navigating to profile page for resume upload");
        context.goto(&config.portal.profile_url).await?;
        sleep(Duration::from_secs(config.timeouts.settle_secs)).await;
    }

    let input = match FILE_INPUT.try_find(context.page()).await {
        Some(found) => {
            info!("found resume upload section");
            found
        }
        None => {
            diagnostics
                .capture(
                    context.page(),
                    "resume_section_not_found",
                    ShotStatus::Failure,
                )
                .await;
            return Err(BrowserError::ElementNotFound {
                chain: "resume-file-input".into(),
            });
        }
    };

    let resume = match find_resume_file(&config.profile.resume_dir, &config.profile.resume_keywords)
    {
        Some(path) => path,
        None => {
            diagnostics
                .capture(context.page(), "resume_file_not_found", ShotStatus::Failure)
                .await;
            return Err(BrowserError::NoResumeFound(
                config.profile.resume_dir.clone(),
            ));
        }
    };
    // The file must exist and be readable before the path is handed to the
    // browser; the input silently ignores bad paths.
    std::fs::File::open(&resume)?;
    let filename = resume
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    info!(file = %filename, "resume file to upload");

    force_visible(&input.element).await?;
    let params = SetFileInputFilesParams::builder()
        .file(resume.display().to_string())
        .object_id(input.element.remote_object_id.clone())
        .build()
        .map_err(BrowserError::Configuration)?;
    context.page().execute(params).await?;
    info!(file = %filename, "uploading resume file");

    sleep(Duration::from_secs(config.timeouts.upload_wait_secs)).await;

    let confirmed = confirm_upload(context).await;
    if confirmed {
        info!(file = %filename, "resume uploaded successfully");
    } else {
        wait_until_gone(context.page(), LOADING_INDICATORS, SPINNER_WAIT).await;
        warn!(file = %filename, "upload completed without positive confirmation");
    }

    Ok(ResumeUploaded {
        file: resume,
        confirmed,
    })
}

async fn confirm_upload(context: &BrowserContext) -> bool {
    for phrase in ["uploaded successfully", "Resume updated"] {
        if wait_for_text(context.page(), phrase, INDICATOR_WAIT).await {
            return true;
        }
    }
    wait_for_selector(context.page(), "div.updateOn", INDICATOR_WAIT)
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"stub").unwrap();
    }

    fn keywords() -> Vec<String> {
        vec![
            "resume".into(),
            "cv".into(),
            "curriculum".into(),
            "vitae".into(),
        ]
    }

    #[test]
    fn keyword_match_beats_first_pdf() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "notes.pdf");
        touch(dir.path(), "John_Resume.pdf");
        touch(dir.path(), "cover.docx");

        let found = find_resume_file(dir.path(), &keywords()).unwrap();
        assert_eq!(found.file_name().unwrap(), "John_Resume.pdf");
    }

    #[test]
    fn falls_back_to_first_pdf_by_name() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "zeta.pdf");
        touch(dir.path(), "alpha.pdf");

        let found = find_resume_file(dir.path(), &keywords()).unwrap();
        assert_eq!(found.file_name().unwrap(), "alpha.pdf");
    }

    #[test]
    fn keyword_priority_is_ordered() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "my_cv.pdf");
        touch(dir.path(), "old_resume.pdf");

        // "resume" is tried before "cv", so it wins even though both match.
        let found = find_resume_file(dir.path(), &keywords()).unwrap();
        assert_eq!(found.file_name().unwrap(), "old_resume.pdf");
    }

    #[test]
    fn no_pdfs_yields_none() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "cover.docx");
        assert!(find_resume_file(dir.path(), &keywords()).is_none());
    }
}
