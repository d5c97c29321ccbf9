use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::browser::{
    clear_and_type, input_value, resilient_click, BrowserContext, BrowserError, BrowserResult,
    Locator, Strategy,
};
use crate::config::BotConfig;
use crate::diagnostics::{Diagnostics, ShotStatus};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeadlineCandidate {
    pub headline: String,
}

pub fn load_pool(path: impl AsRef<Path>) -> BrowserResult<Vec<HeadlineCandidate>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|err| BrowserError::HeadlinePool(format!("{}: {err}", path.display())))?;
    let pool: Vec<HeadlineCandidate> = serde_json::from_str(&content)
        .map_err(|err| BrowserError::HeadlinePool(format!("{}: {err}", path.display())))?;
    if pool.is_empty() {
        return Err(BrowserError::HeadlinePool(format!(
            "{}: candidate pool is empty",
            path.display()
        )));
    }
    Ok(pool)
}

/// The pool entry currently live on the profile, if any. The displayed text
/// may carry surrounding content, so equality is "stored text contained
/// within displayed text".
pub fn canonical_current<'a>(pool: &'a [HeadlineCandidate], displayed: &str) -> Option<&'a str> {
    pool.iter()
        .find(|candidate| displayed.contains(candidate.headline.as_str()))
        .map(|candidate| candidate.headline.as_str())
}

/// Samples the next headline, excluding the one currently live whenever the
/// pool leaves an alternative. `None` means there is nothing to rotate to.
pub fn select_rotation<'a, R: Rng + ?Sized>(
    pool: &'a [HeadlineCandidate],
    displayed: Option<&str>,
    rng: &mut R,
) -> Option<&'a HeadlineCandidate> {
    if pool.is_empty() {
        return None;
    }
    if let Some(displayed) = displayed {
        if pool.len() > 1 {
            let different: Vec<&HeadlineCandidate> = pool
                .iter()
                .filter(|candidate| !displayed.contains(candidate.headline.as_str()))
                .collect();
            if let Some(choice) = different.choose(rng).copied() {
                return Some(choice);
            }
            // Every candidate matches what is displayed; fall through to
            // the full pool rather than giving up.
        } else if displayed.contains(pool[0].headline.as_str()) {
            return None;
        }
    }
    pool.choose(rng)
}

/// Verification tiers, strongest first. The cascade order is part of the
/// behavior: the target surface renders the headline inconsistently, so
/// each tier is a weaker fallback for the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerifyMethod {
    Displayed,
    Exact,
    Prefix,
    Keywords,
}

const PREFIX_CHARS: usize = 50;
const KEYWORD_MIN_LEN: usize = 5;
const KEYWORD_MIN_MATCHES: usize = 2;

pub fn verify_headline(
    page_text: &str,
    displayed: Option<&str>,
    target: &str,
) -> Option<VerifyMethod> {
    if let Some(displayed) = displayed {
        if displayed.contains(target) {
            return Some(VerifyMethod::Displayed);
        }
    }
    if page_text.contains(target) {
        return Some(VerifyMethod::Exact);
    }
    let prefix: String = target.chars().take(PREFIX_CHARS).collect();
    if !prefix.is_empty() && page_text.contains(&prefix) {
        return Some(VerifyMethod::Prefix);
    }
    let keywords: Vec<&str> = target
        .split_whitespace()
        .filter(|word| word.len() > KEYWORD_MIN_LEN)
        .collect();
    if keywords.len() >= KEYWORD_MIN_MATCHES {
        let mut matched = std::collections::HashSet::new();
        for word in &keywords {
            if page_text.contains(word) {
                matched.insert(*word);
            }
        }
        if matched.len() >= KEYWORD_MIN_MATCHES {
            return Some(VerifyMethod::Keywords);
        }
    }
    None
}

const CURRENT_HEADLINE_SCRIPT: &str = r#"
(() => {
    const nodes = document.querySelectorAll(
        '.resumeHeadline span, .resumeHeadline p, .resumeHeadline div, .resumeHeadline, .headline'
    );
    for (const node of nodes) {
        const text = (node.textContent || '').trim();
        if (text && text.length > 5) {
            return text;
        }
    }
    return null;
})()
"#;

/// Best-effort read of the headline currently rendered on the profile.
pub async fn read_current_headline(context: &BrowserContext) -> Option<String> {
    let value = context
        .page()
        .evaluate(CURRENT_HEADLINE_SCRIPT)
        .await
        .ok()?
        .into_value::<Option<String>>()
        .ok()??;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

const EDIT_AFFORDANCE: Locator = Locator::new(
    "headline-edit",
    &[
        Strategy::Css(".widgetHead .edit.icon"),
        Strategy::Css("span.edit.icon"),
        Strategy::Css(".edit"),
    ],
);

const EDIT_FALLBACK: Locator = Locator::new(
    "headline-edit-fallback",
    &[Strategy::Text {
        tags: &["button"],
        contains: &["Edit Resume Headline"],
        excludes: &[],
    }],
);

const HEADLINE_FIELD: Locator = Locator::new(
    "headline-field",
    &[
        Strategy::Css("#resumeHeadlineTxt"),
        Strategy::Css("form textarea"),
    ],
);

const SAVE_CONTROL: Locator = Locator::new(
    "headline-save",
    &[
        Strategy::Css("button.btn-dark-ot[type='submit']"),
        Strategy::Css(".btn-dark-ot"),
        Strategy::Text {
            tags: &["button"],
            contains: &["Save"],
            excludes: &[],
        },
    ],
);

#[derive(Debug, Clone)]
pub struct HeadlineApplied {
    pub clicked: bool,
    pub verified: Option<VerifyMethod>,
    pub accepted: bool,
}

/// Drives the edit form for the chosen headline and verifies the result
/// through the lenience cascade.
pub async fn apply_headline(
    context: &BrowserContext,
    config: &BotConfig,
    diagnostics: &Diagnostics,
    target: &str,
) -> BrowserResult<HeadlineApplied> {
    info!("updating resume headline");
    let settle = std::time::Duration::from_secs(config.timeouts.settle_secs);

    let edit = match EDIT_AFFORDANCE.try_find(context.page()).await {
        Some(found) => found,
        None => {
            info!("trying direct navigation to edit page");
            context.goto(&config.portal.profile_edit_url).await?;
            sleep(settle).await;
            match EDIT_FALLBACK.try_find(context.page()).await {
                Some(found) => found,
                None => {
                    diagnostics
                        .capture(
                            context.page(),
                            "headline_edit_button_not_found",
                            ShotStatus::Failure,
                        )
                        .await;
                    return Err(BrowserError::ElementNotFound {
                        chain: "headline-edit".into(),
                    });
                }
            }
        }
    };
    info!("clicking headline edit control");
    edit.element
        .call_js_fn("function() { this.click(); }", false)
        .await?;
    sleep(std::time::Duration::from_secs(3)).await;

    let field = match HEADLINE_FIELD.try_find(context.page()).await {
        Some(found) => found,
        None => {
            diagnostics
                .capture(context.page(), "headline_field_error", ShotStatus::Failure)
                .await;
            return Err(BrowserError::ElementNotFound {
                chain: "headline-field".into(),
            });
        }
    };

    let current_value = input_value(&field.element).await.unwrap_or_default();
    info!(current = %current_value.trim(), "current headline in form");
    if current_value.trim() == target.trim() {
        // Already holds the chosen text; submitting alone confirms it.
        info!("form already matches the chosen headline");
    } else {
        clear_and_type(&field.element, target).await?;
        if let Some(updated) = input_value(&field.element).await {
            info!(updated = %updated.trim(), "headline field updated");
        }
    }

    let save = match SAVE_CONTROL.try_find(context.page()).await {
        Some(found) => found,
        None => {
            diagnostics
                .capture(
                    context.page(),
                    "headline_save_button_not_found",
                    ShotStatus::Failure,
                )
                .await;
            return Err(BrowserError::ElementNotFound {
                chain: "headline-save".into(),
            });
        }
    };
    let clicked = resilient_click(
        context.page(),
        &save.element,
        std::time::Duration::from_secs(config.timeouts.save_wait_secs),
    )
    .await;

    context.goto(&config.portal.profile_url).await?;
    info!("navigated back to profile page to verify update");
    sleep(settle).await;

    let displayed = read_current_headline(context).await;
    if let Some(displayed) = &displayed {
        info!(displayed = %displayed, "headline on page after update");
    }
    let page_text = context.page().content().await.unwrap_or_default();
    let verified = verify_headline(&page_text, displayed.as_deref(), target);

    let accepted = match verified {
        Some(method) => {
            info!(?method, headline = %target, "headline update verified");
            true
        }
        None if clicked && config.profile.assume_unverified_success => {
            warn!(headline = %target, "headline update unverified, assuming success");
            true
        }
        None => {
            warn!("headline update verification failed");
            diagnostics
                .capture(
                    context.page(),
                    "headline_verification_failed",
                    ShotStatus::Failure,
                )
                .await;
            false
        }
    };

    Ok(HeadlineApplied {
        clicked,
        verified,
        accepted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn pool(entries: &[&str]) -> Vec<HeadlineCandidate> {
        entries
            .iter()
            .map(|entry| HeadlineCandidate {
                headline: entry.to_string(),
            })
            .collect()
    }

    #[test]
    fn rotation_never_reselects_live_headline() {
        let pool = pool(&[
            "DevOps Engineer | AWS | Kubernetes",
            "Site Reliability Engineer | Observability",
            "Platform Engineer | Terraform | CI/CD",
        ]);
        let displayed = "DevOps Engineer | AWS | Kubernetes - 4 years experience";
        for seed in 0..100 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let chosen = select_rotation(&pool, Some(displayed), &mut rng).unwrap();
            assert_ne!(chosen.headline, pool[0].headline);
        }
    }

    #[test]
    fn rotation_skips_when_single_candidate_is_live() {
        let pool = pool(&["Backend Engineer | Rust"]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(select_rotation(&pool, Some("Backend Engineer | Rust"), &mut rng).is_none());
    }

    #[test]
    fn rotation_samples_full_pool_without_current() {
        let pool = pool(&["A headline", "B headline"]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(select_rotation(&pool, None, &mut rng).is_some());
    }

    #[test]
    fn rotation_falls_back_when_exclusion_empties_pool() {
        let pool = pool(&["Alpha", "Alpha Beta"]);
        // Displayed text contains both candidates.
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        assert!(select_rotation(&pool, Some("Alpha Beta Gamma"), &mut rng).is_some());
    }

    #[test]
    fn canonical_current_uses_containment() {
        let pool = pool(&["SRE | Kubernetes", "DevOps | AWS"]);
        let displayed = "Profile headline: SRE | Kubernetes (updated today)";
        assert_eq!(canonical_current(&pool, displayed), Some("SRE | Kubernetes"));
        assert_eq!(canonical_current(&pool, "unrelated"), None);
    }

    #[test]
    fn verification_cascade_ordering() {
        let target = "Senior DevOps Engineer with Kubernetes and Terraform expertise";
        // Tier (a): fresh displayed text wins over anything else.
        assert_eq!(
            verify_headline("irrelevant", Some(target), target),
            Some(VerifyMethod::Displayed)
        );
        // Tier (b): exact substring of the rendered page.
        assert_eq!(
            verify_headline(&format!("<div>{target}</div>"), None, target),
            Some(VerifyMethod::Exact)
        );
        // Tier (c): truncated prefix only.
        let prefix: String = target.chars().take(50).collect();
        assert_eq!(
            verify_headline(&format!("...{prefix}"), None, target),
            Some(VerifyMethod::Prefix)
        );
        // Tier (d): keyword overlap.
        assert_eq!(
            verify_headline("mentions Kubernetes and Terraform somewhere", None, target),
            Some(VerifyMethod::Keywords)
        );
        // No tier matches.
        assert_eq!(verify_headline("nothing relevant", None, target), None);
    }

    #[test]
    fn keyword_tier_requires_two_distinct_long_words() {
        let target = "Kubernetes expert in everything";
        // A page containing only one qualifying word is not enough.
        assert_eq!(verify_headline("Kubernetes", None, target), None);
    }
}
