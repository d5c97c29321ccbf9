mod portal;

pub use portal::PortalSession;

use std::time::Instant;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::browser::{BrowserError, BrowserResult, Pacer};
use crate::config::SearchSection;

/// Total search attempts per run, the primary one included.
pub const MAX_SEARCH_ATTEMPTS: usize = 3;
/// Over-provisioning factor: rows examined per page before giving up on
/// finding enough applicable jobs.
pub const PROCESSING_MULTIPLIER: usize = 5;

pub fn processing_ceiling(remaining_target: usize) -> usize {
    remaining_target * PROCESSING_MULTIPLIER
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortMode {
    Relevance,
    Date,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchCriteria {
    pub title: String,
    pub location: String,
    pub experience_years: u32,
    pub sort: SortMode,
}

/// Ephemeral handle to one row of the results view, valid for a single
/// iteration of listing processing.
#[derive(Debug, Clone)]
pub struct JobListingRef {
    pub title: String,
    pub company: String,
    pub location: String,
    pub detail_link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationOutcome {
    Applied,
    SkippedExternalSite,
    NoApplyControl,
    Unconfirmed,
    Error(String),
}

/// Monotonic application accounting; `applied` never exceeds `target`.
#[derive(Debug, Clone)]
pub struct ApplicationQuota {
    target: usize,
    applied: usize,
    processed: usize,
}

impl ApplicationQuota {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            applied: 0,
            processed: 0,
        }
    }

    pub fn record(&mut self, outcome: &ApplicationOutcome) {
        self.processed += 1;
        if matches!(outcome, ApplicationOutcome::Applied) && self.applied < self.target {
            self.applied += 1;
        }
        debug_assert!(self.applied <= self.target);
    }

    pub fn reached(&self) -> bool {
        self.applied >= self.target
    }

    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.applied)
    }

    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn target(&self) -> usize {
        self.target
    }
}

/// Phrases the portal renders after a completed application, matched
/// case-insensitively against the full page text.
pub const SUCCESS_PHRASES: [&str; 7] = [
    "You have successfully applied",
    "Application successful",
    "Applied successfully",
    "You have already applied",
    "Application confirmed",
    "successfully applied to",
    "Successfully applied",
];

pub fn matches_success_phrase(page_text: &str) -> Option<&'static str> {
    let haystack = page_text.to_lowercase();
    SUCCESS_PHRASES
        .iter()
        .find(|phrase| haystack.contains(&phrase.to_lowercase()))
        .copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperienceSelection {
    /// Exact (normalized) match at this option index.
    Matched(usize),
    /// Nothing matched; degrade gracefully to the first presented option.
    Fallback(usize),
}

/// Picks the dropdown option for the requested experience. Zero years maps
/// to the portal's "Fresher" label; otherwise "N year(s)" with the plural
/// normalized.
pub fn select_experience_option(options: &[String], years: u32) -> Option<ExperienceSelection> {
    if options.is_empty() {
        return None;
    }
    let label = if years == 1 {
        format!("{years} year")
    } else {
        format!("{years} years")
    };
    for (index, option) in options.iter().enumerate() {
        let text = option.trim().to_lowercase();
        if years == 0 && text == "fresher" {
            return Some(ExperienceSelection::Matched(index));
        }
        if text == label || (years == 0 && text == "0 year") {
            return Some(ExperienceSelection::Matched(index));
        }
    }
    Some(ExperienceSelection::Fallback(0))
}

/// Samples from `pool`, avoiding `previous` when an alternative exists.
pub fn sample_excluding<'a, R: Rng + ?Sized>(
    pool: &'a [String],
    previous: Option<&str>,
    rng: &mut R,
) -> Option<&'a str> {
    if pool.is_empty() {
        return None;
    }
    let filtered: Vec<&String> = pool
        .iter()
        .filter(|value| Some(value.as_str()) != previous)
        .collect();
    if let Some(choice) = filtered.choose(rng) {
        return Some(choice.as_str());
    }
    pool.choose(rng).map(|value| value.as_str())
}

/// Seam between the orchestration loop and the site driver, so the retry
/// and quota logic is exercisable against a scripted portal.
#[async_trait(?Send)]
pub trait JobPortal {
    /// Runs the search flow for the given criteria. Sub-step failures are
    /// degraded internally; only session-level errors surface.
    async fn search(&mut self, criteria: &SearchCriteria, fallback: bool) -> BrowserResult<()>;

    /// Enumerates the rows of the current results page.
    async fn listings(&mut self) -> BrowserResult<Vec<JobListingRef>>;

    /// Opens one listing in an isolated context, classifies it, and
    /// attempts the application.
    async fn evaluate_and_apply(
        &mut self,
        listing: &JobListingRef,
    ) -> BrowserResult<ApplicationOutcome>;

    /// Advances to the next results page. `false` when there is none.
    async fn next_page(&mut self) -> BrowserResult<bool>;

    /// Interest-sharing side workflow; returns the number of roles acted on.
    async fn share_interest(&mut self, limit: usize) -> BrowserResult<usize>;
}

/// Serializable summary of one application run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub target: usize,
    pub applied: usize,
    pub processed: usize,
    pub search_attempts: usize,
    pub fallback_searches: usize,
    pub skipped_external: usize,
    pub no_apply_control: usize,
    pub unconfirmed: usize,
    pub row_errors: usize,
    pub interests_shared: usize,
    pub pages_visited: usize,
    pub duration_secs: u64,
    pub errors: Vec<String>,
}

impl RunStats {
    fn fold(&mut self, outcome: &ApplicationOutcome) {
        match outcome {
            ApplicationOutcome::Applied => {}
            ApplicationOutcome::SkippedExternalSite => self.skipped_external += 1,
            ApplicationOutcome::NoApplyControl => self.no_apply_control += 1,
            ApplicationOutcome::Unconfirmed => self.unconfirmed += 1,
            ApplicationOutcome::Error(reason) => {
                self.row_errors += 1;
                self.errors.push(reason.clone());
            }
        }
    }
}

/// State machine over one run: search, enumerate, apply per listing, and
/// escalate through fallback searches while the quota is unmet.
pub struct ApplicationLoop {
    portal: Box<dyn JobPortal>,
    search: SearchSection,
    pacer: Pacer,
}

impl ApplicationLoop {
    pub fn new(portal: Box<dyn JobPortal>, search: SearchSection) -> Self {
        let pacer = Pacer::new((search.pace_ms[0], search.pace_ms[1]));
        Self {
            portal,
            search,
            pacer,
        }
    }

    pub async fn run(&mut self) -> BrowserResult<RunStats> {
        if self.search.job_titles.is_empty() || self.search.locations.is_empty() {
            return Err(BrowserError::Configuration(
                "job_titles and locations must be non-empty".into(),
            ));
        }

        let started = Instant::now();
        let mut quota = ApplicationQuota::new(self.search.max_applications);
        let mut stats = RunStats {
            target: quota.target(),
            ..RunStats::default()
        };
        let mut interest_done = false;

        let mut criteria = self.sample_criteria(None, None, SortMode::Relevance);
        info!(
            title = %criteria.title,
            location = %criteria.location,
            experience = criteria.experience_years,
            target = quota.target(),
            "selected job search parameters"
        );

        loop {
            stats.search_attempts += 1;
            let fallback = stats.search_attempts > 1;
            if let Err(err) = self.portal.search(&criteria, fallback).await {
                if err.is_session_fatal() {
                    return Err(err);
                }
                warn!(error = %err, "search attempt failed");
                stats.errors.push(err.to_string());
            }

            self.process_pages(&mut quota, &mut stats, &mut interest_done)
                .await?;

            if quota.reached() {
                info!(
                    applied = quota.applied(),
                    target = quota.target(),
                    "reached target application count"
                );
                break;
            }
            if stats.search_attempts >= MAX_SEARCH_ATTEMPTS {
                info!(
                    applied = quota.applied(),
                    target = quota.target(),
                    "search attempts exhausted"
                );
                break;
            }

            info!(
                applied = quota.applied(),
                target = quota.target(),
                "quota unmet, trying a different search"
            );
            criteria = self.sample_criteria(
                Some(criteria.title.as_str()),
                Some(criteria.location.as_str()),
                SortMode::Date,
            );
            stats.fallback_searches += 1;
            info!(
                title = %criteria.title,
                location = %criteria.location,
                "new search parameters"
            );
        }

        stats.applied = quota.applied();
        stats.processed = quota.processed();
        stats.duration_secs = started.elapsed().as_secs();
        info!(
            applied = stats.applied,
            processed = stats.processed,
            attempts = stats.search_attempts,
            duration = stats.duration_secs,
            "application run finished"
        );
        Ok(stats)
    }

    /// Explicit loop over result pages with an accumulator; pagination
    /// never recurses.
    async fn process_pages(
        &mut self,
        quota: &mut ApplicationQuota,
        stats: &mut RunStats,
        interest_done: &mut bool,
    ) -> BrowserResult<()> {
        loop {
            stats.pages_visited += 1;
            let listings = match self.portal.listings().await {
                Ok(listings) => listings,
                Err(err) => {
                    if err.is_session_fatal() {
                        return Err(err);
                    }
                    error!(error = %err, "failed to enumerate job listings");
                    stats.errors.push(err.to_string());
                    return Ok(());
                }
            };
            if listings.is_empty() {
                warn!("no job listings found on page");
                return Ok(());
            }
            info!(
                count = listings.len(),
                remaining = quota.remaining(),
                "processing job listings"
            );

            let ceiling = processing_ceiling(quota.remaining());
            let mut examined = 0usize;
            for listing in &listings {
                if quota.reached() {
                    break;
                }
                if examined >= ceiling {
                    info!(ceiling, "reached per-page processing ceiling");
                    self.maybe_share_interest(stats, interest_done).await;
                    break;
                }
                examined += 1;

                info!(
                    index = examined,
                    title = %listing.title,
                    company = %listing.company,
                    location = %listing.location,
                    "processing job"
                );
                match self.portal.evaluate_and_apply(listing).await {
                    Ok(outcome) => {
                        quota.record(&outcome);
                        stats.fold(&outcome);
                        if matches!(outcome, ApplicationOutcome::Applied) {
                            info!(
                                applied = quota.applied(),
                                target = quota.target(),
                                "application progress"
                            );
                        }
                    }
                    Err(err) => {
                        if err.is_session_fatal() {
                            return Err(err);
                        }
                        error!(error = %err, title = %listing.title, "error processing job listing");
                        stats.row_errors += 1;
                        stats.errors.push(err.to_string());
                    }
                }
                self.pacer.wait().await;
            }

            if quota.reached() {
                return Ok(());
            }
            if examined >= listings.len() {
                // The page was consumed without hitting the ceiling;
                // further pages would repeat the same exhausted search.
                return Ok(());
            }
            match self.portal.next_page().await {
                Ok(true) => {
                    info!("moving to next page of results");
                }
                Ok(false) => return Ok(()),
                Err(err) => {
                    if err.is_session_fatal() {
                        return Err(err);
                    }
                    error!(error = %err, "error navigating to next page");
                    stats.errors.push(err.to_string());
                    return Ok(());
                }
            }
        }
    }

    /// Ceiling side-channel: runs the interest-sharing auxiliary at most
    /// once per run. Its failure never aborts the main flow.
    async fn maybe_share_interest(&mut self, stats: &mut RunStats, interest_done: &mut bool) {
        if !self.search.early_access_roles || *interest_done {
            return;
        }
        *interest_done = true;
        info!(
            limit = self.search.early_access_limit,
            "processing budget exhausted, sharing interest in early access roles"
        );
        match self
            .portal
            .share_interest(self.search.early_access_limit)
            .await
        {
            Ok(shared) => {
                stats.interests_shared += shared;
                info!(shared, "interest sharing completed");
            }
            Err(err) => {
                error!(error = %err, "interest sharing side workflow failed");
                stats.errors.push(err.to_string());
            }
        }
    }

    fn sample_criteria(
        &self,
        previous_title: Option<&str>,
        previous_location: Option<&str>,
        sort: SortMode,
    ) -> SearchCriteria {
        let mut rng = rand::thread_rng();
        let title = sample_excluding(&self.search.job_titles, previous_title, &mut rng)
            .unwrap_or_default()
            .to_string();
        let location = sample_excluding(&self.search.locations, previous_location, &mut rng)
            .unwrap_or_default()
            .to_string();
        SearchCriteria {
            title,
            location,
            experience_years: self.search.experience_years,
            sort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn ceiling_is_five_times_target() {
        assert_eq!(processing_ceiling(3), 15);
        assert_eq!(processing_ceiling(0), 0);
    }

    #[test]
    fn quota_is_monotonic_and_bounded() {
        let mut quota = ApplicationQuota::new(2);
        quota.record(&ApplicationOutcome::NoApplyControl);
        assert_eq!(quota.applied(), 0);
        quota.record(&ApplicationOutcome::Applied);
        quota.record(&ApplicationOutcome::Applied);
        assert!(quota.reached());
        assert_eq!(quota.applied(), 2);
        assert_eq!(quota.processed(), 3);
        assert!(quota.applied() <= quota.target());
    }

    #[test]
    fn experience_matching_exact() {
        let options: Vec<String> = ["Fresher", "1 year", "2 years", "3 years"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            select_experience_option(&options, 2),
            Some(ExperienceSelection::Matched(2))
        );
        assert_eq!(
            select_experience_option(&options, 1),
            Some(ExperienceSelection::Matched(1))
        );
        assert_eq!(
            select_experience_option(&options, 0),
            Some(ExperienceSelection::Matched(0))
        );
    }

    #[test]
    fn experience_matching_falls_back_to_first_option() {
        let options: Vec<String> = ["Fresher", "1 year", "2 years", "3 years"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            select_experience_option(&options, 10),
            Some(ExperienceSelection::Fallback(0))
        );
        assert_eq!(select_experience_option(&[], 2), None);
    }

    #[test]
    fn success_phrase_matching_is_case_insensitive() {
        let page = "<body>You Have Successfully Applied to this role</body>";
        assert!(matches_success_phrase(page).is_some());
        assert!(matches_success_phrase("nothing here").is_none());
    }

    #[test]
    fn sampling_excludes_previous_when_possible() {
        let pool: Vec<String> = vec!["DevOps Engineer".into(), "SRE".into()];
        for seed in 0..50 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let pick = sample_excluding(&pool, Some("DevOps Engineer"), &mut rng).unwrap();
            assert_eq!(pick, "SRE");
        }
    }

    #[test]
    fn sampling_reuses_pool_when_exclusion_empties_it() {
        let pool: Vec<String> = vec!["Remote".into()];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            sample_excluding(&pool, Some("Remote"), &mut rng),
            Some("Remote")
        );
    }
}
