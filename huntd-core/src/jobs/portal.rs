use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{
    clear_and_type, scroll_into_center, wait_for_selector, BrowserAutomation, BrowserContext,
    BrowserResult, Locator, Strategy,
};
use crate::config::BotConfig;
use crate::diagnostics::{slugify, Diagnostics, ShotStatus};
use crate::interest::{share_interest, PortalFeed};

use super::{
    matches_success_phrase, select_experience_option, ApplicationOutcome, ExperienceSelection,
    JobListingRef, JobPortal, SearchCriteria, SortMode,
};

const SEARCH_AFFORDANCE: Locator = Locator::new(
    "search-affordance",
    &[
        Strategy::Text {
            tags: &["span"],
            contains: &["Search jobs here"],
            excludes: &[],
        },
        Strategy::Css(".nI-gNb-sb__icon-wrapper"),
    ],
);

const KEYWORDS_INPUT: Locator = Locator::new(
    "keywords-input",
    &[
        Strategy::Css("input[placeholder='Enter keyword / designation / companies']"),
        Strategy::Css(".keywordSugg input"),
    ],
);

const LOCATION_INPUT: Locator = Locator::new(
    "location-input",
    &[
        Strategy::Css("input[placeholder='Enter location']"),
        Strategy::Css(".locationSugg input"),
    ],
);

const SEARCH_SUBMIT: Locator = Locator::new(
    "search-submit",
    &[Strategy::Css(
        ".nI-gNb-sb__icon-wrapper, button.search, input[type='submit'], button[type='submit']",
    )],
);

const EXPERIENCE_DROPDOWN: &str = "input[placeholder='Select experience']";
const EXPERIENCE_OPTIONS: &str = ".dropdownPrimary ul li";
const FRESHNESS_DROPDOWN: &str = "#filter-freshness";
const FRESHNESS_OPTIONS: &str = "ul[data-filter-id='freshness'] li";
const FRESHNESS_TARGET: &str = "Last 1 day";
const SORT_DROPDOWN: &str = "#filter-sort";
const SORT_OPTIONS: &str = "ul[data-filter-id='sort'] li";

const RESULTS_CONTAINER: &str = ".jobTupleHeader, .cust-job-tuple, .jobTuple, div[type='tuple']";

const NEXT_PAGE: Locator = Locator::new(
    "next-page",
    &[
        Strategy::Css(".fright.fs14.btn-secondary.br2"),
        Strategy::Css("a.fright"),
        Strategy::Css(".nextPage"),
        Strategy::Css("a[title='Next']"),
    ],
);

const EXTERNAL_SITE: Locator = Locator::new(
    "company-site-apply",
    &[Strategy::Text {
        tags: &["button", "a", "span", "div"],
        contains: &["Apply on company site"],
        excludes: &[],
    }],
);

const APPLY_CONTROL: Locator = Locator::new(
    "apply-control",
    &[
        Strategy::Text {
            tags: &["button", "a"],
            contains: &["Apply"],
            excludes: &[],
        },
        Strategy::Css("button[class*='apply'], a[class*='apply']"),
        Strategy::Text {
            tags: &["span", "div"],
            contains: &["Apply"],
            excludes: &["company"],
        },
        Strategy::Css("input[value='Apply']"),
        Strategy::Css("[class*='apply-button']"),
    ],
);

const DIALOGS: &str = ".modal, .popup, .dialog, .overlay, [role='dialog']";

const VISIBLE_SUCCESS_SCRIPT: &str = r#"
(() => {
    const nodes = document.querySelectorAll('span, div, p, li, h1, h2, h3');
    for (const node of nodes) {
        const text = ((node.innerText || node.textContent) || '').trim();
        if (!text) continue;
        if (text.toLowerCase().includes('successfully applied') && node.offsetParent !== null) {
            return text;
        }
    }
    return null;
})()
"#;

const LISTING_SCRIPT: &str = r#"
(() => {
    const selectors = [
        '.jobTuple',
        '.cust-job-tuple',
        "div[type='tuple']",
        '.jobTupleHeader',
        'article.jobTupleHeader',
    ];
    for (const selector of selectors) {
        const rows = document.querySelectorAll(selector);
        if (!rows.length) continue;
        const out = [];
        rows.forEach(row => {
            const link = row.querySelector('a.title') || row.querySelector('a[title]');
            if (!link || !link.href) return;
            const company = row.querySelector('.comp-name, .company-name');
            const location = row.querySelector('.locWdth, .location');
            out.push({
                title: ((link.innerText || link.textContent) || '').trim(),
                company: company ? company.textContent.trim() : null,
                location: location ? location.textContent.trim() : null,
                href: link.href,
            });
        });
        return { selector, rows: out };
    }
    return { selector: null, rows: [] };
})()
"#;

const DIALOG_CONFIRM_FN: &str = r#"function() {
    document.querySelectorAll('[data-huntd-hit]').forEach(node => node.removeAttribute('data-huntd-hit'));
    const keywords = ['submit', 'confirm', 'apply', 'ok'];
    for (const button of this.querySelectorAll('button')) {
        const text = ((button.innerText || button.textContent) || '').trim().toLowerCase();
        if (!text) continue;
        if (keywords.some(keyword => text.includes(keyword))) {
            button.setAttribute('data-huntd-hit', 'dialog-confirm');
            return true;
        }
    }
    return false;
}"#;

#[derive(Debug, Deserialize)]
struct ListingPayload {
    selector: Option<String>,
    rows: Vec<RawListing>,
}

#[derive(Debug, Deserialize)]
struct RawListing {
    title: String,
    company: Option<String>,
    location: Option<String>,
    href: String,
}

/// Browser-backed [`JobPortal`]: drives the live site through the main
/// listing context and one isolated context per opened listing.
pub struct PortalSession {
    automation: Arc<BrowserAutomation>,
    context: BrowserContext,
    config: Arc<BotConfig>,
    diagnostics: Arc<Diagnostics>,
}

impl PortalSession {
    /// Opens the main browsing context on the profile page, the search
    /// entry point.
    pub async fn open(
        automation: Arc<BrowserAutomation>,
        config: Arc<BotConfig>,
        diagnostics: Arc<Diagnostics>,
    ) -> BrowserResult<Self> {
        let context = automation.new_context().await?;
        context.goto(&config.portal.profile_url).await?;
        info!("navigated to profile page");
        sleep(Duration::from_secs(config.timeouts.settle_secs)).await;
        Ok(Self {
            automation,
            context,
            config,
            diagnostics,
        })
    }

    pub fn context(&self) -> &BrowserContext {
        &self.context
    }

    async fn shot(&self, slug: &str, status: ShotStatus) {
        self.diagnostics
            .capture(self.context.page(), slug, status)
            .await;
    }

    async fn open_search_form(&self) -> BrowserResult<()> {
        match SEARCH_AFFORDANCE.try_find(self.context.page()).await {
            Some(found) => {
                found.element.click().await?;
                info!("opened the job search form");
                sleep(Duration::from_secs(2)).await;
            }
            None => {
                error!("failed to find search elements");
                self.shot("search_elements_not_found", ShotStatus::Failure)
                    .await;
                // Last resort: land on the search page directly.
                self.context
                    .goto(&self.config.portal.search_fallback_url)
                    .await?;
                info!("navigated directly to job search page");
                sleep(Duration::from_secs(3)).await;
            }
        }
        Ok(())
    }

    async fn fill_keywords(&self, title: &str) -> BrowserResult<()> {
        let input = KEYWORDS_INPUT.find(self.context.page()).await?;
        clear_and_type(&input.element, title).await?;
        input.element.press_key("Tab").await?;
        info!(title = %title, "entered job title");
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn select_experience(&self, years: u32) -> BrowserResult<()> {
        let dropdown = self.context.page().find_element(EXPERIENCE_DROPDOWN).await?;
        dropdown
            .call_js_fn("function() { this.click(); }", false)
            .await?;
        info!("opened experience dropdown");
        sleep(Duration::from_secs(2)).await;

        let options = self.context.page().find_elements(EXPERIENCE_OPTIONS).await?;
        if options.is_empty() {
            warn!("no experience options found in dropdown");
            return Ok(());
        }
        let mut texts = Vec::with_capacity(options.len());
        for option in &options {
            let text = option
                .inner_text()
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            texts.push(text);
        }
        match select_experience_option(&texts, years) {
            Some(ExperienceSelection::Matched(index)) => {
                options[index]
                    .call_js_fn("function() { this.click(); }", false)
                    .await?;
                info!(option = %texts[index].trim(), "selected experience");
            }
            Some(ExperienceSelection::Fallback(index)) => {
                warn!(
                    requested = years,
                    options = ?texts,
                    "experience value not found in dropdown options"
                );
                options[index]
                    .call_js_fn("function() { this.click(); }", false)
                    .await?;
                warn!(option = %texts[index].trim(), "selected first available option");
            }
            None => warn!("experience dropdown presented no options"),
        }
        Ok(())
    }

    async fn fill_location(&self, location: &str) -> BrowserResult<()> {
        let input = LOCATION_INPUT.find(self.context.page()).await?;
        clear_and_type(&input.element, location).await?;
        input.element.press_key("Tab").await?;
        info!(location = %location, "entered location");
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn submit_search(&self) -> BrowserResult<()> {
        let submit = SEARCH_SUBMIT.find(self.context.page()).await?;
        submit.element.click().await?;
        info!("clicked search button");
        sleep(Duration::from_secs(self.config.timeouts.settle_secs)).await;

        let timeout = Duration::from_secs(self.config.timeouts.page_load_secs);
        match wait_for_selector(self.context.page(), RESULTS_CONTAINER, timeout).await {
            Ok(_) => info!("search results loaded"),
            Err(_) => warn!("timed out waiting for search results, proceeding anyway"),
        }
        self.shot("job_search_results", ShotStatus::Success).await;
        Ok(())
    }

    async fn apply_freshness_filter(&self) -> BrowserResult<()> {
        let dropdown = self.context.page().find_element(FRESHNESS_DROPDOWN).await?;
        dropdown
            .call_js_fn("function() { this.click(); }", false)
            .await?;
        info!("opened freshness dropdown");
        sleep(Duration::from_secs(1)).await;

        let options = self.context.page().find_elements(FRESHNESS_OPTIONS).await?;
        for option in &options {
            let text = option
                .inner_text()
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            if text.contains(FRESHNESS_TARGET) {
                option
                    .call_js_fn("function() { this.click(); }", false)
                    .await?;
                info!(freshness = FRESHNESS_TARGET, "selected freshness filter");
                return Ok(());
            }
        }
        warn!(option = FRESHNESS_TARGET, "freshness option not found");
        Ok(())
    }

    async fn apply_sort(&self, sort: SortMode) -> BrowserResult<()> {
        let dropdown = self.context.page().find_element(SORT_DROPDOWN).await?;
        dropdown
            .call_js_fn("function() { this.click(); }", false)
            .await?;
        info!("opened sort dropdown");
        sleep(Duration::from_secs(1)).await;

        let timeout = Duration::from_secs(self.config.timeouts.element_secs);
        wait_for_selector(self.context.page(), SORT_OPTIONS, timeout).await?;
        // Re-locate after the wait; the dropdown re-renders its entries.
        let options = self.context.page().find_elements(SORT_OPTIONS).await?;
        let mut titles = Vec::with_capacity(options.len());
        for option in &options {
            titles.push(option.attribute("title").await.ok().flatten());
        }
        debug!(options = ?titles, "available sort options");

        let target = match sort {
            SortMode::Relevance => "Relevance",
            SortMode::Date => "Date",
        };
        for (index, title) in titles.iter().enumerate() {
            if title.as_deref() == Some(target) {
                options[index]
                    .call_js_fn("function() { this.click(); }", false)
                    .await?;
                info!(sort = target, "selected sort order");
                sleep(Duration::from_secs(4)).await;
                return Ok(());
            }
        }
        warn!(sort = target, options = ?titles, "sort option not found");
        self.shot(&format!("sort_option_not_found_{target}"), ShotStatus::Failure)
            .await;
        Ok(())
    }

    async fn detect_success(&self, detail: &BrowserContext) -> Option<String> {
        let content = detail.page().content().await.unwrap_or_default();
        if let Some(phrase) = matches_success_phrase(&content) {
            return Some(phrase.to_string());
        }
        detail
            .page()
            .evaluate(VISIBLE_SUCCESS_SCRIPT)
            .await
            .ok()?
            .into_value::<Option<String>>()
            .ok()
            .flatten()
    }

    async fn evaluate_in_context(
        &self,
        detail: &BrowserContext,
        listing: &JobListingRef,
    ) -> BrowserResult<ApplicationOutcome> {
        let company_slug = slugify(&listing.company);
        detail.goto(&listing.detail_link).await?;
        sleep(Duration::from_secs(3)).await;
        self.diagnostics
            .capture(
                detail.page(),
                &format!("job_details_{}", slugify(&listing.title)),
                ShotStatus::Info,
            )
            .await;

        if EXTERNAL_SITE.try_find(detail.page()).await.is_some() {
            info!(company = %listing.company, "job requires applying on company site, skipping");
            self.diagnostics
                .capture(
                    detail.page(),
                    &format!("skipped_company_site_{company_slug}"),
                    ShotStatus::Info,
                )
                .await;
            return Ok(ApplicationOutcome::SkippedExternalSite);
        }

        let apply = match APPLY_CONTROL.try_find(detail.page()).await {
            Some(found) => found,
            None => {
                info!(company = %listing.company, "no direct apply control found, skipping");
                self.diagnostics
                    .capture(
                        detail.page(),
                        &format!("no_apply_button_{company_slug}"),
                        ShotStatus::Info,
                    )
                    .await;
                return Ok(ApplicationOutcome::NoApplyControl);
            }
        };
        info!(company = %listing.company, "found apply control");

        scroll_into_center(&apply.element).await;
        sleep(Duration::from_secs(1)).await;
        self.diagnostics
            .capture(
                detail.page(),
                &format!("before_apply_{company_slug}"),
                ShotStatus::Info,
            )
            .await;

        apply.element.click().await?;
        info!(company = %listing.company, "clicked apply control");
        sleep(Duration::from_secs(self.config.timeouts.settle_secs)).await;
        self.diagnostics
            .capture(
                detail.page(),
                &format!("after_apply_click_{company_slug}"),
                ShotStatus::Info,
            )
            .await;

        let mut matched = self.detect_success(detail).await;

        if matched.is_none() {
            matched = self.confirm_via_dialog(detail, &company_slug).await;
        }

        match matched {
            Some(signal) => {
                info!(
                    title = %listing.title,
                    company = %listing.company,
                    signal = %signal,
                    "successfully applied to job"
                );
                self.diagnostics
                    .capture(
                        detail.page(),
                        &format!("application_success_{company_slug}"),
                        ShotStatus::Success,
                    )
                    .await;
                Ok(ApplicationOutcome::Applied)
            }
            None => {
                // Uncertainty never counts toward the quota.
                warn!(company = %listing.company, "could not confirm successful application");
                self.diagnostics
                    .capture(
                        detail.page(),
                        &format!("final_unconfirmed_{company_slug}"),
                        ShotStatus::Warning,
                    )
                    .await;
                Ok(ApplicationOutcome::Unconfirmed)
            }
        }
    }

    async fn confirm_via_dialog(
        &self,
        detail: &BrowserContext,
        company_slug: &str,
    ) -> Option<String> {
        let dialogs = detail.page().find_elements(DIALOGS).await.ok()?;
        if dialogs.is_empty() {
            return None;
        }
        info!("found dialog while applying");
        self.diagnostics
            .capture(
                detail.page(),
                &format!("application_dialog_{company_slug}"),
                ShotStatus::Info,
            )
            .await;

        for dialog in &dialogs {
            let marked = dialog
                .call_js_fn(DIALOG_CONFIRM_FN, false)
                .await
                .ok()
                .map(|returns| returns.exception_details.is_none())
                .unwrap_or(false);
            if !marked {
                continue;
            }
            let confirm = detail
                .page()
                .find_element("[data-huntd-hit='dialog-confirm']")
                .await
                .ok()?;
            self.diagnostics
                .capture(
                    detail.page(),
                    &format!("before_dialog_confirmation_{company_slug}"),
                    ShotStatus::Info,
                )
                .await;
            if confirm.click().await.is_err() {
                continue;
            }
            info!("clicked confirmation control in dialog");
            sleep(Duration::from_secs(self.config.timeouts.confirm_wait_secs)).await;
            self.diagnostics
                .capture(
                    detail.page(),
                    &format!("after_dialog_confirmation_{company_slug}"),
                    ShotStatus::Info,
                )
                .await;
            return self.detect_success(detail).await;
        }
        None
    }
}

#[async_trait(?Send)]
impl JobPortal for PortalSession {
    async fn search(&mut self, criteria: &SearchCriteria, fallback: bool) -> BrowserResult<()> {
        info!(fallback, sort = ?criteria.sort, "starting job search");

        self.open_search_form().await?;

        if let Err(err) = self.fill_keywords(&criteria.title).await {
            error!(error = %err, "failed to enter job title");
            self.shot("job_title_input_error", ShotStatus::Failure).await;
        }
        if let Err(err) = self.select_experience(criteria.experience_years).await {
            error!(error = %err, "failed to select experience");
            self.shot("experience_selection_error", ShotStatus::Failure)
                .await;
        }
        if let Err(err) = self.fill_location(&criteria.location).await {
            error!(error = %err, "failed to enter location");
            self.shot("location_input_error", ShotStatus::Failure).await;
        }
        if let Err(err) = self.submit_search().await {
            error!(error = %err, "failed to submit search");
            self.shot("search_submit_error", ShotStatus::Failure).await;
        }
        if let Err(err) = self.apply_freshness_filter().await {
            error!(error = %err, "failed to select freshness");
            self.shot("freshness_selection_error", ShotStatus::Failure)
                .await;
        }
        if let Err(err) = self.apply_sort(criteria.sort).await {
            error!(error = %err, "failed to select sort");
            self.shot("sort_selection_error", ShotStatus::Failure).await;
        }
        Ok(())
    }

    async fn listings(&mut self) -> BrowserResult<Vec<JobListingRef>> {
        let payload: ListingPayload = self
            .context
            .page()
            .evaluate(LISTING_SCRIPT)
            .await?
            .into_value()
            .map_err(|err| {
                crate::browser::BrowserError::Unexpected(format!(
                    "failed to decode listing payload: {err}"
                ))
            })?;

        let selector = match payload.selector {
            Some(selector) => selector,
            None => {
                error!("no job listings found on page");
                self.shot("no_job_listings", ShotStatus::Failure).await;
                return Ok(Vec::new());
            }
        };
        info!(
            count = payload.rows.len(),
            selector = %selector,
            "found job listings"
        );

        let base = self.context.current_url().await.unwrap_or_default();
        let mut listings = Vec::with_capacity(payload.rows.len());
        for row in payload.rows {
            if row.title.trim().is_empty() {
                warn!("skipping listing without a title");
                continue;
            }
            let detail_link = match Url::parse(&row.href) {
                Ok(url) => url.to_string(),
                Err(_) => match Url::parse(&base).and_then(|base| base.join(&row.href)) {
                    Ok(url) => url.to_string(),
                    Err(_) => {
                        warn!(href = %row.href, "skipping listing with unresolvable link");
                        continue;
                    }
                },
            };
            listings.push(JobListingRef {
                title: row.title.trim().to_string(),
                company: row
                    .company
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| "Unknown Company".to_string()),
                location: row
                    .location
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| "Unknown Location".to_string()),
                detail_link,
            });
        }
        Ok(listings)
    }

    async fn evaluate_and_apply(
        &mut self,
        listing: &JobListingRef,
    ) -> BrowserResult<ApplicationOutcome> {
        // The detail view gets its own context so a mid-view failure cannot
        // corrupt the listing page; it is closed on every path.
        let detail = self.automation.new_context().await?;
        info!(title = %listing.title, "opened job details in isolated context");
        let outcome = self.evaluate_in_context(&detail, listing).await;
        detail.close().await;
        debug!("returned to job listings context");

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_session_fatal() => Err(err),
            Err(err) => {
                error!(error = %err, company = %listing.company, "error applying for job");
                Ok(ApplicationOutcome::Error(err.to_string()))
            }
        }
    }

    async fn next_page(&mut self) -> BrowserResult<bool> {
        match NEXT_PAGE.try_find(self.context.page()).await {
            Some(found) => {
                found.element.click().await?;
                sleep(Duration::from_secs(self.config.timeouts.settle_secs)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn share_interest(&mut self, limit: usize) -> BrowserResult<usize> {
        let context = self.automation.new_context().await?;
        let mut feed = PortalFeed::new(
            &context,
            Arc::clone(&self.config),
            Arc::clone(&self.diagnostics),
        );
        let shared = share_interest(&mut feed, limit).await;
        context.close().await;
        Ok(shared)
    }
}
