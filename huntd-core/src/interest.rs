use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{
    scroll_into_center, wait_for_text, BrowserContext, BrowserError, BrowserResult,
};
use crate::config::BotConfig;
use crate::diagnostics::{Diagnostics, ShotStatus};

const ACTIONABLE_ROWS: &str = "div.tlc__tuple button.unshared";
const CONFIRMATION_PHRASE: &str = "Interest shared successfully!";
const CONFIRMATION_WAIT: Duration = Duration::from_secs(5);
const MAX_STALE_PASSES: usize = 3;

/// The recommended-roles feed. The row set invalidates after every action,
/// so callers re-fetch between actions.
#[async_trait(?Send)]
pub trait RecommendedFeed {
    /// Re-navigates to the feed and returns the number of actionable rows.
    async fn refresh(&mut self) -> BrowserResult<usize>;

    /// Triggers the action control of the given row. Returns whether a
    /// confirmation was observed.
    async fn act_on(&mut self, index: usize) -> BrowserResult<bool>;
}

/// Expresses interest in recommended roles until `limit` is reached or the
/// feed has nothing actionable left. Row-level failures skip to the next
/// row; a feed fetch failure terminates early with the count so far.
pub async fn share_interest(feed: &mut dyn RecommendedFeed, limit: usize) -> usize {
    info!(limit, "starting share-interest process");
    let mut shared = 0usize;
    let mut stale_passes = 0usize;

    while shared < limit {
        let rows = match feed.refresh().await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "failed to fetch recommended feed");
                break;
            }
        };
        if rows == 0 {
            warn!("no actionable rows found in feed");
            break;
        }

        let mut acted = false;
        let mut went_stale = false;
        for index in 0..rows {
            if shared >= limit {
                break;
            }
            match feed.act_on(index).await {
                Ok(confirmed) => {
                    shared += 1;
                    info!(shared, limit, "shared interest");
                    if !confirmed {
                        warn!("no success confirmation found after sharing interest");
                    }
                    acted = true;
                    // The acting control goes stale after one action;
                    // restart enumeration from a fresh fetch.
                    break;
                }
                Err(BrowserError::Stale(reason)) => {
                    warn!(reason = %reason, "stale element encountered, re-locating");
                    went_stale = true;
                    break;
                }
                Err(err) => {
                    error!(error = %err, index, "failed to act on feed row");
                    continue;
                }
            }
        }

        if acted {
            stale_passes = 0;
            continue;
        }
        if went_stale {
            stale_passes += 1;
            if stale_passes >= MAX_STALE_PASSES {
                warn!("feed keeps going stale, giving up");
                break;
            }
            continue;
        }
        // A full pass performed no action: nothing left worth retrying.
        break;
    }

    info!(shared, "share-interest process finished");
    shared
}

/// Browser-backed [`RecommendedFeed`] over the early-access roles view.
pub struct PortalFeed<'a> {
    context: &'a BrowserContext,
    config: Arc<BotConfig>,
    diagnostics: Arc<Diagnostics>,
    actions: usize,
}

impl<'a> PortalFeed<'a> {
    pub fn new(
        context: &'a BrowserContext,
        config: Arc<BotConfig>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            context,
            config,
            diagnostics,
            actions: 0,
        }
    }
}

#[async_trait(?Send)]
impl RecommendedFeed for PortalFeed<'_> {
    async fn refresh(&mut self) -> BrowserResult<usize> {
        self.context.goto(&self.config.portal.recommended_url).await?;
        sleep(Duration::from_secs(self.config.timeouts.settle_secs)).await;
        let rows = self.context.page().find_elements(ACTIONABLE_ROWS).await?;
        Ok(rows.len())
    }

    async fn act_on(&mut self, index: usize) -> BrowserResult<bool> {
        let rows = self.context.page().find_elements(ACTIONABLE_ROWS).await?;
        let control = rows.get(index).ok_or_else(|| {
            BrowserError::Stale(format!("feed row {index} disappeared before the click"))
        })?;

        scroll_into_center(control).await;
        sleep(Duration::from_secs(1)).await;
        if let Err(err) = control.click().await {
            let text = err.to_string().to_lowercase();
            if text.contains("node") || text.contains("detached") {
                return Err(BrowserError::Stale(err.to_string()));
            }
            self.actions += 1;
            self.diagnostics
                .capture(
                    self.context.page(),
                    &format!("share_interest_error_{}", self.actions),
                    ShotStatus::Failure,
                )
                .await;
            return Err(BrowserError::Cdp(err));
        }
        self.actions += 1;

        let confirmed = wait_for_text(self.context.page(), CONFIRMATION_PHRASE, CONFIRMATION_WAIT).await;
        if confirmed {
            info!("interest shared successfully");
        }
        sleep(Duration::from_secs(2)).await;
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Scripted feed: each entry is one `act_on` result per pass.
    struct ScriptedFeed {
        rows: usize,
        refreshes: usize,
        refresh_failure_after: Option<usize>,
        act_results: Vec<BrowserResult<bool>>,
        acted: usize,
    }

    impl ScriptedFeed {
        fn new(rows: usize, act_results: Vec<BrowserResult<bool>>) -> Self {
            Self {
                rows,
                refreshes: 0,
                refresh_failure_after: None,
                act_results,
                acted: 0,
            }
        }
    }

    #[async_trait(?Send)]
    impl RecommendedFeed for ScriptedFeed {
        async fn refresh(&mut self) -> BrowserResult<usize> {
            self.refreshes += 1;
            if let Some(limit) = self.refresh_failure_after {
                if self.refreshes > limit {
                    return Err(BrowserError::Unexpected("feed gone".into()));
                }
            }
            Ok(self.rows)
        }

        async fn act_on(&mut self, _index: usize) -> BrowserResult<bool> {
            let result = if self.acted < self.act_results.len() {
                match &self.act_results[self.acted] {
                    Ok(value) => Ok(*value),
                    Err(err) => Err(BrowserError::Unexpected(err.to_string())),
                }
            } else {
                Ok(true)
            };
            self.acted += 1;
            result
        }
    }

    #[tokio::test]
    async fn stops_at_limit_and_refetches_between_actions() {
        let mut feed = ScriptedFeed::new(5, vec![Ok(true), Ok(true), Ok(true)]);
        let shared = share_interest(&mut feed, 3).await;
        assert_eq!(shared, 3);
        // One fetch per action plus the final pass check never happens
        // because the limit is reached first.
        assert_eq!(feed.refreshes, 3);
    }

    #[tokio::test]
    async fn row_errors_skip_to_next_row() {
        let mut feed = ScriptedFeed::new(
            3,
            vec![
                Err(BrowserError::Unexpected("click failed".into())),
                Ok(false),
            ],
        );
        let shared = share_interest(&mut feed, 1).await;
        assert_eq!(shared, 1);
        assert_eq!(feed.acted, 2);
    }

    #[tokio::test]
    async fn empty_feed_terminates() {
        let mut feed = ScriptedFeed::new(0, vec![]);
        assert_eq!(share_interest(&mut feed, 2).await, 0);
    }

    #[tokio::test]
    async fn feed_failure_returns_partial_count() {
        let mut feed = ScriptedFeed::new(4, vec![Ok(true)]);
        feed.refresh_failure_after = Some(1);
        let shared = share_interest(&mut feed, 3).await;
        assert_eq!(shared, 1);
    }

    #[tokio::test]
    async fn action_free_pass_terminates() {
        let mut feed = ScriptedFeed::new(
            2,
            vec![
                Err(BrowserError::Unexpected("row 0".into())),
                Err(BrowserError::Unexpected("row 1".into())),
            ],
        );
        assert_eq!(share_interest(&mut feed, 2).await, 0);
        assert_eq!(feed.refreshes, 1);
    }

    #[tokio::test]
    async fn stale_rows_trigger_reenumeration_with_a_bound() {
        struct AlwaysStale {
            refreshes: usize,
        }

        #[async_trait(?Send)]
        impl RecommendedFeed for AlwaysStale {
            async fn refresh(&mut self) -> BrowserResult<usize> {
                self.refreshes += 1;
                Ok(1)
            }

            async fn act_on(&mut self, _index: usize) -> BrowserResult<bool> {
                Err(BrowserError::Stale("row went away".into()))
            }
        }

        let mut feed = AlwaysStale { refreshes: 0 };
        assert_eq!(share_interest(&mut feed, 2).await, 0);
        assert_eq!(feed.refreshes, MAX_STALE_PASSES);
    }
}
