use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use huntd_core::config::SearchSection;
use huntd_core::jobs::{
    ApplicationLoop, ApplicationOutcome, JobListingRef, JobPortal, SearchCriteria, SortMode,
};
use huntd_core::{BrowserError, BrowserResult};

fn listing(title: &str) -> JobListingRef {
    JobListingRef {
        title: title.to_string(),
        company: "Acme".to_string(),
        location: "Remote".to_string(),
        detail_link: format!("https://example.com/jobs/{title}"),
    }
}

fn search_section(target: usize, early_access: bool) -> SearchSection {
    SearchSection {
        job_titles: vec!["DevOps Engineer".into(), "SRE".into()],
        locations: vec!["Remote".into()],
        experience_years: 2,
        max_applications: target,
        early_access_roles: early_access,
        early_access_limit: 2,
        pace_ms: [0, 0],
    }
}

#[derive(Debug, Clone)]
struct SearchCall {
    title: String,
    sort: SortMode,
    fallback: bool,
}

/// One scripted search result: a sequence of pages, each a list of
/// listings with their predetermined outcomes.
type ScriptedSearch = Vec<Vec<(JobListingRef, ApplicationOutcome)>>;

struct MockPortal {
    script: VecDeque<ScriptedSearch>,
    current: ScriptedSearch,
    page_index: usize,
    outcomes: HashMap<String, ApplicationOutcome>,
    search_calls: Arc<Mutex<Vec<SearchCall>>>,
    share_calls: Arc<Mutex<Vec<usize>>>,
    share_result: usize,
}

impl MockPortal {
    fn new(script: Vec<ScriptedSearch>) -> Self {
        let outcomes = script
            .iter()
            .flatten()
            .flatten()
            .map(|(listing, outcome)| (listing.title.clone(), outcome.clone()))
            .collect();
        Self {
            script: script.into_iter().collect(),
            current: Vec::new(),
            page_index: 0,
            outcomes,
            search_calls: Arc::new(Mutex::new(Vec::new())),
            share_calls: Arc::new(Mutex::new(Vec::new())),
            share_result: 0,
        }
    }
}

#[async_trait(?Send)]
impl JobPortal for MockPortal {
    async fn search(&mut self, criteria: &SearchCriteria, fallback: bool) -> BrowserResult<()> {
        self.search_calls.lock().unwrap().push(SearchCall {
            title: criteria.title.clone(),
            sort: criteria.sort,
            fallback,
        });
        self.current = self.script.pop_front().unwrap_or_default();
        self.page_index = 0;
        Ok(())
    }

    async fn listings(&mut self) -> BrowserResult<Vec<JobListingRef>> {
        Ok(self
            .current
            .get(self.page_index)
            .map(|page| page.iter().map(|(listing, _)| listing.clone()).collect())
            .unwrap_or_default())
    }

    async fn evaluate_and_apply(
        &mut self,
        listing: &JobListingRef,
    ) -> BrowserResult<ApplicationOutcome> {
        Ok(self
            .outcomes
            .get(&listing.title)
            .cloned()
            .unwrap_or(ApplicationOutcome::NoApplyControl))
    }

    async fn next_page(&mut self) -> BrowserResult<bool> {
        if self.page_index + 1 < self.current.len() {
            self.page_index += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn share_interest(&mut self, limit: usize) -> BrowserResult<usize> {
        self.share_calls.lock().unwrap().push(limit);
        Ok(self.share_result.min(limit))
    }
}

#[tokio::test]
async fn fallback_search_fills_the_quota() {
    let primary: ScriptedSearch = vec![vec![
        (listing("alpha"), ApplicationOutcome::Applied),
        (listing("beta"), ApplicationOutcome::NoApplyControl),
        (listing("gamma"), ApplicationOutcome::Unconfirmed),
    ]];
    let fallback: ScriptedSearch = vec![vec![(listing("delta"), ApplicationOutcome::Applied)]];
    let portal = MockPortal::new(vec![primary, fallback]);
    let search_calls = Arc::clone(&portal.search_calls);

    let mut run = ApplicationLoop::new(Box::new(portal), search_section(2, false));
    let stats = run.run().await.unwrap();

    assert_eq!(stats.applied, 2);
    assert_eq!(stats.search_attempts, 2);
    assert_eq!(stats.fallback_searches, 1);
    assert_eq!(stats.no_apply_control, 1);
    assert_eq!(stats.unconfirmed, 1);
    assert!(stats.applied <= stats.target);

    let calls = search_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].fallback);
    assert_eq!(calls[0].sort, SortMode::Relevance);
    assert!(calls[1].fallback);
    assert_eq!(calls[1].sort, SortMode::Date);
    // Two titles in the pool: the fallback search must pick the other one.
    assert_ne!(calls[0].title, calls[1].title);
}

#[tokio::test]
async fn processing_ceiling_bounds_a_page_and_triggers_interest_sharing() {
    let rows: Vec<(JobListingRef, ApplicationOutcome)> = (0..20)
        .map(|index| {
            (
                listing(&format!("job-{index}")),
                ApplicationOutcome::NoApplyControl,
            )
        })
        .collect();
    let mut portal = MockPortal::new(vec![vec![rows]]);
    portal.share_result = 2;
    let share_calls = Arc::clone(&portal.share_calls);

    let mut run = ApplicationLoop::new(Box::new(portal), search_section(3, true));
    let stats = run.run().await.unwrap();

    // target 3 -> ceiling 15: exactly 15 of the 20 rows are examined.
    assert_eq!(stats.processed, 15);
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.search_attempts, 3);
    assert_eq!(stats.interests_shared, 2);
    // The side workflow runs once per run, on the first ceiling hit.
    assert_eq!(*share_calls.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn pagination_continues_after_a_ceiling_hit() {
    let first_page: Vec<(JobListingRef, ApplicationOutcome)> = (0..8)
        .map(|index| {
            (
                listing(&format!("first-{index}")),
                ApplicationOutcome::NoApplyControl,
            )
        })
        .collect();
    let second_page = vec![(listing("winner"), ApplicationOutcome::Applied)];
    let portal = MockPortal::new(vec![vec![first_page, second_page]]);

    let mut run = ApplicationLoop::new(Box::new(portal), search_section(1, false));
    let stats = run.run().await.unwrap();

    // target 1 -> ceiling 5: the first page stops early with rows left,
    // pagination reaches the second page, and the quota is met there.
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.processed, 6);
    assert_eq!(stats.search_attempts, 1);
    assert_eq!(stats.pages_visited, 2);
}

#[tokio::test]
async fn session_fatal_errors_abort_the_run() {
    struct FatalPortal;

    #[async_trait(?Send)]
    impl JobPortal for FatalPortal {
        async fn search(&mut self, _: &SearchCriteria, _: bool) -> BrowserResult<()> {
            Err(BrowserError::LoginFailed { attempts: 3 })
        }

        async fn listings(&mut self) -> BrowserResult<Vec<JobListingRef>> {
            Ok(Vec::new())
        }

        async fn evaluate_and_apply(
            &mut self,
            _: &JobListingRef,
        ) -> BrowserResult<ApplicationOutcome> {
            Ok(ApplicationOutcome::NoApplyControl)
        }

        async fn next_page(&mut self) -> BrowserResult<bool> {
            Ok(false)
        }

        async fn share_interest(&mut self, _: usize) -> BrowserResult<usize> {
            Ok(0)
        }
    }

    let mut run = ApplicationLoop::new(Box::new(FatalPortal), search_section(1, false));
    assert!(run.run().await.is_err());
}
