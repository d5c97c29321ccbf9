use std::time::Duration;

use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::{BrowserError, BrowserResult};

/// CSS matched against transient busy indicators after a save/submit.
pub const LOADING_INDICATORS: &str = ".saving, .loading, .spinner";

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const CLICK_FALLBACK_SLEEP: Duration = Duration::from_secs(10);

/// The four click strategies, attempted strictly in [`ClickStrategy::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStrategy {
    Native,
    Scripted,
    SyntheticEvent,
    FormSubmit,
}

impl ClickStrategy {
    pub const ORDER: [ClickStrategy; 4] = [
        ClickStrategy::Native,
        ClickStrategy::Scripted,
        ClickStrategy::SyntheticEvent,
        ClickStrategy::FormSubmit,
    ];

    async fn attempt(&self, element: &Element) -> bool {
        match self {
            ClickStrategy::Native => element.click().await.is_ok(),
            ClickStrategy::Scripted => call_void(element, "function() { this.click(); }").await,
            ClickStrategy::SyntheticEvent => {
                call_void(
                    element,
                    r#"function() {
    const clickEvent = new MouseEvent('click', {
        bubbles: true,
        cancelable: true,
        view: window,
    });
    this.dispatchEvent(clickEvent);
}"#,
                )
                .await
            }
            ClickStrategy::FormSubmit => {
                call_void(
                    element,
                    r#"function() {
    const form = this.closest('form');
    if (!form) {
        throw new Error('no parent form');
    }
    form.submit();
}"#,
                )
                .await
            }
        }
    }
}

/// Multi-strategy click tolerant of varying page scripting behavior.
///
/// Stops at the first strategy that completes without raising and returns
/// whether any did; this says nothing about whether the triggered action
/// itself took effect. Afterwards waits for busy indicators to clear, with
/// a fixed sleep when they never do.
pub async fn resilient_click(page: &Page, element: &Element, indicator_wait: Duration) -> bool {
    scroll_into_center(element).await;
    sleep(Duration::from_secs(1)).await;

    let mut clicked = None;
    for strategy in ClickStrategy::ORDER {
        if strategy.attempt(element).await {
            clicked = Some(strategy);
            break;
        }
    }

    if !wait_until_gone(page, LOADING_INDICATORS, indicator_wait).await {
        sleep(CLICK_FALLBACK_SLEEP).await;
    }

    match clicked {
        Some(strategy) => {
            debug!(?strategy, "click strategy succeeded");
            true
        }
        None => {
            warn!("all click strategies raised");
            false
        }
    }
}

async fn call_void(element: &Element, function: &str) -> bool {
    match element.call_js_fn(function, false).await {
        Ok(returns) => returns.exception_details.is_none(),
        Err(_) => false,
    }
}

/// Polls until the selector matches, bounded by `timeout`.
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> BrowserResult<Element> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrowserError::Timeout(selector.to_string()));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Polls until the selector no longer matches. `false` when it is still
/// present at the deadline.
pub async fn wait_until_gone(page: &Page, selector: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_err() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Polls the rendered page for a case-insensitive text fragment.
pub async fn wait_for_text(page: &Page, needle: &str, timeout: Duration) -> bool {
    let needle = needle.to_lowercase();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(content) = page.content().await {
            if content.to_lowercase().contains(&needle) {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub async fn scroll_into_center(element: &Element) {
    let _ = element
        .call_js_fn("function() { this.scrollIntoView({block: 'center'}); }", false)
        .await;
}

/// Strips the CSS hiding commonly applied to file inputs and similar
/// controls so the driver can interact with them.
pub async fn force_visible(element: &Element) -> BrowserResult<()> {
    element
        .call_js_fn(
            r#"function() {
    this.style.display = 'block';
    this.style.visibility = 'visible';
    this.style.opacity = '1';
}"#,
            false,
        )
        .await?;
    Ok(())
}

/// Current live value of an input or textarea.
pub async fn input_value(element: &Element) -> Option<String> {
    let returns = element
        .call_js_fn(
            "function() { return this.value || this.textContent || ''; }",
            false,
        )
        .await
        .ok()?;
    returns
        .result
        .value
        .and_then(|value| value.as_str().map(|s| s.to_string()))
}

pub async fn clear_and_type(element: &Element, text: &str) -> BrowserResult<()> {
    element.click().await?;
    element
        .call_js_fn("function() { this.value = ''; }", false)
        .await?;
    sleep(Duration::from_millis(500)).await;
    element.type_str(text).await?;
    Ok(())
}

/// Randomized pause between listing rows to avoid obvious request bursts.
#[derive(Debug, Clone)]
pub struct Pacer {
    range: (u64, u64),
}

impl Pacer {
    pub fn new(range: (u64, u64)) -> Self {
        Self { range }
    }

    pub async fn wait(&self) -> u64 {
        if self.range.0 == 0 && self.range.1 == 0 {
            return 0;
        }
        let lower = self.range.0.min(self.range.1);
        let upper = self.range.0.max(self.range.1);
        let delay = rand::thread_rng().gen_range(lower..=upper);
        sleep(Duration::from_millis(delay)).await;
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_strategy_order_is_fixed() {
        assert_eq!(
            ClickStrategy::ORDER,
            [
                ClickStrategy::Native,
                ClickStrategy::Scripted,
                ClickStrategy::SyntheticEvent,
                ClickStrategy::FormSubmit,
            ]
        );
    }

    #[tokio::test]
    async fn pacer_zero_range_is_free() {
        let pacer = Pacer::new((0, 0));
        assert_eq!(pacer.wait().await, 0);
    }
}
