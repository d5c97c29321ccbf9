use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use tracing::trace;

use super::error::{BrowserError, BrowserResult};

/// Attribute used by script-driven strategies to mark the matched node so
/// it can be re-fetched through an ordinary CSS query.
pub const HIT_ATTR: &str = "data-huntd-hit";

/// One lookup strategy inside an ordered fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Plain CSS selector, first match wins.
    Css(&'static str),
    /// Scan the given tags for an element whose text contains one of
    /// `contains` and none of `excludes` (both compared lowercase).
    Text {
        tags: &'static [&'static str],
        contains: &'static [&'static str],
        excludes: &'static [&'static str],
    },
    /// Free-form page script. Must mark exactly one element with
    /// `HIT_ATTR` set to the `__MARKER__` placeholder and return `true`,
    /// or return `false` when nothing matched.
    Script(&'static str),
}

/// An ordered list of lookup strategies evaluated until one yields an
/// element. The chain itself is plain data so tests can assert ordering.
#[derive(Debug, Clone, Copy)]
pub struct Locator {
    pub name: &'static str,
    pub strategies: &'static [Strategy],
}

/// A successful lookup, remembering which strategy won.
pub struct Located {
    pub element: Element,
    pub strategy: usize,
}

impl Locator {
    pub const fn new(name: &'static str, strategies: &'static [Strategy]) -> Self {
        Self { name, strategies }
    }

    /// Walks the chain; `None` when every strategy came up empty.
    pub async fn try_find(&self, page: &Page) -> Option<Located> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let found = match strategy {
                Strategy::Css(selector) => page.find_element(*selector).await.ok(),
                Strategy::Text {
                    tags,
                    contains,
                    excludes,
                } => {
                    let marker = self.marker(index);
                    let script = text_strategy_script(tags, contains, excludes, &marker);
                    self.run_marking_script(page, &script, &marker).await
                }
                Strategy::Script(template) => {
                    let marker = self.marker(index);
                    let script = script_with_marker(template, &marker);
                    self.run_marking_script(page, &script, &marker).await
                }
            };
            if let Some(element) = found {
                trace!(chain = self.name, strategy = index, "locator strategy matched");
                return Some(Located {
                    element,
                    strategy: index,
                });
            }
        }
        None
    }

    /// Like [`try_find`](Self::try_find) but exhaustion is a typed error.
    pub async fn find(&self, page: &Page) -> BrowserResult<Located> {
        self.try_find(page)
            .await
            .ok_or_else(|| BrowserError::ElementNotFound {
                chain: self.name.to_string(),
            })
    }

    fn marker(&self, index: usize) -> String {
        format!("{}-{}", self.name, index)
    }

    async fn run_marking_script(
        &self,
        page: &Page,
        script: &str,
        marker: &str,
    ) -> Option<Element> {
        let matched = page
            .evaluate(script)
            .await
            .ok()?
            .into_value::<bool>()
            .unwrap_or(false);
        if !matched {
            return None;
        }
        page.find_element(format!("[{HIT_ATTR}='{marker}']"))
            .await
            .ok()
    }
}

fn script_with_marker(template: &str, marker: &str) -> String {
    template.replace("__MARKER__", marker)
}

fn text_strategy_script(
    tags: &[&str],
    contains: &[&str],
    excludes: &[&str],
    marker: &str,
) -> String {
    let tags = serde_json::to_string(tags).unwrap_or_else(|_| "[]".into());
    let needles = serde_json::to_string(
        &contains
            .iter()
            .map(|n| n.to_lowercase())
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".into());
    let excludes = serde_json::to_string(
        &excludes
            .iter()
            .map(|n| n.to_lowercase())
            .collect::<Vec<_>>(),
    )
    .unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
    document.querySelectorAll('[{attr}]').forEach(node => node.removeAttribute('{attr}'));
    const tags = {tags};
    const needles = {needles};
    const excludes = {excludes};
    for (const tag of tags) {{
        for (const node of document.querySelectorAll(tag)) {{
            const text = ((node.innerText || node.textContent) || '').trim().toLowerCase();
            if (!text) continue;
            if (!needles.some(needle => text.includes(needle))) continue;
            if (excludes.some(needle => text.includes(needle))) continue;
            node.setAttribute('{attr}', '{marker}');
            return true;
        }}
    }}
    return false;
}})()"#,
        attr = HIT_ATTR,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAVE_CONTROL: Locator = Locator::new(
        "save-control",
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

    #[test]
    fn chain_is_ordered_data() {
        assert_eq!(SAVE_CONTROL.strategies.len(), 3);
        assert!(matches!(
            SAVE_CONTROL.strategies[0],
            Strategy::Css("button.btn-dark-ot[type='submit']")
        ));
        assert!(matches!(SAVE_CONTROL.strategies[2], Strategy::Text { .. }));
    }

    #[test]
    fn text_script_lowercases_needles_and_clears_markers() {
        let script = text_strategy_script(&["button"], &["Apply"], &["Company"], "apply-0");
        assert!(script.contains(r#"["apply"]"#));
        assert!(script.contains(r#"["company"]"#));
        assert!(script.contains("removeAttribute"));
        assert!(script.contains("apply-0"));
    }

    #[test]
    fn script_template_marker_substitution() {
        let script = script_with_marker("mark('__MARKER__')", "resume-2");
        assert_eq!(script, "mark('resume-2')");
    }
}
