mod actions;
mod automation;
mod error;
mod locator;

pub use actions::{
    clear_and_type, force_visible, input_value, resilient_click, scroll_into_center,
    wait_for_selector, wait_for_text, wait_until_gone, ClickStrategy, Pacer, LOADING_INDICATORS,
};
pub use automation::{BrowserAutomation, BrowserContext, BrowserLauncher};
pub use error::{BrowserError, BrowserResult};
pub use locator::{Located, Locator, Strategy, HIT_ATTR};
