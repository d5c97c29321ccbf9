use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::{CloseParams, NavigateParams};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BotConfig;

use super::error::{BrowserError, BrowserResult};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug)]
pub struct BrowserLauncher {
    config: Arc<BotConfig>,
}

impl BrowserLauncher {
    pub fn new(config: Arc<BotConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        let user_data = TempDir::new()
            .map_err(|err| BrowserError::Launch(format!("failed to create user data dir: {err}")))?;
        let chromium_config = self.build_chromium_config(&user_data)?;
        info!(
            headless = self.config.chromium.headless,
            width = self.config.chromium.window_width,
            height = self.config.chromium.window_height,
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            _user_data: user_data,
            config: Arc::clone(&self.config),
        })
    }

    fn build_chromium_config(&self, user_data: &TempDir) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let user_agent = chromium
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let mut builder = ChromiumConfig::builder()
            .user_data_dir(user_data.path())
            .viewport(ChromiumViewport {
                width: chromium.window_width,
                height: chromium.window_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: chromium.window_width >= chromium.window_height,
                has_touch: false,
            })
            .request_timeout(Duration::from_secs(self.config.timeouts.page_load_secs));

        if let Some(path) = &chromium.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!(
                "--window-size={},{}",
                chromium.window_width, chromium.window_height
            ),
        ];
        if chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        // Cache fully disabled so every run observes the live page state.
        args.push("--disable-application-cache".into());
        args.push("--disk-cache-size=0".into());
        args.push("--media-cache-size=0".into());
        // Images are never inspected, only text content.
        args.push("--blink-settings=imagesEnabled=false".into());
        args.push("--disable-dev-shm-usage".into());
        args.push("--disable-browser-side-navigation".into());
        args.push("--disable-site-isolation-trials".into());
        args.push("--no-first-run".into());
        args.push("--disable-background-timer-throttling".into());
        args.push("--password-store=basic".into());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    _user_data: TempDir,
    config: Arc<BotConfig>,
}

impl BrowserAutomation {
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Opens an isolated browsing context (a fresh tab).
    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        Ok(BrowserContext { page })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("shutting down chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    /// Closes the underlying tab. Failure is tolerated; the tab dies with
    /// the browser at session teardown anyway.
    pub async fn close(self) {
        if let Err(err) = self.page.execute(CloseParams::default()).await {
            warn!(error = %err, "failed to close browsing context");
        }
    }
}
