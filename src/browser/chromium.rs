//! Chrome DevTools Protocol implementation of the browser capabilities.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, NavigateParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::driver::{BrowserLauncher, BrowserSession, PageDriver};
use super::types::{ClickTarget, Engine, SessionOptions};
use crate::TARGET_BROWSER;

const LAUNCH_ARGS: [&str; 3] = [
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-dev-shm-usage",
];

/// Masks the two signals bot checks look at first.
const STEALTH_SCRIPT: &str = r#"
try {
  Object.defineProperty(navigator, 'webdriver', { get: () => false });
  Object.defineProperty(navigator, 'platform', { get: () => 'MacIntel' });
} catch (e) {}
"#;

const TARGET_ATTR: &str = "data-menuscope-target";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const IDLE_WINDOW: Duration = Duration::from_millis(500);
const CDP_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

async fn bounded<T, F>(what: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {:?}", what, limit)),
    }
}

/// Script that tags the first element matching `target` and returns whether it is visible.
fn locate_script(target: &ClickTarget) -> Result<String> {
    let kind = serde_json::to_string(target.kind.css())?;
    let needle = serde_json::to_string(&target.text.to_lowercase())?;
    Ok(format!(
        r#"(() => {{
  document.querySelectorAll('[{attr}]').forEach(el => el.removeAttribute('{attr}'));
  const el = Array.from(document.querySelectorAll({kind}))
    .find(e => (e.innerText || e.textContent || '').toLowerCase().includes({needle}));
  if (!el) return false;
  el.setAttribute('{attr}', '1');
  const rect = el.getBoundingClientRect();
  const style = window.getComputedStyle(el);
  return rect.width > 0 && rect.height > 0
    && style.visibility !== 'hidden' && style.display !== 'none';
}})()"#,
        attr = TARGET_ATTR,
        kind = kind,
        needle = needle
    ))
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn eval_value<T: serde::de::DeserializeOwned>(&self, expr: String) -> Result<T> {
        let value = self.page.evaluate(expr).await?.into_value::<T>()?;
        Ok(value)
    }

    async fn locate(&self, target: &ClickTarget) -> Result<bool> {
        self.eval_value(locate_script(target)?).await
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str, limit: Duration) -> Result<()> {
        bounded("Navigation", limit, async {
            let response = self.page.execute(NavigateParams::new(url)).await?;
            if let Some(error) = &response.result.error_text {
                bail!("Navigation to {} failed: {}", url, error);
            }
            // Wait for DOMContentLoaded only; full load may never come on busy pages.
            loop {
                match self.eval_value::<String>("document.readyState".into()).await {
                    Ok(state) if state != "loading" => return Ok(()),
                    Ok(_) => {}
                    Err(e) => debug!(target: TARGET_BROWSER, "readyState not available yet: {}", e),
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
    }

    async fn wait_for_network_idle(&self, limit: Duration) -> Result<()> {
        bounded("Network idle wait", limit, async {
            let mut last_count: Option<u64> = None;
            let mut quiet_since = Instant::now();
            loop {
                let (state, count): (String, u64) = self
                    .eval_value(
                        "[document.readyState, performance.getEntriesByType('resource').length]"
                            .into(),
                    )
                    .await
                    .unwrap_or_else(|_| ("loading".to_string(), 0));

                if state != "complete" || last_count != Some(count) {
                    last_count = Some(count);
                    quiet_since = Instant::now();
                } else if quiet_since.elapsed() >= IDLE_WINDOW {
                    return Ok(());
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
    }

    async fn is_visible(&self, target: &ClickTarget, limit: Duration) -> Result<bool> {
        bounded("Visibility check", limit, self.locate(target)).await
    }

    async fn click(&self, target: &ClickTarget, limit: Duration) -> Result<()> {
        bounded("Click", limit, async {
            if !self.locate(target).await? {
                bail!("{} is not visible", target);
            }
            let element = self
                .page
                .find_element(format!("[{}]", TARGET_ATTR))
                .await?;
            element.click().await?;
            Ok(())
        })
        .await
    }

    async fn set_location_hash(&self, hash: &str) -> Result<()> {
        let expr = format!("location.hash = {}", serde_json::to_string(hash)?);
        self.page.evaluate(expr).await?;
        Ok(())
    }

    async fn scroll_by(&self, dy: u32) -> Result<()> {
        self.page
            .evaluate(format!("window.scrollBy(0, {})", dy))
            .await?;
        Ok(())
    }

    async fn body_text(&self) -> Result<String> {
        self.eval_value("document.body ? document.body.innerText : ''".into())
            .await
    }

    async fn screenshot_full_page(&self) -> Result<Vec<u8>> {
        let png = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await?;
        Ok(png)
    }
}

/// One Chromium process with a throwaway profile directory.
pub struct ChromiumSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: ChromiumPage,
    profile_dir: PathBuf,
}

async fn shutdown(mut browser: Browser, handler: JoinHandle<()>, profile_dir: &Path) -> Result<()> {
    let closed = browser.close().await.map(|_| ());
    if let Err(e) = browser.wait().await {
        debug!(target: TARGET_BROWSER, "Browser process wait failed: {}", e);
    }
    handler.abort();
    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        debug!(target: TARGET_BROWSER, "Could not remove profile {}: {}", profile_dir.display(), e);
    }
    closed.context("Failed to close browser")
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> &dyn PageDriver {
        &self.page
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        match (self.browser.take(), self.handler.take()) {
            (Some(browser), Some(handler)) => shutdown(browser, handler, &self.profile_dir).await,
            _ => Ok(()),
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // Reached only when close() was skipped, e.g. on panic. Dropping the browser
        // kills its process.
        if self.browser.take().is_some() {
            warn!(target: TARGET_BROWSER, "Browser session dropped without close");
            if let Some(handler) = self.handler.take() {
                handler.abort();
            }
            let _ = std::fs::remove_dir_all(&self.profile_dir);
        }
    }
}

pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    profile_root: PathBuf,
}

impl ChromiumLauncher {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self {
            executable,
            profile_root: std::env::temp_dir().join("menuscope-profiles"),
        }
    }

    fn browser_config(&self, options: &SessionOptions, profile_dir: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport_width, options.viewport_height)
            .viewport(Viewport {
                width: options.viewport_width,
                height: options.viewport_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .user_data_dir(profile_dir)
            .request_timeout(CDP_REQUEST_TIMEOUT)
            .args(LAUNCH_ARGS);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }
        builder.build().map_err(|e| anyhow!("Invalid browser config: {}", e))
    }
}

async fn prepare_page(browser: &Browser, options: &SessionOptions) -> Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .context("Failed to open page")?;

    page.execute(SetUserAgentOverrideParams::new(options.user_agent.clone()))
        .await
        .context("Failed to set user agent")?;

    if let Err(e) = page
        .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
    {
        warn!(target: TARGET_BROWSER, "Startup script not installed: {}", e);
    }

    if let Some(geo) = options.geo {
        browser
            .execute(GrantPermissionsParams::new(vec![PermissionType::Geolocation]))
            .await
            .context("Failed to grant geolocation")?;
        page.execute(
            SetGeolocationOverrideParams::builder()
                .latitude(geo.latitude)
                .longitude(geo.longitude)
                .accuracy(1.0)
                .build(),
        )
        .await
        .context("Failed to set geolocation")?;
    }

    Ok(page)
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
        if options.engine != Engine::Chromium {
            bail!(
                "Engine '{}' cannot be driven over the DevTools protocol; use chromium",
                options.engine
            );
        }

        let profile_dir = self.profile_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .with_context(|| format!("Failed to create profile dir {}", profile_dir.display()))?;

        let config = self.browser_config(options, &profile_dir)?;
        let (browser, mut events) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!(target: TARGET_BROWSER, "CDP handler error: {}", e);
                }
            }
        });
        debug!(target: TARGET_BROWSER, "Launched browser with profile {}", profile_dir.display());

        match prepare_page(&browser, options).await {
            Ok(page) => Ok(Box::new(ChromiumSession {
                browser: Some(browser),
                handler: Some(handler),
                page: ChromiumPage { page },
                profile_dir,
            })),
            Err(e) => {
                if let Err(close_err) = shutdown(browser, handler, &profile_dir).await {
                    warn!(target: TARGET_BROWSER, "Cleanup after failed setup: {:#}", close_err);
                }
                Err(e)
            }
        }
    }
}
