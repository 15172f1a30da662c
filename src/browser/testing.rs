//! In-memory stand-ins for the browser capability traits.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

use super::driver::{BrowserLauncher, BrowserSession, PageDriver};
use super::types::{ClickTarget, NavigationConfig, ScrollPlan, SessionOptions};

#[derive(Debug, Clone, PartialEq)]
pub enum PageCall {
    Goto(String),
    NetworkIdle,
    IsVisible(String),
    Click(String),
    SetHash(String),
    ScrollBy(u32),
    BodyText,
    Screenshot,
}

/// Navigation config with every pause zeroed and a short scroll budget.
pub fn instant_config() -> NavigationConfig {
    let mut config = NavigationConfig::default();
    config.coax_pause = Duration::ZERO;
    config.hash_settle = Duration::ZERO;
    config.fallback_pause = Duration::ZERO;
    config.scroll = ScrollPlan {
        step_px: 1000,
        pause: Duration::ZERO,
        steps: 3,
    };
    config.fallback_scroll = ScrollPlan {
        step_px: 1000,
        pause: Duration::ZERO,
        steps: 2,
    };
    config
}

pub fn png_of_height(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |_, y| Rgba([0, (y % 256) as u8, 0, 255]));
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode test png");
    buf.into_inner()
}

#[derive(Clone)]
pub struct FakePage {
    text: String,
    visible: HashSet<String>,
    unprobeable: HashSet<String>,
    fail_visibility: bool,
    capture: Vec<u8>,
    fail_clicks: bool,
    fail_navigation: bool,
    fail_idle: bool,
    fail_screenshot: bool,
    calls: Arc<Mutex<Vec<PageCall>>>,
}

impl FakePage {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            visible: HashSet::new(),
            unprobeable: HashSet::new(),
            fail_visibility: false,
            capture: png_of_height(16, 40),
            fail_clicks: false,
            fail_navigation: false,
            fail_idle: false,
            fail_screenshot: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Mark a target (in its `Display` form) as visible.
    pub fn visible(mut self, target: &str) -> Self {
        self.visible.insert(target.to_string());
        self
    }

    /// Make the visibility check for one target error instead of answering.
    pub fn visibility_error(mut self, target: &str) -> Self {
        self.unprobeable.insert(target.to_string());
        self
    }

    pub fn failing_visibility(mut self) -> Self {
        self.fail_visibility = true;
        self
    }

    pub fn capture(mut self, png: Vec<u8>) -> Self {
        self.capture = png;
        self
    }

    pub fn failing_clicks(mut self) -> Self {
        self.fail_clicks = true;
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn failing_idle(mut self) -> Self {
        self.fail_idle = true;
        self
    }

    pub fn failing_screenshot(mut self) -> Self {
        self.fail_screenshot = true;
        self
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: PageCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.log(PageCall::Goto(url.to_string()));
        if self.fail_navigation {
            bail!("net::ERR_TIMED_OUT");
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        self.log(PageCall::NetworkIdle);
        if self.fail_idle {
            bail!("Timed out waiting for network idle");
        }
        Ok(())
    }

    async fn is_visible(&self, target: &ClickTarget, _timeout: Duration) -> Result<bool> {
        let key = target.to_string();
        self.log(PageCall::IsVisible(key.clone()));
        if self.fail_visibility || self.unprobeable.contains(&key) {
            bail!("Execution context was destroyed");
        }
        Ok(self.visible.contains(&key))
    }

    async fn click(&self, target: &ClickTarget, _timeout: Duration) -> Result<()> {
        self.log(PageCall::Click(target.to_string()));
        if self.fail_clicks {
            bail!("Element is detached from the DOM");
        }
        Ok(())
    }

    async fn set_location_hash(&self, hash: &str) -> Result<()> {
        self.log(PageCall::SetHash(hash.to_string()));
        Ok(())
    }

    async fn scroll_by(&self, dy: u32) -> Result<()> {
        self.log(PageCall::ScrollBy(dy));
        Ok(())
    }

    async fn body_text(&self) -> Result<String> {
        self.log(PageCall::BodyText);
        Ok(self.text.clone())
    }

    async fn screenshot_full_page(&self) -> Result<Vec<u8>> {
        self.log(PageCall::Screenshot);
        if self.fail_screenshot {
            return Err(anyhow!("Target closed"));
        }
        Ok(self.capture.clone())
    }
}

struct FakeSession {
    page: FakePage,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn page(&self) -> &dyn PageDriver {
        &self.page
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    page: Option<FakePage>,
    launched: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page: Some(page),
            launched: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            page: None,
            launched: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launched_sessions(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
        let Some(page) = self.page.clone() else {
            bail!("Could not find a Chrome executable");
        };
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            page,
            closed: Arc::clone(&self.closed),
        }))
    }
}
