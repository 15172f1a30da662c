//! Capability traits the navigation logic is written against.

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Duration;

use super::types::{ClickTarget, SessionOptions};

/// The page operations navigation needs. Implementations bound their own calls by the
/// timeouts passed in and report failure through `Err`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and return once the DOM has been constructed.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until network activity settles. `Err` on timeout.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    /// Locate the first element matching `target` and report whether it is visible.
    async fn is_visible(&self, target: &ClickTarget, timeout: Duration) -> Result<bool>;

    /// Click the first element matching `target`.
    async fn click(&self, target: &ClickTarget, timeout: Duration) -> Result<()>;

    /// Assign `location.hash` in page context.
    async fn set_location_hash(&self, hash: &str) -> Result<()>;

    async fn scroll_by(&self, dy: u32) -> Result<()>;

    /// Rendered text of the document body.
    async fn body_text(&self) -> Result<String>;

    /// PNG of the whole scrollable page.
    async fn screenshot_full_page(&self) -> Result<Vec<u8>>;
}

/// One isolated browser process with a single page.
#[async_trait]
pub trait BrowserSession: Send {
    fn page(&self) -> &dyn PageDriver;

    /// Tear down the page, the browser process and any per-session state.
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>>;
}
