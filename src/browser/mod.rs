//! Headless browser handling for menuscope.
//!
//! This module drives a single page from URL to full-page screenshot. The navigation
//! heuristics are written against the capability traits in `driver`, and `chromium`
//! provides the DevTools implementation used in production.

mod chromium;
mod driver;
mod navigation;
mod types;
mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use self::chromium::{ChromiumLauncher, ChromiumPage, ChromiumSession};
pub use self::driver::{BrowserLauncher, BrowserSession, PageDriver};
pub use self::navigation::{render_page, NavigationController, RenderedPage};
pub use self::types::*;
pub use self::util::*;
