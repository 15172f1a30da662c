//! Type definitions and tuned constants for the browser module.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Duration;

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
pub const VIEWPORT_WIDTH: u32 = 1440;
pub const VIEWPORT_HEIGHT: u32 = 2000;

pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;
pub const MIN_CONTENT_CHARS: usize = 200;
pub const NO_PRODUCTS_PHRASE: &str = "doesn't currently have any products";

/// Browser engine requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Chromium => "chromium",
            Engine::Firefox => "firefox",
            Engine::Webkit => "webkit",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "chromium" => Ok(Engine::Chromium),
            "firefox" => Ok(Engine::Firefox),
            "webkit" => Ok(Engine::Webkit),
            other => Err(anyhow!("Unknown engine '{}'", other)),
        }
    }
}

/// Latitude and longitude for the geolocation override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl FromStr for GeoPoint {
    type Err = anyhow::Error;

    /// Parses `"lat,lon"`.
    fn from_str(s: &str) -> Result<Self> {
        let Some((lat, lon)) = s.split_once(',') else {
            bail!("Geo '{}' is not in 'lat,lon' form", s);
        };
        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid latitude in geo '{}'", s))?;
        let longitude: f64 = lon
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid longitude in geo '{}'", s))?;
        if !latitude.is_finite() || !longitude.is_finite() {
            bail!("Geo '{}' must be finite numbers", s);
        }
        Ok(GeoPoint {
            latitude,
            longitude,
        })
    }
}

/// What a browser session needs before the first navigation.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub engine: Engine,
    pub headless: bool,
    pub geo: Option<GeoPoint>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
}

impl SessionOptions {
    pub fn new(engine: Engine, headless: bool, geo: Option<GeoPoint>) -> Self {
        Self {
            engine,
            headless,
            geo,
            viewport_width: VIEWPORT_WIDTH,
            viewport_height: VIEWPORT_HEIGHT,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Element kinds the heuristics look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Link,
    Button,
}

impl ElementKind {
    pub fn css(&self) -> &'static str {
        match self {
            ElementKind::Link => "a",
            ElementKind::Button => "button",
        }
    }
}

/// First element of `kind` whose rendered text contains `text`, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickTarget {
    pub kind: ElementKind,
    pub text: String,
}

impl ClickTarget {
    pub fn link(text: &str) -> Self {
        Self {
            kind: ElementKind::Link,
            text: text.to_string(),
        }
    }

    pub fn button(text: &str) -> Self {
        Self {
            kind: ElementKind::Button,
            text: text.to_string(),
        }
    }
}

impl fmt::Display for ClickTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:has-text(\"{}\")", self.kind.css(), self.text)
    }
}

/// Scroll budget for one progressive reveal pass.
#[derive(Debug, Clone, Copy)]
pub struct ScrollPlan {
    pub step_px: u32,
    pub pause: Duration,
    pub steps: u32,
}

/// Timing, heuristics and thresholds for one navigation run.
#[derive(Debug, Clone)]
pub struct NavigationConfig {
    pub navigation_timeout: Duration,
    pub initial_idle_timeout: Duration,
    pub settle_idle_timeout: Duration,
    pub fallback_navigation_timeout: Duration,

    pub coax_targets: Vec<ClickTarget>,
    pub coax_visible_timeout: Duration,
    pub coax_click_timeout: Duration,
    pub coax_pause: Duration,
    pub hash_settle: Duration,
    pub scroll: ScrollPlan,

    pub min_content_chars: usize,
    pub no_content_phrases: Vec<String>,

    pub fallback_targets: Vec<ClickTarget>,
    pub fallback_visible_timeout: Duration,
    pub fallback_click_timeout: Duration,
    pub fallback_pause: Duration,
    pub fallback_scroll: ScrollPlan,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            initial_idle_timeout: Duration::from_secs(30),
            settle_idle_timeout: Duration::from_secs(20),
            fallback_navigation_timeout: Duration::from_secs(60),

            coax_targets: vec![
                ClickTarget::link("Order Now"),
                ClickTarget::button("Order Now"),
                ClickTarget::button("Start order"),
                ClickTarget::button("Pickup"),
                ClickTarget::button("Delivery"),
                ClickTarget::button("ASAP"),
                ClickTarget::button("Continue"),
            ],
            coax_visible_timeout: Duration::from_millis(600),
            coax_click_timeout: Duration::from_millis(1500),
            coax_pause: Duration::from_millis(400),
            hash_settle: Duration::from_millis(800),
            scroll: ScrollPlan {
                step_px: 1000,
                pause: Duration::from_millis(300),
                steps: 80,
            },

            min_content_chars: MIN_CONTENT_CHARS,
            no_content_phrases: vec![NO_PRODUCTS_PHRASE.to_string()],

            fallback_targets: vec![
                ClickTarget::link("Order Online"),
                ClickTarget::link("Order"),
                ClickTarget::link("Menu"),
                ClickTarget::button("Order Online"),
                ClickTarget::button("Order"),
                ClickTarget::button("Menu"),
            ],
            fallback_visible_timeout: Duration::from_millis(1200),
            fallback_click_timeout: Duration::from_millis(2000),
            fallback_pause: Duration::from_millis(600),
            fallback_scroll: ScrollPlan {
                step_px: 1000,
                pause: Duration::from_millis(250),
                steps: 50,
            },
        }
    }
}

/// Result of one best-effort browser step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    Skipped(String),
}

/// Result of one click attempt against a heuristic target.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Clicked,
    NotVisible,
    /// The visibility check itself errored, so the element was never seen.
    ProbeFailed(String),
    /// The element was visible but the click did not go through.
    ClickFailed(String),
}

/// What the navigation controller did on its way to the capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationReport {
    pub prompts_clicked: Vec<String>,
    pub fragment_activated: bool,
    pub fallback_used: bool,
    pub fallback_clicked: Option<String>,
    pub skipped_steps: usize,
}
