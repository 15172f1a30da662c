//! The load, coax, reveal, verify and fallback sequence that turns a URL into one
//! full-page capture.
//!
//! Every step between navigation and capture is best-effort. A missing button or a page
//! that never goes quiet is logged and skipped so that a capture is still taken. Only
//! session setup and the screenshot itself can fail the run.

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::driver::{BrowserLauncher, PageDriver};
use super::types::{
    ClickOutcome, ClickTarget, NavigationConfig, NavigationReport, ScrollPlan, SessionOptions,
    StepOutcome,
};
use super::util::{is_content_sufficient, root_origin, split_fragment};
use crate::TARGET_BROWSER;

/// The screenshot plus a record of how it was reached.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub png: Vec<u8>,
    pub report: NavigationReport,
}

/// Drives a single page through the heuristics. Never fails; see [`render_page`].
pub struct NavigationController<'a> {
    page: &'a dyn PageDriver,
    config: &'a NavigationConfig,
    report: NavigationReport,
}

impl<'a> NavigationController<'a> {
    pub fn new(page: &'a dyn PageDriver, config: &'a NavigationConfig) -> Self {
        Self {
            page,
            config,
            report: NavigationReport::default(),
        }
    }

    /// Run navigation through the optional fallback, leaving the page ready to capture.
    pub async fn run(mut self, url: &Url) -> NavigationReport {
        let (base_url, hash) = split_fragment(url);

        info!(target: TARGET_BROWSER, "Navigating to {}", base_url);
        let navigated = self
            .page
            .goto(base_url.as_str(), self.config.navigation_timeout)
            .await;
        self.record("initial navigation", navigated);
        self.wait_for_idle(self.config.initial_idle_timeout).await;

        self.coax().await;

        if let Some(hash) = hash {
            debug!(target: TARGET_BROWSER, "Activating client-side route {}", hash);
            let activated = self.page.set_location_hash(&hash).await;
            self.report.fragment_activated =
                self.record("fragment activation", activated) == StepOutcome::Completed;
            sleep(self.config.hash_settle).await;
            self.coax().await;
        }

        self.progressive_reveal(self.config.scroll).await;
        self.wait_for_idle(self.config.settle_idle_timeout).await;

        if !self.has_sufficient_content().await {
            self.fallback(url).await;
        }

        self.report
    }

    fn record(&mut self, step: &str, result: Result<()>) -> StepOutcome {
        match result {
            Ok(()) => StepOutcome::Completed,
            Err(e) => {
                debug!(target: TARGET_BROWSER, "Skipping {}: {:#}", step, e);
                self.report.skipped_steps += 1;
                StepOutcome::Skipped(e.to_string())
            }
        }
    }

    async fn wait_for_idle(&mut self, timeout: tokio::time::Duration) -> StepOutcome {
        let idle = self.page.wait_for_network_idle(timeout).await;
        self.record("network idle wait", idle)
    }

    async fn click_target(
        &self,
        target: &ClickTarget,
        visible_timeout: tokio::time::Duration,
        click_timeout: tokio::time::Duration,
    ) -> ClickOutcome {
        match self.page.is_visible(target, visible_timeout).await {
            Ok(true) => {}
            Ok(false) => return ClickOutcome::NotVisible,
            Err(e) => return ClickOutcome::ProbeFailed(format!("{:#}", e)),
        }
        match self.page.click(target, click_timeout).await {
            Ok(()) => ClickOutcome::Clicked,
            Err(e) => ClickOutcome::ClickFailed(format!("{:#}", e)),
        }
    }

    /// Click every visible interstitial prompt, in priority order.
    async fn coax(&mut self) {
        let config = self.config;
        for target in &config.coax_targets {
            let outcome = self
                .click_target(target, config.coax_visible_timeout, config.coax_click_timeout)
                .await;
            match outcome {
                ClickOutcome::NotVisible => continue,
                ClickOutcome::ProbeFailed(reason) => {
                    debug!(target: TARGET_BROWSER, "Could not check prompt {}: {}", target, reason);
                    self.report.skipped_steps += 1;
                    continue;
                }
                ClickOutcome::Clicked => {
                    debug!(target: TARGET_BROWSER, "Clicked prompt {}", target);
                    self.report.prompts_clicked.push(target.to_string());
                }
                ClickOutcome::ClickFailed(reason) => {
                    // A located element that rejects the click still gets the pause.
                    debug!(target: TARGET_BROWSER, "Prompt {} failed: {}", target, reason);
                    self.report.skipped_steps += 1;
                }
            }
            sleep(config.coax_pause).await;
        }
    }

    async fn progressive_reveal(&mut self, plan: ScrollPlan) {
        for step in 0..plan.steps {
            if let Err(e) = self.page.scroll_by(plan.step_px).await {
                debug!(target: TARGET_BROWSER, "Scrolling stopped at step {}: {:#}", step, e);
                self.report.skipped_steps += 1;
                return;
            }
            sleep(plan.pause).await;
        }
    }

    async fn has_sufficient_content(&mut self) -> bool {
        let text = match self.page.body_text().await {
            Ok(text) => text,
            Err(e) => {
                debug!(target: TARGET_BROWSER, "Could not read page text: {:#}", e);
                self.report.skipped_steps += 1;
                String::new()
            }
        };
        let sufficient = is_content_sufficient(
            &text,
            self.config.min_content_chars,
            &self.config.no_content_phrases,
        );
        debug!(
            target: TARGET_BROWSER,
            "Page text is {} chars, sufficient: {}",
            text.chars().count(),
            sufficient
        );
        sufficient
    }

    /// Retry from the site root and follow the first visible order or menu link.
    async fn fallback(&mut self, url: &Url) {
        let config = self.config;
        let root = root_origin(url);
        info!(target: TARGET_BROWSER, "Insufficient content, falling back to {}", root);
        self.report.fallback_used = true;

        let navigated = self
            .page
            .goto(&root, config.fallback_navigation_timeout)
            .await;
        self.record("fallback navigation", navigated);
        self.wait_for_idle(config.settle_idle_timeout).await;

        for target in &config.fallback_targets {
            let outcome = self
                .click_target(
                    target,
                    config.fallback_visible_timeout,
                    config.fallback_click_timeout,
                )
                .await;
            match outcome {
                ClickOutcome::NotVisible => continue,
                ClickOutcome::ProbeFailed(reason) => {
                    debug!(target: TARGET_BROWSER, "Could not check {}: {}", target, reason);
                    self.report.skipped_steps += 1;
                    continue;
                }
                ClickOutcome::Clicked => {
                    debug!(target: TARGET_BROWSER, "Followed {}", target);
                    self.report.fallback_clicked = Some(target.to_string());
                }
                ClickOutcome::ClickFailed(reason) => {
                    debug!(target: TARGET_BROWSER, "Fallback {} failed: {}", target, reason);
                    self.report.skipped_steps += 1;
                }
            }
            sleep(config.fallback_pause).await;
            break;
        }

        self.progressive_reveal(config.fallback_scroll).await;
    }
}

/// Open a session, navigate, capture, and always close the session.
///
/// Errors only when the session cannot be created or the screenshot fails.
pub async fn render_page(
    launcher: &dyn BrowserLauncher,
    options: &SessionOptions,
    url: &Url,
    config: &NavigationConfig,
) -> Result<RenderedPage> {
    let session = launcher
        .launch(options)
        .await
        .with_context(|| format!("Failed to set up {} browser session", options.engine))?;

    let report = NavigationController::new(session.page(), config)
        .run(url)
        .await;
    let screenshot = session.page().screenshot_full_page().await;

    if let Err(e) = session.close().await {
        warn!(target: TARGET_BROWSER, "Failed to close browser session cleanly: {:#}", e);
    }

    let png = screenshot.context("Failed to capture page screenshot")?;
    info!(
        target: TARGET_BROWSER,
        "Captured {} bytes (prompts clicked: {}, fallback: {}, skipped steps: {})",
        png.len(),
        report.prompts_clicked.len(),
        report.fallback_used,
        report.skipped_steps
    );

    Ok(RenderedPage { png, report })
}
