//! Run one menu extraction from the command line and print the result as JSON.
//!
//! Uses the same environment configuration as the server (`OPENAI_API_KEY` or
//! `OLLAMA_HOST`, `CHROME_EXECUTABLE`, ...); flags override it for this run.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use menuscope::browser::{parse_target_url, ChromiumLauncher, Engine, GeoPoint, DEFAULT_TIMEOUT_MS};
use menuscope::environment::AppConfig;
use menuscope::extract::{ExtractionRequest, Extractor};
use menuscope::logging::configure_logging;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Page to extract the menu from
    #[arg(short, long)]
    url: String,

    /// Vision model; defaults to DEFAULT_MODEL or gpt-4o-mini
    #[arg(short, long)]
    model: Option<String>,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(short, long, default_value = "chromium")]
    engine: Engine,

    /// Geolocation override as "lat,lon"
    #[arg(short, long)]
    geo: Option<GeoPoint>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Navigation timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Override TILE_HEIGHT for this run
    #[arg(long)]
    tile_height: Option<u32>,

    /// Override MAX_IMAGES_PER_REQUEST for this run
    #[arg(long)]
    max_images_per_request: Option<usize>,

    /// Write the full-page capture to this PNG file
    #[arg(long)]
    save_capture: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();
    let args = Args::parse();
    let config = AppConfig::from_env()?;

    let mut settings = config.extractor_settings();
    if let Some(tile_height) = args.tile_height.filter(|h| *h > 0) {
        settings.tile_height = tile_height;
    }
    if let Some(max_images) = args.max_images_per_request {
        settings.max_images_per_request = Some(max_images).filter(|n| *n > 0);
    }

    let vision = config.vision_client();
    info!(
        "Using {} backend (temperature {}, {} attempt(s) per call)",
        vision.backend_name(),
        vision.temperature(),
        vision.retry_policy().max_retries
    );

    let extractor = Extractor::new(
        Arc::new(ChromiumLauncher::new(config.chrome_executable.clone())),
        Arc::new(vision),
        settings,
    );

    let request = ExtractionRequest {
        url: parse_target_url(&args.url)?,
        model: args.model.unwrap_or_else(|| config.default_model.clone()),
        engine: args.engine,
        headless: !args.headful,
        geo: args.geo,
        timeout_ms: args.timeout_ms,
    };

    let rendered = extractor.capture(&request).await?;
    info!(
        "Rendered {} (prompts clicked: {}, fallback used: {})",
        request.url,
        rendered.report.prompts_clicked.len(),
        rendered.report.fallback_used
    );
    if let Some(path) = &args.save_capture {
        tokio::fs::write(path, &rendered.png)
            .await
            .with_context(|| format!("Failed to write capture to {}", path.display()))?;
        info!("Capture saved to {}", path.display());
    }

    let result = extractor.extract_from_capture(&request, &rendered.png).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
