//! End-to-end extraction: render, tile, infer, normalize.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::browser::{
    render_page, BrowserLauncher, Engine, GeoPoint, NavigationConfig, RenderedPage,
    SessionOptions, DEFAULT_TIMEOUT_MS,
};
use crate::llm::{VisionModel, DEFAULT_MODEL};
use crate::normalize::{normalize_responses, CanonicalItem};
use crate::prompts::menu_parser_prompt;
use crate::tiler::{split_capture, ImageTile, PageCapture, DEFAULT_TILE_HEIGHT};
use crate::TARGET_LLM_REQUEST;

/// Everything one extraction run needs to know about its target.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub url: Url,
    pub model: String,
    pub engine: Engine,
    pub headless: bool,
    pub geo: Option<GeoPoint>,
    pub timeout_ms: u64,
}

impl ExtractionRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            model: DEFAULT_MODEL.to_string(),
            engine: Engine::default(),
            headless: true,
            geo: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMeta {
    #[serde(rename = "chunks")]
    pub tile_count: usize,
    pub engine: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub items: Vec<CanonicalItem>,
    pub meta: ExtractionMeta,
}

/// Knobs shared by every request an extractor serves.
#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub tile_height: u32,
    /// Images per inference call; `None` sends every tile in one call.
    pub max_images_per_request: Option<usize>,
    pub navigation: NavigationConfig,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            tile_height: DEFAULT_TILE_HEIGHT,
            max_images_per_request: None,
            navigation: NavigationConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct Extractor {
    launcher: Arc<dyn BrowserLauncher>,
    model: Arc<dyn VisionModel>,
    settings: ExtractorSettings,
}

impl Extractor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        model: Arc<dyn VisionModel>,
        settings: ExtractorSettings,
    ) -> Self {
        Self {
            launcher,
            model,
            settings,
        }
    }

    /// Render the request's page to a full-page PNG in a fresh browser session.
    pub async fn capture(&self, request: &ExtractionRequest) -> Result<RenderedPage> {
        let mut navigation = self.settings.navigation.clone();
        navigation.navigation_timeout = Duration::from_millis(request.timeout_ms);
        let options = SessionOptions::new(request.engine, request.headless, request.geo);

        render_page(self.launcher.as_ref(), &options, &request.url, &navigation).await
    }

    /// Tile a capture, run inference over the tiles and normalize the answer.
    pub async fn extract_from_capture(
        &self,
        request: &ExtractionRequest,
        png: &[u8],
    ) -> Result<ExtractionResult> {
        let capture = PageCapture::from_png(png)?;
        let tiles = split_capture(&capture, self.settings.tile_height)?;
        info!(
            target: TARGET_LLM_REQUEST,
            "Capture {}x{} split into {} tile(s)",
            capture.width(),
            capture.height(),
            tiles.len()
        );

        let responses = self.infer_batches(&request.model, &tiles).await?;
        let items = normalize_responses(&responses);
        info!(target: TARGET_LLM_REQUEST, "Extracted {} item(s) from {}", items.len(), request.url);

        Ok(ExtractionResult {
            items,
            meta: ExtractionMeta {
                tile_count: tiles.len(),
                engine: request.engine.to_string(),
                model: request.model.clone(),
            },
        })
    }

    pub async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        let rendered = self.capture(request).await?;
        self.extract_from_capture(request, &rendered.png).await
    }

    /// One inference call per batch of tiles, in reading order.
    async fn infer_batches(&self, model: &str, tiles: &[ImageTile]) -> Result<Vec<String>> {
        let batch_size = self
            .settings
            .max_images_per_request
            .filter(|n| *n > 0)
            .unwrap_or(tiles.len())
            .max(1);
        let batches: Vec<&[ImageTile]> = tiles.chunks(batch_size).collect();

        let mut responses = Vec::with_capacity(batches.len());
        for (index, batch) in batches.iter().enumerate() {
            debug!(
                target: TARGET_LLM_REQUEST,
                "Inference batch {}/{} with {} image(s)",
                index + 1,
                batches.len(),
                batch.len()
            );
            let instruction = menu_parser_prompt(index, batches.len());
            let response = self
                .model
                .infer(model, &instruction, batch)
                .await
                .with_context(|| format!("Inference failed for batch {}", index + 1))?;
            responses.push(response);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{instant_config, png_of_height, FakeLauncher, FakePage};
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns canned responses in order and records what it was sent.
    struct ScriptedModel {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: Mutex<Vec<(String, Vec<u32>)>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Vec<u32>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn infer(&self, model: &str, _instruction: &str, tiles: &[ImageTile]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), tiles.iter().map(|t| t.top).collect()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                bail!("no scripted response left");
            }
            match responses.remove(0) {
                Ok(body) => Ok(body),
                Err(message) => bail!(message),
            }
        }
    }

    fn settings(max_images_per_request: Option<usize>) -> ExtractorSettings {
        ExtractorSettings {
            tile_height: 2800,
            max_images_per_request,
            navigation: instant_config(),
        }
    }

    fn tall_page() -> FakePage {
        FakePage::with_text(&"Espresso drinks and pastries. ".repeat(20))
            .capture(png_of_height(8, 5000))
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest::new(Url::parse("https://cafe.example.com/order").unwrap())
    }

    #[tokio::test]
    async fn test_two_tiles_merge_into_deduplicated_items() {
        let model = ScriptedModel::new(vec![
            Ok(json!({"items": [
                {"item": "Latte", "size": "12 oz", "price": 4.25, "currency": "USD"}
            ]})
            .to_string()),
            Ok(json!({"items": [
                {"item": "Latte", "size": "12 oz", "price": 4.25, "currency": "USD"},
                {"item": "Mocha", "size": "12 oz", "price": 4.75}
            ]})
            .to_string()),
        ]);
        let launcher = Arc::new(FakeLauncher::new(tall_page()));
        let extractor = Extractor::new(launcher.clone(), model.clone(), settings(Some(1)));

        let result = extractor.extract(&request()).await.unwrap();

        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].item, "Latte");
        assert_eq!(result.items[0].size, "12 oz");
        assert_eq!(result.items[0].price, 4.25);
        assert_eq!(result.items[0].currency, "USD");
        assert_eq!(result.items[1].item, "Mocha");
        assert_eq!(result.items[1].price, 4.75);
        assert_eq!(result.items[1].currency, "");
        assert_eq!(
            result.meta,
            ExtractionMeta {
                tile_count: 2,
                engine: "chromium".into(),
                model: "gpt-4o-mini".into(),
            }
        );
        assert_eq!(
            model.calls(),
            vec![("gpt-4o-mini".to_string(), vec![0]), ("gpt-4o-mini".to_string(), vec![2800])]
        );
        assert_eq!(launcher.launched_sessions(), 1);
        assert_eq!(launcher.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_all_tiles_sent_in_one_call_by_default() {
        let model = ScriptedModel::new(vec![Ok(r#"{"items": []}"#.to_string())]);
        let extractor = Extractor::new(
            Arc::new(FakeLauncher::new(tall_page())),
            model.clone(),
            settings(None),
        );

        let result = extractor.extract(&request()).await.unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.meta.tile_count, 2);
        assert_eq!(model.calls(), vec![("gpt-4o-mini".to_string(), vec![0, 2800])]);
    }

    #[tokio::test]
    async fn test_garbled_model_output_yields_no_items() {
        let model = ScriptedModel::new(vec![Ok("Sorry, I can't read this menu.".to_string())]);
        let extractor = Extractor::new(
            Arc::new(FakeLauncher::new(tall_page())),
            model,
            settings(None),
        );
        let result = extractor.extract(&request()).await.unwrap();
        assert!(result.items.is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_aborts_request() {
        let model = ScriptedModel::new(vec![Err("insufficient_quota".to_string())]);
        let launcher = Arc::new(FakeLauncher::new(tall_page()));
        let extractor = Extractor::new(launcher.clone(), model, settings(None));

        let err = extractor.extract(&request()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("insufficient_quota"));
        assert_eq!(launcher.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_capture_is_fatal() {
        let page = FakePage::with_text(&"menu ".repeat(100)).capture(b"not a png".to_vec());
        let extractor = Extractor::new(
            Arc::new(FakeLauncher::new(page)),
            ScriptedModel::new(vec![]),
            settings(None),
        );
        assert!(extractor.extract(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_request_engine_and_model_reported() {
        let model = ScriptedModel::new(vec![Ok(r#"{"items": []}"#.to_string())]);
        let extractor = Extractor::new(
            Arc::new(FakeLauncher::new(FakePage::with_text(&"menu ".repeat(100)))),
            model,
            settings(None),
        );
        let mut request = request();
        request.model = "llava:13b".to_string();
        request.engine = Engine::Webkit;

        let result = extractor.extract(&request).await.unwrap();
        assert_eq!(result.meta.engine, "webkit");
        assert_eq!(result.meta.model, "llava:13b");
        assert_eq!(result.meta.tile_count, 1);
    }
}
