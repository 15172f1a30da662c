use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::browser::{parse_target_url, ChromiumLauncher, Engine, GeoPoint, DEFAULT_TIMEOUT_MS};
use crate::environment::AppConfig;
use crate::extract::{ExtractionRequest, Extractor};
use crate::TARGET_WEB_REQUEST;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    extractor: Arc<Extractor>,
    default_model: String,
    limiter: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(extractor: Extractor, default_model: String, max_concurrent: Option<usize>) -> Self {
        Self {
            extractor: Arc::new(extractor),
            default_model,
            limiter: max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
        }
    }
}

/// Request payload for `POST /extract`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractBody {
    url: String,
    model: Option<String>,
    #[serde(default)]
    engine: Engine,
    /// `"lat,lon"`
    geo: Option<String>,
    headless: Option<bool>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthBody {
    pub ok: bool,
    pub version: String,
    pub git_hash: String,
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message,
        }),
    )
        .into_response()
}

fn invalid_request(message: String) -> Response {
    error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
}

/// Build the router; split out from the serve loop so tests can bind their own listener.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract))
        .with_state(state)
}

/// Main application loop, setting up and running the Axum-based API server.
pub async fn app_api_loop(config: &AppConfig) -> Result<()> {
    let launcher = ChromiumLauncher::new(config.chrome_executable.clone());
    let model = config.vision_client();
    info!(
        target: TARGET_WEB_REQUEST,
        "Using {} backend, default model {}",
        model.backend_name(),
        config.default_model
    );
    let extractor = Extractor::new(
        Arc::new(launcher),
        Arc::new(model),
        config.extractor_settings(),
    );
    let state = AppState::new(
        extractor,
        config.default_model.clone(),
        config.max_concurrent_extractions,
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(target: TARGET_WEB_REQUEST, "Server running on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .context("HTTP server stopped unexpectedly")?;

    Ok(())
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
    })
}

/// Validate the body into an extraction request.
fn build_request(body: ExtractBody, default_model: &str) -> Result<ExtractionRequest> {
    let url = parse_target_url(&body.url)?;
    let geo = body
        .geo
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .map(str::parse::<GeoPoint>)
        .transpose()?;

    Ok(ExtractionRequest {
        url,
        model: body
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_model.to_string()),
        engine: body.engine,
        headless: body.headless.unwrap_or(true),
        geo,
        timeout_ms: body.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
    })
}

async fn extract(
    State(state): State<AppState>,
    payload: Result<Json<ExtractBody>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!(target: TARGET_WEB_REQUEST, "extract", %request_id);

    async move {
        let body = match payload {
            Ok(Json(body)) => body,
            Err(rejection) => {
                warn!(target: TARGET_WEB_REQUEST, "Rejected request body: {}", rejection.body_text());
                return invalid_request(rejection.body_text());
            }
        };

        let request = match build_request(body, &state.default_model) {
            Ok(request) => request,
            Err(e) => {
                warn!(target: TARGET_WEB_REQUEST, "Invalid extract request: {:#}", e);
                return invalid_request(format!("{:#}", e));
            }
        };

        let _permit = match &state.limiter {
            Some(limiter) => match limiter.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    error!(target: TARGET_WEB_REQUEST, "Extraction limiter closed: {}", e);
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "extract_failed",
                        e.to_string(),
                    );
                }
            },
            None => None,
        };

        info!(
            target: TARGET_WEB_REQUEST,
            "Extracting {} with {} via {}", request.url, request.model, request.engine
        );
        match state.extractor.extract(&request).await {
            Ok(result) => {
                info!(
                    target: TARGET_WEB_REQUEST,
                    "Extracted {} item(s) from {} tile(s)",
                    result.items.len(),
                    result.meta.tile_count
                );
                (StatusCode::OK, Json(result)).into_response()
            }
            Err(e) => {
                error!(target: TARGET_WEB_REQUEST, "Extraction of {} failed: {:#}", request.url, e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "extract_failed",
                    format!("{:#}", e),
                )
            }
        }
    }
    .instrument(span)
    .await
}
