use anyhow::{bail, Context, Result};
use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use ollama_rs::Ollama;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;
use tracing::info;

use crate::browser::NavigationConfig;
use crate::extract::ExtractorSettings;
use crate::llm::{RetryPolicy, VisionClient, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::tiler::DEFAULT_TILE_HEIGHT;
use crate::LLMClient;

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// Empty segments are dropped, so an unset variable yields an empty vector.
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an optional environment variable, failing loudly on a malformed value.
fn parse_env_var<T>(var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", value, var, e)),
        _ => Ok(None),
    }
}

/// Which inference backend to talk to.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Ollama { host: String, port: u16 },
    OpenAI { api_key: String },
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Ollama { .. } => "ollama",
            BackendConfig::OpenAI { .. } => "openai",
        }
    }

    pub fn build_client(&self) -> LLMClient {
        match self {
            BackendConfig::Ollama { host, port } => {
                LLMClient::Ollama(Ollama::new(host.clone(), *port))
            }
            BackendConfig::OpenAI { api_key } => {
                let config = OpenAIConfig::new().with_api_key(api_key.clone());
                LLMClient::OpenAI(OpenAIClient::with_config(config))
            }
        }
    }
}

/// Process-wide settings for the server and the CLI.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backend: BackendConfig,
    pub default_model: String,
    pub temperature: f32,
    pub retry: RetryPolicy,
    pub tile_height: u32,
    pub max_images_per_request: Option<usize>,
    pub min_content_chars: Option<usize>,
    pub no_content_phrases: Vec<String>,
    pub chrome_executable: Option<PathBuf>,
    pub max_concurrent_extractions: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let backend = if let Ok(host) = env::var("OLLAMA_HOST") {
            let host = if host.contains("://") {
                host
            } else {
                format!("http://{}", host)
            };
            let port = parse_env_var::<u16>("OLLAMA_PORT")?.unwrap_or(11434);
            BackendConfig::Ollama { host, port }
        } else if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            BackendConfig::OpenAI { api_key }
        } else {
            bail!("No inference backend configured: set OPENAI_API_KEY or OLLAMA_HOST");
        };

        let tile_height = parse_env_var::<u32>("TILE_HEIGHT")?.unwrap_or(DEFAULT_TILE_HEIGHT);
        if tile_height == 0 {
            bail!("TILE_HEIGHT must be greater than zero");
        }

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = parse_env_var::<u32>("LLM_MAX_RETRIES")? {
            retry.max_retries = max_retries.max(1);
        }
        if let Some(secs) = parse_env_var::<u64>("LLM_REQUEST_TIMEOUT_SECS")? {
            retry.request_timeout = Duration::from_secs(secs.max(1));
        }

        let config = AppConfig {
            port: parse_env_var("PORT")?.unwrap_or(8080),
            backend,
            default_model: env::var("DEFAULT_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_env_var("LLM_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
            retry,
            tile_height,
            max_images_per_request: parse_env_var::<usize>("MAX_IMAGES_PER_REQUEST")?
                .filter(|n| *n > 0),
            min_content_chars: parse_env_var("MIN_CONTENT_CHARS")?,
            no_content_phrases: get_env_var_as_vec("NO_CONTENT_PHRASES", ';'),
            chrome_executable: env::var("CHROME_EXECUTABLE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            max_concurrent_extractions: parse_env_var::<usize>("MAX_CONCURRENT_EXTRACTIONS")
                .context("MAX_CONCURRENT_EXTRACTIONS must be a positive integer")?
                .filter(|n| *n > 0),
        };

        info!(
            "Configuration loaded: backend={}, default_model={}, tile_height={}",
            config.backend.name(),
            config.default_model,
            config.tile_height
        );
        Ok(config)
    }

    /// Vision client for the configured backend, temperature and retry policy.
    pub fn vision_client(&self) -> VisionClient {
        VisionClient::new(self.backend.build_client())
            .with_temperature(self.temperature)
            .with_retry_policy(self.retry.clone())
    }

    /// Extractor settings derived from this configuration.
    pub fn extractor_settings(&self) -> ExtractorSettings {
        let mut navigation = NavigationConfig::default();
        if let Some(min_chars) = self.min_content_chars {
            navigation.min_content_chars = min_chars;
        }
        if !self.no_content_phrases.is_empty() {
            navigation.no_content_phrases = self.no_content_phrases.clone();
        }
        ExtractorSettings {
            tile_height: self.tile_height,
            max_images_per_request: self.max_images_per_request,
            navigation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_as_vec_trims_and_drops_empty() {
        env::set_var("MENUSCOPE_TEST_PHRASES", " coming soon ; ;closed today;");
        assert_eq!(
            get_env_var_as_vec("MENUSCOPE_TEST_PHRASES", ';'),
            vec!["coming soon".to_string(), "closed today".to_string()]
        );
        env::remove_var("MENUSCOPE_TEST_PHRASES");
        assert!(get_env_var_as_vec("MENUSCOPE_TEST_PHRASES", ';').is_empty());
    }

    #[test]
    fn test_parse_env_var_rejects_garbage() {
        env::set_var("MENUSCOPE_TEST_NUMBER", "twelve");
        assert!(parse_env_var::<u32>("MENUSCOPE_TEST_NUMBER").is_err());
        env::set_var("MENUSCOPE_TEST_NUMBER", " 12 ");
        assert_eq!(parse_env_var::<u32>("MENUSCOPE_TEST_NUMBER").unwrap(), Some(12));
        env::remove_var("MENUSCOPE_TEST_NUMBER");
        assert_eq!(parse_env_var::<u32>("MENUSCOPE_TEST_NUMBER").unwrap(), None);
    }

    #[test]
    fn test_extractor_settings_override_navigation_defaults() -> Result<()> {
        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = parse_env_var::<u32>("LLM_MAX_RETRIES")? {
            retry.max_retries = max_retries.max(1);
        }
        if let Some(secs) = parse_env_var::<u64>("LLM_REQUEST_TIMEOUT_SECS")? {
            retry.request_timeout = Duration::from_secs(secs.max(1));
        }

        let config = AppConfig {
            port: 8080,
            backend: BackendConfig::OpenAI {
                api_key: "sk-test".to_string(),
            },
            default_model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            retry: RetryPolicy::default(),
            tile_height: 1400,
            max_images_per_request: Some(4),
            min_content_chars: Some(50),
            no_content_phrases: vec!["temporarily closed".to_string()],
            chrome_executable: None,
            max_concurrent_extractions: None,
        };
        let settings = config.extractor_settings();
        assert_eq!(settings.tile_height, 1400);
        assert_eq!(settings.max_images_per_request, Some(4));
        assert_eq!(settings.navigation.min_content_chars, 50);
        assert_eq!(
            settings.navigation.no_content_phrases,
            vec!["temporarily closed".to_string()]
        );
        Ok(())
    }

    #[test]
    fn test_vision_client_follows_config() {
        let config = AppConfig {
            port: 8080,
            backend: BackendConfig::Ollama {
                host: "http://gpu-box".to_string(),
                port: 11434,
            },
            default_model: "llava:13b".to_string(),
            temperature: 0.0,
            retry: RetryPolicy {
                max_retries: 5,
                request_timeout: Duration::from_secs(30),
                initial_backoff: Duration::from_secs(1),
            },
            tile_height: DEFAULT_TILE_HEIGHT,
            max_images_per_request: None,
            min_content_chars: None,
            no_content_phrases: Vec::new(),
            chrome_executable: None,
            max_concurrent_extractions: None,
        };
        let client = config.vision_client();
        assert_eq!(client.backend_name(), "ollama");
        assert_eq!(client.temperature(), 0.0);
        assert_eq!(client.retry_policy().max_retries, 5);
        assert_eq!(client.retry_policy().request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_backend_builds_matching_client() {
        let ollama = BackendConfig::Ollama {
            host: "http://localhost".to_string(),
            port: 11434,
        };
        assert_eq!(ollama.name(), "ollama");
        assert_eq!(ollama.build_client().backend_name(), "ollama");
        let openai = BackendConfig::OpenAI {
            api_key: "sk-test".to_string(),
        };
        assert_eq!(openai.build_client().backend_name(), "openai");
    }
}
