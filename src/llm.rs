use anyhow::{anyhow, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
    ImageUrlArgs, ResponseFormat,
};
use async_openai::Client as OpenAIClient;
use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::images::Image;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::generation::parameters::FormatType;
use ollama_rs::Ollama;
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::prompts::SYSTEM_PROMPT;
use crate::tiler::ImageTile;
use crate::{LLMClient, TARGET_LLM_REQUEST};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
const EMPTY_RESPONSE: &str = r#"{"items": []}"#;

/// A vision-capable model that turns an instruction plus ordered images into JSON text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn infer(&self, model: &str, instruction: &str, tiles: &[ImageTile]) -> Result<String>;
}

/// Retry policy for one inference call.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: Duration::from_secs(120),
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Run `call` until it succeeds, backing off exponentially between attempts.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_retries = policy.max_retries.max(1);
    let mut backoff = policy.initial_backoff;
    let mut last_error = anyhow!("{} was never attempted", what);

    for retry_count in 0..max_retries {
        match timeout(policy.request_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(target: TARGET_LLM_REQUEST, "{} failed: {:#}", what, e);
                last_error = e;
            }
            Err(_) => {
                warn!(target: TARGET_LLM_REQUEST, "{} timed out after {:?}", what, policy.request_timeout);
                last_error = anyhow!("{} timed out after {:?}", what, policy.request_timeout);
            }
        }

        if retry_count < max_retries - 1 {
            info!(target: TARGET_LLM_REQUEST, "Retrying {}... ({}/{})", what, retry_count + 1, max_retries);
            sleep(backoff).await;
            backoff *= 2;
        }
    }

    error!(target: TARGET_LLM_REQUEST, "{} failed after {} attempts", what, max_retries);
    Err(last_error.context(format!("{} failed after {} attempts", what, max_retries)))
}

/// Vision inference over either backend the service can be configured with.
pub struct VisionClient {
    llm_client: LLMClient,
    temperature: f32,
    retry: RetryPolicy,
}

impl VisionClient {
    pub fn new(llm_client: LLMClient) -> Self {
        Self {
            llm_client,
            temperature: DEFAULT_TEMPERATURE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.llm_client.backend_name()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

async fn openai_request(
    client: &OpenAIClient<OpenAIConfig>,
    model: &str,
    instruction: &str,
    image_urls: &[String],
    temperature: f32,
) -> Result<String> {
    let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> =
        vec![ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(instruction)
            .build()?
            .into()];
    for url in image_urls {
        parts.push(
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(url.as_str())
                        .detail(ImageDetail::Auto)
                        .build()?,
                )
                .build()?
                .into(),
        );
    }

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(temperature)
        .response_format(ResponseFormat::JsonObject)
        .messages(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()?
                .into(),
        ])
        .build()?;

    let response = client.chat().create(request).await?;
    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default())
}

async fn ollama_request(
    ollama: &Ollama,
    model: &str,
    instruction: &str,
    images: &[String],
    temperature: f32,
) -> Result<String> {
    let request = GenerationRequest::new(model.to_string(), instruction.to_string())
        .system(SYSTEM_PROMPT.to_string())
        .images(images.iter().map(|b64| Image::from_base64(b64)).collect())
        .format(FormatType::Json)
        .options(GenerationOptions::default().temperature(temperature));

    let response = ollama.generate(request).await?;
    Ok(response.response)
}

#[async_trait]
impl VisionModel for VisionClient {
    async fn infer(&self, model: &str, instruction: &str, tiles: &[ImageTile]) -> Result<String> {
        debug!(
            target: TARGET_LLM_REQUEST,
            "Sending {} image(s) to {} via {}",
            tiles.len(),
            model,
            self.backend_name()
        );

        let text = match &self.llm_client {
            LLMClient::OpenAI(client) => {
                let urls = tiles
                    .iter()
                    .map(ImageTile::to_data_url)
                    .collect::<Result<Vec<_>>>()?;
                with_retries(&self.retry, "OpenAI vision request", || {
                    openai_request(client, model, instruction, &urls, self.temperature)
                })
                .await?
            }
            LLMClient::Ollama(ollama) => {
                let images = tiles
                    .iter()
                    .map(ImageTile::to_base64_png)
                    .collect::<Result<Vec<_>>>()?;
                with_retries(&self.retry, "Ollama vision request", || {
                    ollama_request(ollama, model, instruction, &images, self.temperature)
                })
                .await?
            }
        };

        debug!(target: TARGET_LLM_REQUEST, "Model {} returned {} bytes", model, text.len());
        if text.trim().is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }
        Ok(text)
    }
}
