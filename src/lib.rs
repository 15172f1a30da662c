pub mod app;
pub mod browser;
pub mod environment;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod normalize;
pub mod price;
pub mod prompts;
pub mod tiler;

use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use ollama_rs::Ollama;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_BROWSER: &str = "browser";

#[derive(Clone, Debug)]
pub enum LLMClient {
    Ollama(Ollama),
    OpenAI(OpenAIClient<OpenAIConfig>),
}

impl LLMClient {
    pub fn backend_name(&self) -> &'static str {
        match self {
            LLMClient::Ollama(_) => "ollama",
            LLMClient::OpenAI(_) => "openai",
        }
    }
}
