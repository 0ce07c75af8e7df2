//! Model interaction for the downstream stages.
//!
//! Stages talk to a [`Generator`]: "given a system prompt, a user prompt and
//! optional page images, return text". Prompt wording lives in
//! [`crate::prompts`]; retry and provider selection live here.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. [`LlmGenerator`] retries with exponential backoff
//! (`retry_backoff_ms * 2^(retry-1)`): with a 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s.

use crate::config::StageConfig;
use crate::error::StageError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One model call.
#[derive(Clone, Default)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    /// Page images attached to the user turn.
    pub images: Vec<ImageData>,
    /// Overrides the generator's configured temperature.
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Text generation backend used by the translate, clean and sections stages.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, StageError>;
}

/// [`Generator`] backed by an `edgequake_llm` provider.
pub struct LlmGenerator {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl std::fmt::Debug for LlmGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGenerator")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl LlmGenerator {
    /// Wrap an already-built provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &StageConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Resolve a provider from `config` and the environment.
    pub fn from_config(config: &StageConfig) -> Result<Self, StageError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }

    fn options(&self, request: &GenerationRequest) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, StageError> {
        let start = Instant::now();
        let user = if request.images.is_empty() {
            ChatMessage::user(request.user.as_str())
        } else {
            ChatMessage::user_with_images(request.user.as_str(), request.images.clone())
        };
        let messages = vec![ChatMessage::system(request.system.as_str()), user];
        let options = self.options(request);

        let mut last_err = String::from("unknown error");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!("Model retry {}/{} after {}ms", attempt, self.max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Model call: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!("Model attempt {} failed: {}", attempt + 1, last_err);
                }
            }
        }

        Err(StageError::Model {
            retries: self.max_retries,
            detail: last_err,
        })
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, StageError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        StageError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Pick a provider, most specific first:
///
/// 1. `config.provider_name` (+ `config.model`)
/// 2. `OPENAI_API_KEY` present → OpenAI
/// 3. whatever [`ProviderFactory::from_env`] detects
fn resolve_provider(config: &StageConfig) -> Result<Arc<dyn LLMProvider>, StageError> {
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| StageError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set DOCFLOW_LLM_PROVIDER, OPENAI_API_KEY or another provider key.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(provider)
}
