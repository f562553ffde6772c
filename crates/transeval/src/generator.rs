//! HTTP generator backends and the model registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use evaluation::generator::check_output;
use evaluation::prompts::extract_code;
use evaluation::{EvalError, EvalResult, GenerationRequest, Generator, TargetLanguage};
use reqwest::StatusCode;
use tracing::debug;

use crate::config::{ModelEndpoint, RunnerConfig};

const SYSTEM_PROMPT: &str = "You are an expert programmer who translates scientific code between languages. \
Answer with the complete translated program in a single fenced code block.";

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpGenerator {
    name: String,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    language: TargetLanguage,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(config: &ModelEndpoint, language: TargetLanguage) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .with_context(|| format!("Failed to build HTTP client for {}", config.name))?;
        Ok(Self {
            name: config.name.clone(),
            model: config.model_id().to_string(),
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            language,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> EvalResult<String> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": request.prompt}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        });

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| EvalError::Generator(format!("{} request failed: {e}", self.name)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("{} returned {status}: {}", self.name, text.trim());
            return Err(if is_transient(status) {
                EvalError::Generator(message)
            } else {
                EvalError::GeneratorContract(message)
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            EvalError::GeneratorContract(format!("{} sent a malformed response: {e}", self.name))
        })?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EvalError::GeneratorContract(format!("{} response has no message content", self.name))
            })?;

        debug!(
            model = %self.name,
            sample_id = %request.sample_id,
            iteration = request.iteration,
            response_chars = content.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generator responded"
        );
        check_output(extract_code(content, self.language))
    }
}

/// Rate limiting and server-side failures are worth retrying; other client
/// errors are not.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Named generators built from `[[models]]`.
#[derive(Default)]
pub struct ModelRegistry {
    generators: BTreeMap<String, Arc<dyn Generator>>,
}

impl ModelRegistry {
    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        let language = config.evaluation.similarity.language;
        let mut registry = Self::default();
        for endpoint in &config.models {
            registry.register(Arc::new(HttpGenerator::new(endpoint, language)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, generator: Arc<dyn Generator>) {
        self.generators.insert(generator.name().to_string(), generator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Generator>> {
        self.generators.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.generators.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// The named generators in the order given, or every registered one when
    /// `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<dyn Generator>>> {
        if self.generators.is_empty() {
            bail!("no models configured; add [[models]] or set TRANSEVAL_GENERATOR_URL");
        }
        if names.is_empty() {
            return Ok(self.generators.values().cloned().collect());
        }
        names
            .iter()
            .map(|name| {
                self.get(name).with_context(|| {
                    format!("unknown model `{name}` (configured: {})", self.names().join(", "))
                })
            })
            .collect()
    }
}
