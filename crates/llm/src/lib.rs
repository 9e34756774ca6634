use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gemini" | "google" => Some(LlmProvider::Gemini),
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Gemini => "gemini-2.5-flash",
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Local => "local-echo",
        }
    }
}

/// Everything needed to build an [`LlmClient`]. Built by the application
/// config; this crate never reads the environment.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn local() -> Self {
        Self {
            provider: LlmProvider::Local,
            model: LlmProvider::Local.default_model().to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.0,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    temperature: f32,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    Gemini { api_key: String, base_url: String },
    OpenAi { api_key: String, base_url: String },
    Local,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build http client")?;
        let provider_config = match config.provider {
            LlmProvider::Gemini => ProviderConfig::Gemini {
                api_key: require_key(config)?,
                base_url: config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            },
            LlmProvider::OpenAi => ProviderConfig::OpenAi {
                api_key: require_key(config)?,
                base_url: config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            },
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider: config.provider,
            model: config.model.clone(),
            temperature: config.temperature,
            config: provider_config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single completion call. Transport errors, non-2xx answers and
    /// responses without text are returned as errors; nothing is retried.
    pub async fn complete(&self, req: &LlmRequest) -> Result<LlmResponse> {
        debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            prompt_chars = req.user.chars().count(),
            "llm completion"
        );
        match &self.config {
            ProviderConfig::Gemini { api_key, base_url } => {
                self.complete_gemini(api_key, base_url, req).await
            }
            ProviderConfig::OpenAi { api_key, base_url } => {
                self.complete_openai(api_key, base_url, req).await
            }
            ProviderConfig::Local => Ok(LlmResponse {
                content: synthesize_local_response(req),
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
        }
    }

    async fn complete_gemini(
        &self,
        api_key: &str,
        base_url: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            self.model
        );
        let value = self
            .post_json(
                self.http.post(url).header("x-goog-api-key", api_key),
                &gemini_payload(req, self.temperature),
                "gemini",
            )
            .await?;
        parse_gemini_response(&value)
    }

    async fn complete_openai(
        &self,
        api_key: &str,
        base_url: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let value = self
            .post_json(
                self.http.post(url).bearer_auth(api_key),
                &openai_payload(&self.model, req, self.temperature),
                "openai",
            )
            .await?;
        parse_openai_response(&value)
    }

    async fn post_json(
        &self,
        builder: reqwest::RequestBuilder,
        payload: &Value,
        provider: &str,
    ) -> Result<Value> {
        let response = builder
            .json(payload)
            .send()
            .await
            .with_context(|| format!("{provider} request failed"))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(
                "{provider} returned error (status {status}): {body}"
            ));
        }
        serde_json::from_str(&body).with_context(|| format!("failed to decode {provider} response"))
    }
}

fn require_key(config: &LlmConfig) -> Result<String> {
    config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("{} provider requires an api key", config.provider.as_str()))
}

pub fn gemini_payload(req: &LlmRequest, temperature: f32) -> Value {
    let mut payload = json!({
        "contents": [
            { "role": "user", "parts": [ { "text": req.user } ] }
        ],
        "generationConfig": { "temperature": temperature },
    });
    if let Some(system) = &req.system {
        payload["systemInstruction"] = json!({ "parts": [ { "text": system } ] });
    }
    payload
}

pub fn openai_payload(model: &str, req: &LlmRequest, temperature: f32) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
    })
}

pub fn parse_gemini_response(value: &Value) -> Result<LlmResponse> {
    let response: GeminiResponse =
        serde_json::from_value(value.clone()).context("unexpected gemini response shape")?;
    let text = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|text| !text.is_empty())
        .ok_or_else(|| anyhow!("missing text in Gemini response"))?;
    let usage = response.usage.unwrap_or_default();
    Ok(LlmResponse {
        content: text,
        prompt_tokens: usage.prompt_tokens.unwrap_or(0),
        completion_tokens: usage.completion_tokens.unwrap_or(0),
    })
}

pub fn parse_openai_response(value: &Value) -> Result<LlmResponse> {
    let response: ChatResponse =
        serde_json::from_value(value.clone()).context("unexpected openai response shape")?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
    let usage = response.usage.unwrap_or_default();
    Ok(LlmResponse {
        content: text,
        prompt_tokens: usage.prompt_tokens.unwrap_or(0),
        completion_tokens: usage.completion_tokens.unwrap_or(0),
    })
}

/// Offline stand-in: answers with the question and the first words of the
/// company context so callers can see what reached the model.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let question = extract_block(&req.user, "Current question:", "CONTEXT 1");
    let context = extract_block(&req.user, "CONTEXT 1", "CONTEXT 2");
    let context = context
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(&context);
    let question = summarize_text(&question, 40);
    let summary = summarize_text(context, 40);
    if summary.is_empty() {
        format!("Answer to: {question}")
    } else {
        format!("Answer to: {question}\nBased on: {summary}")
    }
}

fn extract_block(text: &str, start_marker: &str, stop_marker: &str) -> String {
    let Some(start_idx) = text.find(start_marker) else {
        return text.trim().to_string();
    };
    let after = &text[start_idx + start_marker.len()..];
    match after.find(stop_marker) {
        Some(end_idx) => after[..end_idx].trim().to_string(),
        None => after.trim().to_string(),
    }
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_tokens: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}
