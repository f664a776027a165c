use crate::config::LlmConfig;
use crate::error::{Result, TrainerError};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ============================================
// LLM Provider Trait
// ============================================

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Provider name
    fn name(&self) -> &'static str;

    /// Model identifier, reported in the run summary
    fn model(&self) -> String;
}

fn http_client() -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| TrainerError::Llm(format!("Failed to create HTTP client: {}", e)))
}

// ============================================
// OpenAI Provider
// ============================================

pub struct OpenAiProvider {
    client: HttpClient,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, temperature: f32, max_tokens: u32) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = OpenAiChatRequest {
            model: &self.model,
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: "You are a precise recommendation ranking assistant.",
                },
                OpenAiMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| TrainerError::Llm(format!("OpenAI API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TrainerError::Llm(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let result: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| TrainerError::Llm(format!("Parse error: {}", e)))?;

        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

// ============================================
// Gemini Provider
// ============================================

pub struct GeminiProvider {
    client: HttpClient,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model: &str, temperature: f32, max_tokens: u32) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| TrainerError::Llm(format!("Gemini API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TrainerError::Llm(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let result: GeminiResponse = response
            .json()
            .await
            .map_err(|e| TrainerError::Llm(format!("Parse error: {}", e)))?;

        Ok(result
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

// ============================================
// Ranking Model Capability
// ============================================

/// Whether the final rerank may consult a language model.
#[derive(Clone)]
pub enum RankingModel {
    Disabled,
    Enabled(Arc<dyn LlmProvider>),
}

impl RankingModel {
    /// OpenAI when a key is present, Gemini otherwise, disabled without keys.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if !config.enabled {
            info!("LLM reranking disabled by configuration");
            return Ok(Self::Disabled);
        }

        if let Some(api_key) = config.openai_api_key.as_deref() {
            let provider = OpenAiProvider::new(
                api_key,
                &config.openai_model,
                config.temperature,
                config.max_tokens,
            )?;
            info!(provider = "openai", model = %config.openai_model, "LLM reranking enabled");
            return Ok(Self::Enabled(Arc::new(provider)));
        }

        if let Some(api_key) = config.gemini_api_key.as_deref() {
            let provider = GeminiProvider::new(
                api_key,
                &config.gemini_model,
                config.temperature,
                config.max_tokens,
            )?;
            info!(provider = "gemini", model = %config.gemini_model, "LLM reranking enabled");
            return Ok(Self::Enabled(Arc::new(provider)));
        }

        info!("No LLM API key configured, using heuristic reranking");
        Ok(Self::Disabled)
    }

    pub fn provider(&self) -> Option<&Arc<dyn LlmProvider>> {
        match self {
            Self::Disabled => None,
            Self::Enabled(provider) => Some(provider),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// `"openai:gpt-4.1-mini"` style label, or `None` when disabled.
    pub fn describe(&self) -> Option<String> {
        self.provider()
            .map(|provider| format!("{}:{}", provider.name(), provider.model()))
    }
}

impl std::fmt::Debug for RankingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.describe() {
            Some(label) => write!(f, "RankingModel::Enabled({})", label),
            None => f.write_str("RankingModel::Disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(openai: Option<&str>, gemini: Option<&str>) -> LlmConfig {
        LlmConfig {
            openai_api_key: openai.map(str::to_string),
            gemini_api_key: gemini.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_prefers_openai() {
        let model = RankingModel::from_config(&config(Some("sk-a"), Some("g-b"))).unwrap();
        assert_eq!(model.describe().as_deref(), Some("openai:gpt-4.1-mini"));
    }

    #[test]
    fn test_from_config_falls_back_to_gemini() {
        let model = RankingModel::from_config(&config(None, Some("g-b"))).unwrap();
        assert_eq!(model.describe().as_deref(), Some("gemini:gemini-1.5-flash"));
    }

    #[test]
    fn test_from_config_without_keys_is_disabled() {
        let model = RankingModel::from_config(&config(None, None)).unwrap();
        assert!(!model.is_enabled());
        assert!(model.describe().is_none());

        let disabled = LlmConfig {
            enabled: false,
            ..config(Some("sk-a"), None)
        };
        assert!(!RankingModel::from_config(&disabled).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_openai_provider_sends_chat_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "max_tokens": 600,
                "messages": [
                    {"role": "system"},
                    {"role": "user", "content": "rank these"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ranking\": [2, 1]}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("sk-test", "gpt-test", 0.5, 600)
            .unwrap()
            .with_base_url(&format!("{}/", server.uri()));
        let answer = provider.generate("rank these").await.unwrap();

        assert_eq!(answer, r#"{"ranking": [2, 1]}"#);
    }

    #[tokio::test]
    async fn test_openai_provider_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("sk-test", "gpt-test", 0.5, 600)
            .unwrap()
            .with_base_url(&server.uri());
        let err = provider.generate("rank these").await.unwrap_err();

        assert!(matches!(err, TrainerError::Llm(_)));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_gemini_provider_joins_candidate_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(query_param("key", "g-test"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "rank these"}]}],
                "generationConfig": {"maxOutputTokens": 600}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "{\"ranking\": "}, {"text": "[3]}"}]}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("g-test", "gemini-test", 0.5, 600)
            .unwrap()
            .with_base_url(&server.uri());
        let answer = provider.generate("rank these").await.unwrap();

        assert_eq!(answer, r#"{"ranking": [3]}"#);
    }

    #[tokio::test]
    async fn test_gemini_provider_without_candidates_answers_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new("g-test", "gemini-test", 0.5, 600)
            .unwrap()
            .with_base_url(&server.uri());

        assert_eq!(provider.generate("rank these").await.unwrap(), "");
    }
}
