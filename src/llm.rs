use anyhow::{anyhow, bail, Context, Result};
use rand::{thread_rng, Rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Settings;
use crate::segment::Sections;

pub const AZURE_API_VERSION: &str = "2023-08-01-preview";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

/// Where and how to authenticate a chat completion call.
enum Target<'a> {
    /// Azure OpenAI: the deployment is named in the URL, key in `api-key`.
    Azure { url: String, key: &'a str },
    /// OpenAI-compatible: model in the body, bearer token.
    OpenAi { url: String, key: Option<&'a str> },
}

pub struct LlmClient {
    http: Client,
}

impl LlmClient {
    pub fn new_with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn chat(&self, target: Target<'_>, req: &LlmRequest) -> Result<LlmResponse> {
        let (url, model) = match &target {
            Target::Azure { url, .. } => (url.as_str(), None),
            Target::OpenAi { url, .. } => (url.as_str(), Some(req.model.as_str())),
        };
        let body = ChatCompletionRequest {
            model,
            messages: &req.messages,
            temperature: req.temperature,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: req.max_tokens,
        };

        let res = with_retries(|| async {
            let mut rb = self.http.post(url).json(&body);
            rb = match &target {
                Target::Azure { key, .. } => rb.header("api-key", *key),
                Target::OpenAi { key: Some(key), .. } => rb.bearer_auth(key),
                Target::OpenAi { key: None, .. } => rb,
            };
            let resp = rb.send().await?;
            Ok::<_, anyhow::Error>(resp)
        }).await?;
        if res.status() != StatusCode::OK {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("model provider error {}: {}", status, text);
        }
        let parsed: ChatCompletionResponse = res.json().await.context("failed to parse completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        Ok(LlmResponse { content, usage: parsed.usage })
    }
}

pub async fn with_retries<F, Fut, T>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let mut attempt = 0u32;
    let max_retries = 3u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(e).context("network request failed after retries");
                }
                let backoff_ms = (2u64.pow(attempt) * 100) + thread_rng().gen_range(0..100);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

// Provider adapter trait + registry
#[async_trait::async_trait]
pub trait ModelProviderAdapter: Send + Sync {
    async fn send(&self, req: LlmRequest) -> Result<LlmResponse>;
}

pub struct AzureAdapter {
    client: LlmClient,
    endpoint: String,
    key: String,
}

impl AzureAdapter {
    pub fn new_with_timeout(endpoint: &str, key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new_with_timeout(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn url_for(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, deployment, AZURE_API_VERSION
        )
    }
}

#[async_trait::async_trait]
impl ModelProviderAdapter for AzureAdapter {
    async fn send(&self, req: LlmRequest) -> Result<LlmResponse> {
        let target = Target::Azure { url: self.url_for(&req.model), key: &self.key };
        self.client.chat(target, &req).await
    }
}

pub struct OpenAiAdapter {
    client: LlmClient,
    base: String,
    key: Option<String>,
}

impl OpenAiAdapter {
    pub fn new_with_timeout(base: Option<&str>, key: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new_with_timeout(timeout)?,
            base: base.unwrap_or(DEFAULT_OPENAI_BASE).trim_end_matches('/').to_string(),
            key: key.map(|k| k.to_string()),
        })
    }
}

#[async_trait::async_trait]
impl ModelProviderAdapter for OpenAiAdapter {
    async fn send(&self, req: LlmRequest) -> Result<LlmResponse> {
        let target = Target::OpenAi { url: format!("{}/chat/completions", self.base), key: self.key.as_deref() };
        self.client.chat(target, &req).await
    }
}

/// Offline provider. Reads the batch back out of the user message and answers
/// with one record per notice, or the "None" marker for notices that do not
/// mention land.
pub struct MockAdapter;

#[async_trait::async_trait]
impl ModelProviderAdapter for MockAdapter {
    async fn send(&self, req: LlmRequest) -> Result<LlmResponse> {
        let user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or_else(|| anyhow!("mock provider: no user message"))?;
        let sections: Sections = serde_json::from_str(&user.content).context("mock provider: batch is not JSON")?;
        let records: Vec<serde_json::Value> = sections
            .iter()
            .map(|(label, section)| {
                if !section.content.to_lowercase().contains("land") {
                    return serde_json::json!({ "Response": "None" });
                }
                let notice: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
                serde_json::json!({
                    "Names": "Mock Holder",
                    "Location": "district of Mock",
                    "Title No": format!("MOCK/{}", notice),
                    "Notice No": notice.parse::<i64>().ok(),
                    "Page No": section.page_number.parse::<i64>().ok(),
                })
            })
            .collect();
        Ok(LlmResponse { content: serde_json::to_string(&records)?, usage: None })
    }
}

pub struct ProviderRegistry {
    map: HashMap<String, Box<dyn ModelProviderAdapter>>, // keyed by provider name (lowercase)
}

impl ProviderRegistry {
    /// Register every provider the settings carry enough credentials for.
    pub fn from_settings(settings: &Settings, timeout: Duration) -> Result<Self> {
        let mut map: HashMap<String, Box<dyn ModelProviderAdapter>> = HashMap::new();
        map.insert("mock".to_string(), Box::new(MockAdapter));
        if let (Some(endpoint), Some(key)) = (settings.llm_endpoint.as_deref(), settings.llm_key.as_deref()) {
            map.insert("azure".to_string(), Box::new(AzureAdapter::new_with_timeout(endpoint, key, timeout)?));
        }
        map.insert(
            "openai".to_string(),
            Box::new(OpenAiAdapter::new_with_timeout(
                settings.llm_endpoint.as_deref(),
                settings.llm_key.as_deref(),
                timeout,
            )?),
        );
        Ok(Self { map })
    }

    pub fn get(&self, name: &str) -> Option<&dyn ModelProviderAdapter> {
        self.map.get(&name.to_lowercase()).map(|b| b.as_ref())
    }

    /// Like `get`, with an error that says what is missing.
    pub fn require(&self, name: &str) -> Result<&dyn ModelProviderAdapter> {
        match name.to_lowercase().as_str() {
            "azure" | "openai" | "mock" => self.get(name).ok_or_else(|| {
                anyhow!("missing AZURE_OPENAI_KEY or AZURE_OPENAI_ENDPOINT for provider '{}'", name)
            }),
            other => Err(anyhow!("unsupported provider: {}", other)),
        }
    }
}
