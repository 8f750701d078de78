use crate::embeddings::Embedder;
use crate::traits::Completion;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

pub const DEFAULT_GATEWAY_BASE: &str = "https://gateway.ai.cloudflare.com/v1";
pub const DEFAULT_EMBED_MODEL: &str = "@cf/baai/bge-small-en-v1.5";
pub const DEFAULT_EMBED_DIMENSIONS: usize = 384;
pub const DEFAULT_LLM_MODEL: &str = "@cf/openchat/openchat-3.5-0106";

pub const API_TOKEN_VAR: &str = "CLOUDFLARE_API_TOKEN";
pub const ACCOUNT_ID_VAR: &str = "CLOUDFLARE_ACCOUNT_ID";
pub const GATEWAY_ID_VAR: &str = "CLOUDFLARE_GATEWAY_ID";

#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub account_id: String,
    pub gateway_id: String,
    pub api_token: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("gateway_id", &self.gateway_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, SearchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SearchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| SearchError::Configuration(format!("{key} is not set")))
        };

        Ok(Self {
            base_url: DEFAULT_GATEWAY_BASE.to_string(),
            account_id: require(ACCOUNT_ID_VAR)?,
            gateway_id: require(GATEWAY_ID_VAR)?,
            api_token: require(API_TOKEN_VAR)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self, model: &str) -> Result<Url, SearchError> {
        let raw = format!(
            "{}/{}/{}/workers-ai/{}",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.gateway_id,
            model.trim_start_matches('/')
        );
        Ok(Url::parse(&raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    client: Client,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    async fn invoke(&self, model: &str, body: &Value) -> Result<Value, SearchError> {
        let endpoint = self.config.endpoint(model)?;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.config.api_token)
            .json(body)
            .send()
            .await
            .map_err(|error| SearchError::Transport(format!("{model}: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Transport(format!("{model} returned {status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| SearchError::Format(format!("{model} sent a non-JSON body: {error}")))
    }

    pub fn embedder(&self, model: impl Into<String>, dimensions: usize) -> GatewayEmbedder {
        GatewayEmbedder {
            client: self.clone(),
            model: model.into(),
            dimensions,
        }
    }

    pub fn completion(&self, model: impl Into<String>) -> GatewayCompletion {
        GatewayCompletion {
            client: self.clone(),
            model: model.into(),
        }
    }
}

fn parse_embedding(body: &Value) -> Result<Vec<f32>, SearchError> {
    let values = body
        .pointer("/result/data/0")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Format("embedding response lacks result.data[0]".to_string()))?;

    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| SearchError::Format(format!("embedding value {value} is not a number")))
        })
        .collect()
}

fn parse_completion(body: &Value) -> Result<String, SearchError> {
    body.pointer("/result/response")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| SearchError::Format("completion response lacks result.response".to_string()))
}

#[derive(Debug, Clone)]
pub struct GatewayEmbedder {
    client: GatewayClient,
    model: String,
    dimensions: usize,
}

#[async_trait]
impl Embedder for GatewayEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let body = self
            .client
            .invoke(&self.model, &json!({ "text": text }))
            .await?;
        let vector = parse_embedding(&body)?;
        debug!(model = %self.model, dimensions = vector.len(), "embedded text");
        Ok(vector)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayCompletion {
    client: GatewayClient,
    model: String,
}

#[async_trait]
impl Completion for GatewayCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, SearchError> {
        let body = self
            .client
            .invoke(&self.model, &json!({ "prompt": prompt }))
            .await?;
        parse_completion(&body)
    }
}
