use super::{Oracle, OracleError};
use crate::config::{HttpConfig, OracleConfig};
use crate::http::build_client;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a data-import assistant for a second-hand resale inventory. \
Answer with a single JSON object and nothing else.";

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

pub struct LlmClient {
    http: Client,
    config: OracleConfig,
}

impl LlmClient {
    pub fn new(config: OracleConfig, http: &HttpConfig) -> Self {
        Self {
            http: build_client(http),
            config,
        }
    }

    pub async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, OracleError> {
        let gateway = self.config.gateway_url.trim().trim_end_matches('/');
        if gateway.is_empty() {
            return Err(OracleError::MissingGateway);
        }

        let body = ChatRequest {
            function_name: self.config.function_name.clone(),
            model_name: self.config.model.clone(),
            input: ChatInput {
                messages: messages.to_vec(),
            },
        };

        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);

        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| OracleError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GatewayResponse = response
            .json()
            .await
            .map_err(|err| OracleError::InvalidResponse(err.to_string()))?;

        let text = payload
            .content
            .into_iter()
            .find(|item| item.r#type == "text")
            .map(|item| item.text)
            .ok_or_else(|| OracleError::InvalidResponse("missing text".into()))?;

        Ok(LlmResponse {
            text,
            usage: payload.usage,
        })
    }
}

#[async_trait]
impl Oracle for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        let messages = [
            LlmMessage {
                role: "system".into(),
                content: SYSTEM_PROMPT.into(),
            },
            LlmMessage {
                role: "user".into(),
                content: prompt.to_string(),
            },
        ];
        let response = self.chat(&messages).await?;
        if let Some(usage) = &response.usage {
            debug!(
                target = "resale.oracle",
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "oracle_usage"
            );
        }
        if response.text.trim().is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(response.text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    input: ChatInput,
}

#[derive(Debug, Serialize)]
struct ChatInput {
    messages: Vec<LlmMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    content: Vec<ResponseContent>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    r#type: String,
    #[serde(default)]
    text: String,
}
