// src/agent.rs
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Agent returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("Agent response missing reply field")]
    MalformedResponse,
}

/// The downstream agent backend, treated as an opaque request/reply
/// service: one message in, one reply out. Callers do not distinguish
/// an unreachable backend from a malformed response.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn send(&self, message: &str, user_id: &str) -> Result<String, AgentError>;
}

/// HTTP client for the agent backend. Forwards `{message, userId}`
/// verbatim as a JSON POST and extracts `reply` from the response body.
/// No retry and no timeout: a hung backend hangs the caller.
#[derive(Debug, Clone)]
pub struct HttpAgentBackend {
    client: Client,
    base_url: String,
}

impl HttpAgentBackend {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("AGENT_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        Self::new(base_url)
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn send(&self, message: &str, user_id: &str) -> Result<String, AgentError> {
        let url = format!("{}/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "message": message,
                "userId": user_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentError::Status(response.status()));
        }

        // No schema validation beyond the reply field itself.
        let body: Value = response.json().await?;
        body.get("reply")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(AgentError::MalformedResponse)
    }
}
