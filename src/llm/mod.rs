use async_trait::async_trait;
use std::time::Duration;

pub mod breaker;
pub mod ollama;

pub use ollama::OllamaGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Circuit open or the model server is unreachable.
    #[error("model offline: {0}")]
    Offline(String),
    /// Transient I/O or 5xx; retried inside the gateway before surfacing.
    #[error("transient model failure: {0}")]
    Transient(String),
    /// The server answered but the body did not match the expected envelope.
    /// Never retried.
    #[error("malformed model payload: {0}")]
    Malformed(String),
}

/// Generation options forwarded to the model server.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub temperature: f32,
    pub top_k: u32,
    pub num_predict: u32,
    pub timeout: Duration,
    /// Residency hint so the remote model stays loaded between requests.
    pub keep_alive: String,
    pub format_json: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 40,
            num_predict: 500,
            timeout: Duration::from_secs(30),
            keep_alive: "10m".to_string(),
            format_json: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    /// Token count as reported by the server.
    pub eval_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelHealth {
    Online,
    Degraded,
    Offline,
}

impl ModelHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelHealth::Online => "online",
            ModelHealth::Degraded => "degraded",
            ModelHealth::Offline => "offline",
        }
    }
}

/// Single choke point to the local LLM. One implementation talks to the
/// model server; tests substitute scripted gateways.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &ModelOptions,
    ) -> Result<ModelReply, GatewayError>;

    /// Embedding channel used by retrieval ingestion.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;

    /// Probe the model server's tag listing. Does not consume a quota slot
    /// and does not move the circuit breaker.
    async fn health(&self) -> ModelHealth;

    fn model_name(&self) -> &str;

    /// Manual breaker reset, exposed for the health surface.
    fn reset_breaker(&self) {}
}
