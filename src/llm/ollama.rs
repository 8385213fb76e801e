use async_trait::async_trait;
use log::{debug, error, warn};
use serde::Deserialize;
use std::time::Duration;

use super::breaker::CircuitBreaker;
use super::{GatewayError, ModelGateway, ModelHealth, ModelOptions, ModelReply};
use crate::config::CopilotConfig;

#[derive(Debug, Deserialize)]
struct GenerateEnvelope {
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EmbedEnvelope {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TagsEnvelope {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

/// Gateway to a local Ollama-style model server. Wraps every generate call
/// in the circuit breaker and retries transient failures with bounded
/// exponential backoff.
pub struct OllamaGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    max_retries: u32,
    breaker: CircuitBreaker,
}

impl OllamaGateway {
    pub fn new(config: &CopilotConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.model_name.clone(),
            embedding_model: config.embedding_model.clone(),
            max_retries: 2,
            breaker: CircuitBreaker::new(
                config.circuit_fail_threshold,
                Duration::from_secs(config.circuit_cooldown_seconds),
            ),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn generate_once(
        &self,
        prompt: &str,
        options: &ModelOptions,
    ) -> Result<ModelReply, GatewayError> {
        let mut payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "top_k": options.top_k,
                "num_predict": options.num_predict,
                "keep_alive": options.keep_alive,
            },
        });
        if options.format_json {
            payload["format"] = serde_json::Value::String("json".to_string());
        }

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .timeout(options.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    GatewayError::Transient(e.to_string())
                } else {
                    GatewayError::Offline(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(GatewayError::Malformed(format!("HTTP {}", status)));
        }

        let envelope: GenerateEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        if !envelope.done {
            debug!("Model reply reported done=false; using partial body");
        }

        Ok(ModelReply {
            text: envelope.response,
            eval_count: envelope.eval_count.unwrap_or(0),
        })
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn generate(
        &self,
        prompt: &str,
        options: &ModelOptions,
    ) -> Result<ModelReply, GatewayError> {
        if !self.breaker.allow_request() {
            return Err(GatewayError::Offline(
                "circuit breaker open".to_string(),
            ));
        }

        let mut last_error = GatewayError::Offline("no attempt made".to_string());
        for attempt in 0..=self.max_retries {
            match self.generate_once(prompt, options).await {
                Ok(reply) => {
                    self.breaker.record_success();
                    return Ok(reply);
                }
                Err(GatewayError::Transient(message)) => {
                    warn!(
                        "Model call transient failure (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        message
                    );
                    last_error = GatewayError::Transient(message);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
                Err(error) => {
                    error!("Model call failed: {}", error);
                    self.breaker.record_failure();
                    return Err(error);
                }
            }
        }

        self.breaker.record_failure();
        Err(last_error)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        if !self.breaker.allow_request() {
            return Err(GatewayError::Offline(
                "circuit breaker open".to_string(),
            ));
        }

        let payload = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .timeout(Duration::from_secs(15))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            self.breaker.record_failure();
            return Err(GatewayError::Transient(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let envelope: EmbedEnvelope = response.json().await.map_err(|e| {
            self.breaker.record_failure();
            GatewayError::Malformed(e.to_string())
        })?;

        self.breaker.record_success();
        Ok(envelope.embedding)
    }

    async fn health(&self) -> ModelHealth {
        let response = self
            .client
            .get(format!("{}/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<TagsEnvelope>().await {
                    Ok(tags) if !tags.models.is_empty() => ModelHealth::Online,
                    Ok(_) => {
                        warn!("Model server reachable but reports no models");
                        ModelHealth::Degraded
                    }
                    Err(e) => {
                        warn!("Model server tag listing unparseable: {}", e);
                        ModelHealth::Degraded
                    }
                }
            }
            Ok(response) => {
                warn!("Model server health probe: HTTP {}", response.status());
                ModelHealth::Offline
            }
            Err(e) => {
                debug!("Model server unreachable: {}", e);
                ModelHealth::Offline
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn reset_breaker(&self) {
        self.breaker.reset();
    }
}
