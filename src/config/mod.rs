use log::info;
use std::collections::HashMap;

/// Runtime configuration for the copilot core. Every key can be overridden
/// through the environment; defaults match the deployment the core was
/// tuned against.
#[derive(Debug, Clone)]
pub struct CopilotConfig {
    /// LLM tag to call on the model server.
    pub model_name: String,
    /// Embedding model tag used by the ingestion channel.
    pub embedding_model: String,
    /// Base URL of the local model server.
    pub ollama_base_url: String,
    /// Vector dimension D; must match indexed data.
    pub embedding_dim: usize,
    pub context_window_hours_default: i64,
    pub rate_per_hour: u32,
    pub rate_per_day: u32,
    pub circuit_fail_threshold: u32,
    pub circuit_cooldown_seconds: u64,
    /// Per-request wall-clock ceiling, query receipt to response emission.
    pub wall_clock_budget_ms: u64,
    pub model_timeout_seconds: u64,
    pub redact_employee_names: bool,
    /// Master switch for the deterministic KPI fast path.
    pub fast_path_enabled: bool,
    pub chunk_min_chars: usize,
    pub chunk_max_chars: usize,
    pub lexical_weight: f32,
    pub vector_weight: f32,
    pub low_trust_threshold: f32,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            model_name: "llama3.2".to_string(),
            embedding_model: "all-minilm".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            embedding_dim: 384,
            context_window_hours_default: 24,
            rate_per_hour: 60,
            rate_per_day: 300,
            circuit_fail_threshold: 3,
            circuit_cooldown_seconds: 60,
            wall_clock_budget_ms: 20_000,
            model_timeout_seconds: 30,
            redact_employee_names: false,
            fast_path_enabled: true,
            chunk_min_chars: 500,
            chunk_max_chars: 800,
            lexical_weight: 0.4,
            vector_weight: 0.6,
            low_trust_threshold: 0.6,
        }
    }
}

impl CopilotConfig {
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();

        let get_str = |key: &str, default: &str| -> String {
            vars.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let get_u32 = |key: &str, default: u32| -> u32 {
            vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let get_u64 = |key: &str, default: u64| -> u64 {
            vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let get_usize = |key: &str, default: usize| -> usize {
            vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let get_i64 = |key: &str, default: i64| -> i64 {
            vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let get_bool = |key: &str, default: bool| -> bool {
            vars.get(key)
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(default)
        };

        let defaults = Self::default();
        let config = Self {
            model_name: get_str("MODEL_NAME", &defaults.model_name),
            embedding_model: get_str("EMBEDDING_MODEL", &defaults.embedding_model),
            ollama_base_url: get_str("OLLAMA_BASE_URL", &defaults.ollama_base_url),
            embedding_dim: get_usize("EMBEDDING_DIM", defaults.embedding_dim),
            context_window_hours_default: get_i64(
                "CONTEXT_WINDOW_HOURS_DEFAULT",
                defaults.context_window_hours_default,
            ),
            rate_per_hour: get_u32("RATE_PER_HOUR", defaults.rate_per_hour),
            rate_per_day: get_u32("RATE_PER_DAY", defaults.rate_per_day),
            circuit_fail_threshold: get_u32(
                "CIRCUIT_FAIL_THRESHOLD",
                defaults.circuit_fail_threshold,
            ),
            circuit_cooldown_seconds: get_u64(
                "CIRCUIT_COOLDOWN_SECONDS",
                defaults.circuit_cooldown_seconds,
            ),
            wall_clock_budget_ms: get_u64("WALL_CLOCK_BUDGET_MS", defaults.wall_clock_budget_ms),
            model_timeout_seconds: get_u64("MODEL_TIMEOUT_SECONDS", defaults.model_timeout_seconds),
            redact_employee_names: get_bool(
                "REDACT_EMPLOYEE_NAMES",
                defaults.redact_employee_names,
            ),
            fast_path_enabled: get_bool("FAST_PATH_ENABLED", defaults.fast_path_enabled),
            chunk_min_chars: get_usize("CHUNK_MIN_CHARS", defaults.chunk_min_chars),
            chunk_max_chars: get_usize("CHUNK_MAX_CHARS", defaults.chunk_max_chars),
            lexical_weight: defaults.lexical_weight,
            vector_weight: defaults.vector_weight,
            low_trust_threshold: defaults.low_trust_threshold,
        };

        info!(
            "Copilot config: model={} embedding={} dim={} rate={}/h {}/d budget={}ms",
            config.model_name,
            config.embedding_model,
            config.embedding_dim,
            config.rate_per_hour,
            config.rate_per_day,
            config.wall_clock_budget_ms
        );

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let config = CopilotConfig::default();
        assert_eq!(config.rate_per_hour, 60);
        assert_eq!(config.rate_per_day, 300);
        assert_eq!(config.circuit_fail_threshold, 3);
        assert_eq!(config.circuit_cooldown_seconds, 60);
        assert_eq!(config.wall_clock_budget_ms, 20_000);
        assert!(config.fast_path_enabled);
        assert!((config.lexical_weight + config.vector_weight - 1.0).abs() < f32::EPSILON);
    }
}
