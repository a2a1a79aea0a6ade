use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LumenConfig {
    pub llm: LlmConfig,
    pub policy: PolicyConfig,
    pub retrieval: RetrievalConfig,
    pub timeouts: TimeoutConfig,
    pub web_search: WebSearchConfig,
    pub tools: ToolsConfig,
    pub telemetry: TelemetryConfig,
    pub gateway: GatewayConfig,
}

impl LumenConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: LumenConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        // LLM_API_KEY wins over the provider-specific name
        if let Ok(v) = std::env::var("GROQ_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("GROQ_PLANNING_MODEL") {
            self.llm.primary_model = v;
        }
        if let Ok(v) = std::env::var("GROQ_FAST_MODEL") {
            self.llm.fast_model = v;
        }
        if let Ok(v) = std::env::var("GROQ_MODEL") {
            self.llm.generation_model = v.clone();
            self.llm.judge_model = v;
        }
        if let Ok(v) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("BRAVE_API_KEY") {
            self.web_search.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LUMEN_DB_PATH") {
            self.retrieval.db_path = v;
        }
        if let Ok(v) = std::env::var("LUMEN_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.policy.max_retries = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai_compatible" or "mock"
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub primary_model: String,
    pub fast_model: String,
    pub generation_model: String,
    pub judge_model: String,
    pub security_model: String,
    /// Ordered planner tiers. Empty means `[fast_model, primary_model]`.
    pub planner_tiers: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai_compatible".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            primary_model: "llama-3.3-70b-versatile".to_string(),
            fast_model: "llama-3.1-8b-instant".to_string(),
            generation_model: "llama-3.1-8b-instant".to_string(),
            judge_model: "llama-3.1-8b-instant".to_string(),
            security_model: "llama-3.3-70b-versatile".to_string(),
            planner_tiers: Vec::new(),
            max_tokens: 2048,
            temperature: 0.1,
        }
    }
}

impl LlmConfig {
    pub fn planner_tiers(&self) -> Vec<String> {
        if self.planner_tiers.is_empty() {
            vec![self.fast_model.clone(), self.primary_model.clone()]
        } else {
            self.planner_tiers.clone()
        }
    }

    /// Generation falls back to the fast tier when its own model is locked.
    pub fn generation_tiers(&self) -> Vec<String> {
        let mut tiers = vec![self.generation_model.clone()];
        if self.fast_model != self.generation_model {
            tiers.push(self.fast_model.clone());
        }
        tiers
    }
}

/// Policy constants for the feedback loop. None of these are derived values;
/// they are tunable per deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_retries: u32,
    pub retrieval_gate_threshold: f32,
    pub grounding_retry_threshold: f32,
    pub grounding_abort_threshold: f32,
    pub judge_attempts: u32,
    pub human_review_risk: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retrieval_gate_threshold: 0.75,
            grounding_retry_threshold: 0.60,
            grounding_abort_threshold: 0.30,
            judge_attempts: 3,
            human_review_risk: 0.7,
        }
    }
}

impl PolicyConfig {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    #[default]
    Fastembed,
    /// Feature-hashing bag of words; offline, deterministic
    Hashing,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    #[default]
    CrossEncoder,
    /// Query-term overlap scorer; offline, deterministic
    Lexical,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_expansions: usize,
    pub max_queries: usize,
    pub keyword_min_len: usize,
    pub keyword_baseline_score: f32,
    pub query_cache_ttl_secs: u64,
    pub embedding_cache_ttl_secs: u64,
    pub embedder: EmbedderKind,
    pub reranker: RerankerKind,
    pub db_path: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_expansions: 3,
            max_queries: 4,
            keyword_min_len: 3,
            keyword_baseline_score: 0.5,
            query_cache_ttl_secs: 1800,
            embedding_cache_ttl_secs: 86_400,
            embedder: EmbedderKind::default(),
            reranker: RerankerKind::default(),
            db_path: "lumen.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub model_call_secs: u64,
    pub retrieval_secs: u64,
    pub tool_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            model_call_secs: 30,
            retrieval_secs: 30,
            tool_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub count: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.search.brave.com/res/v1/web/search".to_string(),
            count: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub python_bin: String,
    pub code_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            code_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub cost_per_attempt_usd: f64,
    /// USD per million input tokens
    pub input_rate_per_mtok: f64,
    /// USD per million output tokens
    pub output_rate_per_mtok: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            cost_per_attempt_usd: 0.00015,
            input_rate_per_mtok: 0.59,
            output_rate_per_mtok: 0.79,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = LumenConfig::default();
        assert_eq!(cfg.llm.provider, "openai_compatible");
        assert_eq!(cfg.policy.max_attempts(), 3);
        assert_eq!(cfg.policy.retrieval_gate_threshold, 0.75);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.reranker, RerankerKind::CrossEncoder);
    }

    #[test]
    fn test_default_planner_tiers_fast_then_primary() {
        let cfg = LlmConfig::default();
        assert_eq!(
            cfg.planner_tiers(),
            vec!["llama-3.1-8b-instant".to_string(), "llama-3.3-70b-versatile".to_string()]
        );
    }

    #[test]
    fn test_generation_tiers_deduplicate() {
        let cfg = LlmConfig::default();
        // generation model == fast model by default
        assert_eq!(cfg.generation_tiers().len(), 1);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
provider = "mock"
primary_model = "big"
"#;
        let cfg: LumenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.primary_model, "big");
        // Defaults for unspecified fields
        assert_eq!(cfg.llm.max_tokens, 2048);
        assert_eq!(cfg.policy.grounding_abort_threshold, 0.30);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
provider = "openai_compatible"
base_url = "http://localhost:11434/v1"
planner_tiers = ["a", "b", "c"]

[policy]
max_retries = 4
retrieval_gate_threshold = 0.5
grounding_retry_threshold = 0.7
grounding_abort_threshold = 0.2

[retrieval]
top_k = 8
embedder = "hashing"
reranker = "lexical"
db_path = "data/corpus.db"

[timeouts]
model_call_secs = 5

[web_search]
api_key = "brave"
count = 3

[gateway]
port = 9000
"#;
        let cfg: LumenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.planner_tiers(), vec!["a", "b", "c"]);
        assert_eq!(cfg.policy.max_attempts(), 5);
        assert_eq!(cfg.retrieval.embedder, EmbedderKind::Hashing);
        assert_eq!(cfg.retrieval.reranker, RerankerKind::Lexical);
        assert_eq!(cfg.timeouts.model_call_secs, 5);
        assert_eq!(cfg.timeouts.tool_secs, 30);
        assert_eq!(cfg.web_search.api_key.as_deref(), Some("brave"));
        assert_eq!(cfg.gateway.port, 9000);
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        std::env::set_var("LLM_PROVIDER", "mock");
        std::env::set_var("GROQ_FAST_MODEL", "tiny");

        let mut cfg = LumenConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.fast_model, "tiny");
        assert_eq!(cfg.llm.planner_tiers()[0], "tiny");

        std::env::remove_var("LLM_PROVIDER");
        std::env::remove_var("GROQ_FAST_MODEL");

        let cfg = LumenConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.llm.provider, "openai_compatible");
    }
}
