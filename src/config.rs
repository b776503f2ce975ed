//! Steward configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default final rerank cutoff.
const DEFAULT_TOP_K: usize = 5;
/// Default RRF constant from the original rank-fusion paper.
const DEFAULT_RRF_K: u32 = 60;
/// Default minimum top rerank score to avoid fallback.
const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.3;
/// Default optimal chunk length in characters for the rerank length penalty.
const DEFAULT_OPTIMAL_CHUNK_LEN: usize = 500;
/// Default minimum cosine similarity for the vector stage.
const DEFAULT_MIN_VECTOR_SIMILARITY: f32 = 0.3;
/// Default BM25 term frequency saturation.
const DEFAULT_BM25_K1: f64 = 1.5;
/// Default BM25 length normalization.
const DEFAULT_BM25_B: f64 = 0.75;
/// Default confirmation timeout in seconds.
const DEFAULT_HITL_TIMEOUT: u64 = 300;
/// Default confirmation timeout for critical operations.
const DEFAULT_HITL_TIMEOUT_CRITICAL: u64 = 600;
/// Default HITL polling interval in milliseconds.
const DEFAULT_HITL_POLL_INTERVAL_MS: u64 = 2_000;
/// Default SQL row cap for the task agent.
const DEFAULT_SQL_ROW_LIMIT: usize = 100;
/// Default SQL wall-clock timeout in seconds.
const DEFAULT_SQL_TIMEOUT_SECS: u64 = 30;
/// Default recent turns included in composed context.
const DEFAULT_RECENT_TURNS: usize = 10;
/// Default maximum facts included in composed context.
const DEFAULT_MAX_FACTS: usize = 5;
/// Default maximum past-session turns included in composed context.
const DEFAULT_MAX_HISTORY: usize = 3;
/// Default rolling window for past-session search, in days.
const DEFAULT_HISTORY_WINDOW_DAYS: i64 = 30;
/// Default confidence floor below which facts may be swept.
const DEFAULT_MIN_FACT_CONFIDENCE: f64 = 0.2;

/// Fusion strategy for combining vector and lexical rankings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMode {
    /// Reciprocal Rank Fusion (recommended).
    Rrf,
    /// Weighted sum of raw scores.
    Weighted {
        /// Weight applied to vector scores.
        vector: f64,
        /// Weight applied to BM25 scores.
        bm25: f64,
    },
}

/// Rerank signal weights. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    /// Weight for the (normalized) fused score.
    pub original: f64,
    /// Weight for query-token overlap.
    pub keyword: f64,
    /// Weight for the chunk length penalty.
    pub length: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            original: 0.6,
            keyword: 0.3,
            length: 0.1,
        }
    }
}

impl RerankWeights {
    /// Validates that the weights sum to 1 (within floating point tolerance).
    pub fn validate(&self) -> Result<()> {
        let sum = self.original + self.keyword + self.length;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config {
                message: format!("rerank weights must sum to 1, got {sum}"),
            });
        }
        Ok(())
    }
}

/// BM25 scoring parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Config {
    /// Term frequency saturation (1.2-2.0 recommended).
    pub k1: f64,
    /// Length normalization (0-1, where 1 = full normalization).
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: DEFAULT_BM25_K1,
            b: DEFAULT_BM25_B,
        }
    }
}

/// Configuration for the hybrid retrieval engine.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Final rerank cutoff.
    pub top_k: usize,
    /// RRF constant (default 60).
    pub rrf_k: u32,
    /// Fusion strategy.
    pub fusion: FusionMode,
    /// Rerank signal weights.
    pub weights: RerankWeights,
    /// Minimum top rerank score required to avoid the fallback path.
    pub relevance_threshold: f64,
    /// Optimal chunk length for the rerank length penalty.
    pub optimal_chunk_len: usize,
    /// Minimum cosine similarity for a chunk to enter the vector
    /// ranking.
    pub min_vector_similarity: f32,
    /// BM25 parameters.
    pub bm25: Bm25Config,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rrf_k: DEFAULT_RRF_K,
            fusion: FusionMode::Rrf,
            weights: RerankWeights::default(),
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            optimal_chunk_len: DEFAULT_OPTIMAL_CHUNK_LEN,
            min_vector_similarity: DEFAULT_MIN_VECTOR_SIMILARITY,
            bm25: Bm25Config::default(),
        }
    }
}

/// Behavior when a confirmation request expires without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Auto-approve the request's default option.
    Default,
    /// Mark the request as timed out.
    Reject,
}

/// Configuration for the HITL controller.
#[derive(Debug, Clone)]
pub struct HitlConfig {
    /// Master switch. Disabling bypasses all risk checks.
    pub enabled: bool,
    /// Execute low-severity operations without confirmation.
    pub auto_execute_low: bool,
    /// Request expiration for non-critical operations, in seconds.
    pub timeout_default: u64,
    /// Request expiration for critical operations, in seconds.
    pub timeout_critical: u64,
    /// What happens when a request expires.
    pub timeout_action: TimeoutAction,
    /// Polling interval for `wait_for_response`.
    pub poll_interval: Duration,
}

impl Default for HitlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_execute_low: true,
            timeout_default: DEFAULT_HITL_TIMEOUT,
            timeout_critical: DEFAULT_HITL_TIMEOUT_CRITICAL,
            timeout_action: TimeoutAction::Default,
            poll_interval: Duration::from_millis(DEFAULT_HITL_POLL_INTERVAL_MS),
        }
    }
}

/// Execution caps for the task agent's SQL stage.
#[derive(Debug, Clone, Copy)]
pub struct SqlConfig {
    /// Maximum rows returned by a generated query.
    pub row_limit: usize,
    /// Wall-clock timeout for a single query.
    pub timeout: Duration,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_SQL_ROW_LIMIT,
            timeout: Duration::from_secs(DEFAULT_SQL_TIMEOUT_SECS),
        }
    }
}

/// Context composition limits for the memory store.
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    /// Recent turns from the current session.
    pub recent_turns: usize,
    /// Maximum facts matched against the query.
    pub max_facts: usize,
    /// Maximum past-session turns matched against the query.
    pub max_history: usize,
    /// Rolling window for past-session search, in days.
    pub history_window_days: i64,
    /// Facts below this confidence may be removed by the maintenance sweep.
    pub min_fact_confidence: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_turns: DEFAULT_RECENT_TURNS,
            max_facts: DEFAULT_MAX_FACTS,
            max_history: DEFAULT_MAX_HISTORY,
            history_window_days: DEFAULT_HISTORY_WINDOW_DAYS,
            min_fact_confidence: DEFAULT_MIN_FACT_CONFIDENCE,
        }
    }
}

/// Per-provider LLM settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Base URL of the OpenAI-compatible endpoint (None for api.openai.com).
    pub base_url: Option<String>,
    /// API key. Resolved from the provider's environment variable when unset.
    pub api_key: Option<String>,
}

impl ProviderConfig {
    fn new(model: &str, base_url: Option<&str>) -> Self {
        Self {
            model: model.to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            base_url: base_url.map(str::to_string),
            api_key: None,
        }
    }
}

/// LLM provider selection and per-provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Name of the provider used when none is requested explicitly.
    pub default_provider: String,
    /// Provider settings keyed by name.
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig::new("gpt-4o-mini", None),
        );
        providers.insert(
            "naver".to_string(),
            ProviderConfig::new(
                "HCX-005",
                Some("https://clovastudio.stream.ntruss.com/v1/openai"),
            ),
        );
        providers.insert(
            "cerebras".to_string(),
            ProviderConfig::new("llama-3.3-70b", Some("https://api.cerebras.ai/v1")),
        );
        providers.insert(
            "gemini".to_string(),
            ProviderConfig::new(
                "gemini-2.0-flash",
                Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            ),
        );
        Self {
            default_provider: "openai".to_string(),
            providers,
        }
    }
}

impl LlmConfig {
    /// Returns the environment variable holding a provider's API key.
    #[must_use]
    pub fn api_key_env(provider: &str) -> &'static str {
        match provider {
            "naver" => "NAVER_API_KEY",
            "cerebras" => "CEREBRAS_API_KEY",
            "gemini" => "GEMINI_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }
}

/// Top-level configuration for the steward core.
#[derive(Debug, Clone, Default)]
pub struct StewardConfig {
    /// Hybrid retrieval engine settings.
    pub retrieval: RetrievalConfig,
    /// HITL controller settings.
    pub hitl: HitlConfig,
    /// Task agent SQL caps.
    pub sql: SqlConfig,
    /// Memory context limits.
    pub memory: MemoryConfig,
    /// LLM provider settings.
    pub llm: LlmConfig,
}

impl StewardConfig {
    /// Creates a new builder for `StewardConfig`.
    #[must_use]
    pub fn builder() -> StewardConfigBuilder {
        StewardConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`StewardConfig`].
#[derive(Debug, Clone, Default)]
pub struct StewardConfigBuilder {
    top_k: Option<usize>,
    rrf_k: Option<u32>,
    weights: Option<RerankWeights>,
    relevance_threshold: Option<f64>,
    bm25_k1: Option<f64>,
    bm25_b: Option<f64>,
    hitl_enabled: Option<bool>,
    auto_execute_low: Option<bool>,
    timeout_default: Option<u64>,
    timeout_critical: Option<u64>,
    timeout_action: Option<TimeoutAction>,
    sql_row_limit: Option<usize>,
    sql_timeout: Option<Duration>,
    recent_turns: Option<usize>,
    max_facts: Option<usize>,
    history_window_days: Option<i64>,
    default_provider: Option<String>,
}

impl StewardConfigBuilder {
    /// Populates unset fields from `STEWARD_*` environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if self.top_k.is_none() {
            self.top_k = env_parse("STEWARD_TOP_K");
        }
        if self.rrf_k.is_none() {
            self.rrf_k = env_parse("STEWARD_RRF_K");
        }
        if self.relevance_threshold.is_none() {
            self.relevance_threshold = env_parse("STEWARD_RELEVANCE_THRESHOLD");
        }
        if self.bm25_k1.is_none() {
            self.bm25_k1 = env_parse("STEWARD_BM25_K1");
        }
        if self.bm25_b.is_none() {
            self.bm25_b = env_parse("STEWARD_BM25_B");
        }
        if self.hitl_enabled.is_none() {
            self.hitl_enabled = env_parse("STEWARD_HITL_ENABLED");
        }
        if self.auto_execute_low.is_none() {
            self.auto_execute_low = env_parse("STEWARD_HITL_AUTO_EXECUTE_LOW");
        }
        if self.timeout_default.is_none() {
            self.timeout_default = env_parse("STEWARD_HITL_TIMEOUT");
        }
        if self.timeout_critical.is_none() {
            self.timeout_critical = env_parse("STEWARD_HITL_TIMEOUT_CRITICAL");
        }
        if self.timeout_action.is_none() {
            self.timeout_action = std::env::var("STEWARD_HITL_TIMEOUT_ACTION")
                .ok()
                .and_then(|v| match v.as_str() {
                    "default" => Some(TimeoutAction::Default),
                    "reject" => Some(TimeoutAction::Reject),
                    _ => None,
                });
        }
        if self.sql_row_limit.is_none() {
            self.sql_row_limit = env_parse("STEWARD_SQL_ROW_LIMIT");
        }
        if self.sql_timeout.is_none() {
            self.sql_timeout = env_parse::<u64>("STEWARD_SQL_TIMEOUT").map(Duration::from_secs);
        }
        if self.recent_turns.is_none() {
            self.recent_turns = env_parse("STEWARD_MEMORY_RECENT_TURNS");
        }
        if self.max_facts.is_none() {
            self.max_facts = env_parse("STEWARD_MEMORY_MAX_FACTS");
        }
        if self.history_window_days.is_none() {
            self.history_window_days = env_parse("STEWARD_MEMORY_HISTORY_WINDOW_DAYS");
        }
        if self.default_provider.is_none() {
            self.default_provider = std::env::var("STEWARD_PROVIDER").ok();
        }
        self
    }

    /// Sets the final rerank cutoff.
    #[must_use]
    pub const fn top_k(mut self, n: usize) -> Self {
        self.top_k = Some(n);
        self
    }

    /// Sets the RRF constant.
    #[must_use]
    pub const fn rrf_k(mut self, k: u32) -> Self {
        self.rrf_k = Some(k);
        self
    }

    /// Sets the rerank weights.
    #[must_use]
    pub const fn weights(mut self, weights: RerankWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Sets the relevance threshold.
    #[must_use]
    pub const fn relevance_threshold(mut self, t: f64) -> Self {
        self.relevance_threshold = Some(t);
        self
    }

    /// Sets the BM25 parameters.
    #[must_use]
    pub const fn bm25(mut self, k1: f64, b: f64) -> Self {
        self.bm25_k1 = Some(k1);
        self.bm25_b = Some(b);
        self
    }

    /// Enables or disables the HITL layer.
    #[must_use]
    pub const fn hitl_enabled(mut self, enabled: bool) -> Self {
        self.hitl_enabled = Some(enabled);
        self
    }

    /// Sets whether low-severity operations bypass confirmation.
    #[must_use]
    pub const fn auto_execute_low(mut self, enabled: bool) -> Self {
        self.auto_execute_low = Some(enabled);
        self
    }

    /// Sets the default and critical confirmation timeouts, in seconds.
    #[must_use]
    pub const fn hitl_timeouts(mut self, default: u64, critical: u64) -> Self {
        self.timeout_default = Some(default);
        self.timeout_critical = Some(critical);
        self
    }

    /// Sets the timeout action.
    #[must_use]
    pub const fn timeout_action(mut self, action: TimeoutAction) -> Self {
        self.timeout_action = Some(action);
        self
    }

    /// Sets the SQL row limit.
    #[must_use]
    pub const fn sql_row_limit(mut self, n: usize) -> Self {
        self.sql_row_limit = Some(n);
        self
    }

    /// Sets the SQL wall-clock timeout.
    #[must_use]
    pub const fn sql_timeout(mut self, timeout: Duration) -> Self {
        self.sql_timeout = Some(timeout);
        self
    }

    /// Sets the default LLM provider name.
    #[must_use]
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Builds the [`StewardConfig`], validating cross-field invariants.
    pub fn build(self) -> Result<StewardConfig> {
        let weights = self.weights.unwrap_or_default();
        weights.validate()?;

        let mut config = StewardConfig::default();
        config.retrieval.top_k = self.top_k.unwrap_or(DEFAULT_TOP_K);
        config.retrieval.rrf_k = self.rrf_k.unwrap_or(DEFAULT_RRF_K);
        config.retrieval.weights = weights;
        config.retrieval.relevance_threshold = self
            .relevance_threshold
            .unwrap_or(DEFAULT_RELEVANCE_THRESHOLD);
        config.retrieval.bm25.k1 = self.bm25_k1.unwrap_or(DEFAULT_BM25_K1);
        config.retrieval.bm25.b = self.bm25_b.unwrap_or(DEFAULT_BM25_B);

        config.hitl.enabled = self.hitl_enabled.unwrap_or(true);
        config.hitl.auto_execute_low = self.auto_execute_low.unwrap_or(true);
        config.hitl.timeout_default = self.timeout_default.unwrap_or(DEFAULT_HITL_TIMEOUT);
        config.hitl.timeout_critical = self
            .timeout_critical
            .unwrap_or(DEFAULT_HITL_TIMEOUT_CRITICAL);
        config.hitl.timeout_action = self.timeout_action.unwrap_or(TimeoutAction::Default);

        config.sql.row_limit = self.sql_row_limit.unwrap_or(DEFAULT_SQL_ROW_LIMIT);
        config.sql.timeout = self
            .sql_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_SQL_TIMEOUT_SECS));

        config.memory.recent_turns = self.recent_turns.unwrap_or(DEFAULT_RECENT_TURNS);
        config.memory.max_facts = self.max_facts.unwrap_or(DEFAULT_MAX_FACTS);
        config.memory.history_window_days = self
            .history_window_days
            .unwrap_or(DEFAULT_HISTORY_WINDOW_DAYS);

        if let Some(provider) = self.default_provider {
            config.llm.default_provider = provider;
        }

        Ok(config)
    }
}
