use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Blend weights and result shaping
    pub search: SearchConfig,

    /// Lexical index configuration
    pub lexical: LexicalConfig,

    /// Embedding provider configuration
    pub embedder: EmbedderConfig,

    /// Behavior store configuration
    pub behavior: BehaviorConfig,

    /// Prefix-preserving completion configuration
    pub prefix: PrefixConfig,

    /// Oracle (LLM) configuration
    pub oracle: OracleConfig,

    /// Per-call and total deadlines
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Load configuration from embedded defaults, file, and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: CHATBI_)
            .add_source(
                config::Environment::with_prefix("CHATBI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
            search: SearchConfig::default(),
            lexical: LexicalConfig::default(),
            embedder: EmbedderConfig::default(),
            behavior: BehaviorConfig::default(),
            prefix: PrefixConfig::default(),
            oracle: OracleConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

/// Score blending and result shaping. Keyword and vector weights are
/// expected to sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Multiplier applied to user-preference matches (alpha)
    #[serde(default = "default_personalization_weight")]
    pub personalization_weight: f64,

    /// Additive bonus for an exact last-selection match (beta)
    #[serde(default = "default_last_selection_bonus")]
    pub last_selection_bonus: f64,

    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,

    #[serde(default)]
    pub min_score: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_keyword_weight(),
            vector_weight: default_vector_weight(),
            personalization_weight: default_personalization_weight(),
            last_selection_bonus: default_last_selection_bonus(),
            max_suggestions: default_max_suggestions(),
            min_score: 0.0,
        }
    }
}

impl SearchConfig {
    /// Validate that the blend weights are usable
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.keyword_weight + self.vector_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!(
                "keyword_weight + vector_weight must sum to 1.0, got {}",
                sum
            ));
        }
        if self.keyword_weight < 0.0 || self.vector_weight < 0.0 {
            return Err("blend weights must be non-negative".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Path to the lexical index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Index writer heap size in bytes
    #[serde(default = "default_writer_heap")]
    pub writer_heap_bytes: usize,

    /// Hard cap on results per lexical query
    #[serde(default = "default_lexical_max_results")]
    pub max_results: usize,

    /// Boost for phrase-prefix matches on text
    #[serde(default = "default_phrase_prefix_boost")]
    pub phrase_prefix_boost: f32,

    /// Boost for fuzzy matches on text
    #[serde(default = "default_fuzzy_boost")]
    pub fuzzy_boost: f32,

    /// Boost for exact keyword term matches
    #[serde(default = "default_keyword_term_boost")]
    pub keyword_term_boost: f32,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            writer_heap_bytes: default_writer_heap(),
            max_results: default_lexical_max_results(),
            phrase_prefix_boost: default_phrase_prefix_boost(),
            fuzzy_boost: default_fuzzy_boost(),
            keyword_term_boost: default_keyword_term_boost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Encoder identifier
    #[serde(default = "default_embedder_model")]
    pub model: String,

    /// Embedding dimension; must match the vector index
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Bounded LRU cache capacity (entries)
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,

    /// Inputs longer than this are truncated at a char boundary
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model: default_embedder_model(),
            dimension: default_dimension(),
            cache_size: default_cache_size(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Behavior store backend
    #[serde(default)]
    pub backend: BehaviorBackend,

    /// Redis connection string (for the redis backend)
    pub redis_url: Option<String>,

    /// Key prefix for the redis backend
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Maximum retained history entries per user
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// TTL for the per-(user, query) last-selection key (seconds)
    #[serde(default = "default_preference_ttl")]
    pub preference_ttl_secs: u64,

    /// Bound on preference entries consulted for boosting
    #[serde(default = "default_top_preferences")]
    pub top_preferences: usize,
}

impl BehaviorConfig {
    pub fn preference_ttl(&self) -> Duration {
        Duration::from_secs(self.preference_ttl_secs)
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BehaviorBackend::default(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            history_cap: default_history_cap(),
            preference_ttl_secs: default_preference_ttl(),
            top_preferences: default_top_preferences(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum token count to trigger prefix-preservation mode
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,

    /// Minimum char length of the trailing token
    #[serde(default = "default_min_tail_chars")]
    pub min_tail_chars: usize,

    /// Candidates fetched from the lexical index for the tail
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Completions returned from ranking
    #[serde(default = "default_prefix_result_limit")]
    pub result_limit: usize,

    /// Below this count the engine reports no preserved results
    #[serde(default = "default_min_preserved")]
    pub min_preserved: usize,
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_tokens: default_min_tokens(),
            min_tail_chars: default_min_tail_chars(),
            candidate_limit: default_candidate_limit(),
            result_limit: default_prefix_result_limit(),
            min_preserved: default_min_preserved(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_oracle_provider")]
    pub provider: String,

    /// Chat-completions endpoint URL
    #[serde(default = "default_oracle_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_oracle_timeout")]
    pub timeout_ms: u64,

    /// Upper bound on query expansions requested
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,

    /// Upper bound on generated related queries
    #[serde(default = "default_max_related")]
    pub max_related: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_oracle_provider(),
            endpoint: default_oracle_endpoint(),
            model: default_oracle_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_oracle_timeout(),
            max_expansions: default_max_expansions(),
            max_related: default_max_related(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_lex_timeout")]
    pub lex_ms: u64,

    #[serde(default = "default_vec_timeout")]
    pub vec_ms: u64,

    #[serde(default = "default_embed_timeout")]
    pub embed_ms: u64,

    #[serde(default = "default_behavior_timeout")]
    pub behavior_ms: u64,

    #[serde(default = "default_oracle_timeout")]
    pub oracle_ms: u64,

    #[serde(default = "default_total_timeout")]
    pub total_ms: u64,
}

impl TimeoutConfig {
    pub fn lex(&self) -> Duration {
        Duration::from_millis(self.lex_ms)
    }

    pub fn vec(&self) -> Duration {
        Duration::from_millis(self.vec_ms)
    }

    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    pub fn behavior(&self) -> Duration {
        Duration::from_millis(self.behavior_ms)
    }

    pub fn oracle(&self) -> Duration {
        Duration::from_millis(self.oracle_ms)
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            lex_ms: default_lex_timeout(),
            vec_ms: default_vec_timeout(),
            embed_ms: default_embed_timeout(),
            behavior_ms: default_behavior_timeout(),
            oracle_ms: default_oracle_timeout(),
            total_ms: default_total_timeout(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "chatbi-suggest".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keyword_weight() -> f64 {
    0.7
}

fn default_vector_weight() -> f64 {
    0.3
}

fn default_personalization_weight() -> f64 {
    0.2
}

fn default_last_selection_bonus() -> f64 {
    0.3
}

fn default_max_suggestions() -> usize {
    10
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/lexical_index")
}

fn default_writer_heap() -> usize {
    50_000_000
}

fn default_lexical_max_results() -> usize {
    100
}

fn default_phrase_prefix_boost() -> f32 {
    3.0
}

fn default_fuzzy_boost() -> f32 {
    1.0
}

fn default_keyword_term_boost() -> f32 {
    5.0
}

fn default_embedder_model() -> String {
    "hashed-ngram".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_cache_size() -> u64 {
    10_000
}

fn default_max_input_chars() -> usize {
    512
}

fn default_key_prefix() -> String {
    String::new()
}

fn default_history_cap() -> usize {
    100
}

fn default_preference_ttl() -> u64 {
    2_592_000 // 30 days
}

fn default_top_preferences() -> usize {
    50
}

fn default_min_tokens() -> usize {
    5
}

fn default_min_tail_chars() -> usize {
    1
}

fn default_candidate_limit() -> usize {
    20
}

fn default_prefix_result_limit() -> usize {
    10
}

fn default_min_preserved() -> usize {
    1
}

fn default_oracle_provider() -> String {
    "openai".to_string()
}

fn default_oracle_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_oracle_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_api_key_env() -> String {
    "ORACLE_API_KEY".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    150
}

fn default_lex_timeout() -> u64 {
    200
}

fn default_vec_timeout() -> u64 {
    200
}

fn default_embed_timeout() -> u64 {
    500
}

fn default_behavior_timeout() -> u64 {
    100
}

fn default_oracle_timeout() -> u64 {
    1_000
}

fn default_total_timeout() -> u64 {
    1_500
}

fn default_max_expansions() -> usize {
    3
}

fn default_max_related() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8000);
        assert_eq!(config.search.keyword_weight, 0.7);
        assert_eq!(config.search.vector_weight, 0.3);
        assert_eq!(config.embedder.dimension, 384);
        assert_eq!(config.behavior.history_cap, 100);
        assert_eq!(config.prefix.min_tokens, 5);
        assert_eq!(config.timeouts.total_ms, 1_500);
    }

    #[test]
    fn test_weight_validation() {
        let mut search = SearchConfig::default();
        assert!(search.validate().is_ok());

        search.keyword_weight = 0.9;
        assert!(search.validate().is_err());

        search.vector_weight = 0.1;
        assert!(search.validate().is_ok());
    }

    #[test]
    fn test_behavior_backend_default() {
        assert_eq!(BehaviorBackend::default(), BehaviorBackend::Memory);
    }
}
