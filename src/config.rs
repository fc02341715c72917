use crate::error::ConfigError;
use crate::filter::FilterRulesConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Configuration for the language model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model name sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// API key (usually taken from OPENAI_API_KEY instead of the file)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per request, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay of the exponential backoff in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of a single backoff delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random jitter added to each backoff delay, in milliseconds
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

/// Configuration for the response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether responses are cached at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time-to-live of an entry in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// JSON file used to persist entries (in-memory when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// How oversized element sets are reduced before the selection request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OversizeStrategy {
    /// Priority-sort the elements and keep a fraction of them
    Truncate { keep_fraction: f64 },
    /// Split into balanced chunks and query them concurrently
    Chunk { max_chunks: usize },
}

/// Configuration for the selection stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Estimated token count above which the oversize strategy kicks in
    #[serde(default = "default_token_threshold")]
    pub token_threshold: usize,

    /// Strategy for element sets above the threshold
    #[serde(default = "default_oversize_strategy")]
    pub oversize: OversizeStrategy,
}

/// Configuration for the element serializer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializerConfig {
    /// Maximum number of children visited per element
    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Maximum nesting depth of the descriptor tree
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Maximum length of the `text` field
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

/// Which generation strategy turns a selection into a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    /// Deterministic assembly of the selected elements
    Assemble,
    /// Iterative DOM edit operations against the previous document
    Patch,
    /// Whole-document simplification by the model
    Rewrite,
}

/// Configuration for the generation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_strategy")]
    pub strategy: GenerationStrategy,

    /// Stylesheet linked from every generated document
    #[serde(default = "default_theme_stylesheet")]
    pub theme_stylesheet: String,

    /// Maximum number of characters of previous HTML sent with a patch request
    #[serde(default = "default_max_old_html_chars")]
    pub max_old_html_chars: usize,

    /// Maximum number of descriptor nodes sent with a generation request
    #[serde(default = "default_max_prompt_nodes")]
    pub max_prompt_nodes: usize,

    /// Maximum number of tokens of page HTML sent with a rewrite request
    #[serde(default = "default_max_rewrite_tokens")]
    pub max_rewrite_tokens: usize,
}

/// Configuration for the overlay controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Delay between forwarding an action and re-capturing the page
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Mode entered when nothing was persisted yet
    #[serde(default = "default_mode_name")]
    pub default_mode: String,
}

/// Complete configuration of the overlay pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub serializer: SerializerConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub filter: FilterRulesConfig,
}

impl OverlayConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::from_json(&contents)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Apply OPENAI_* environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.is_empty() {
                self.llm.api_url = format!("{}/chat/completions", url.trim_end_matches('/'));
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
        self
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            file: None,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            token_threshold: default_token_threshold(),
            oversize: default_oversize_strategy(),
        }
    }
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            max_children: default_max_children(),
            max_depth: default_max_depth(),
            max_text_len: default_max_text_len(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            strategy: default_generation_strategy(),
            theme_stylesheet: default_theme_stylesheet(),
            max_old_html_chars: default_max_old_html_chars(),
            max_prompt_nodes: default_max_prompt_nodes(),
            max_rewrite_tokens: default_max_rewrite_tokens(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            default_mode: default_mode_name(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

/// 24 hours
fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_token_threshold() -> usize {
    12_000
}

fn default_oversize_strategy() -> OversizeStrategy {
    OversizeStrategy::Chunk { max_chunks: 3 }
}

fn default_max_children() -> usize {
    200
}

fn default_max_depth() -> usize {
    32
}

fn default_max_text_len() -> usize {
    100
}

fn default_generation_strategy() -> GenerationStrategy {
    GenerationStrategy::Assemble
}

fn default_theme_stylesheet() -> String {
    "retro-theme.css".to_string()
}

fn default_max_old_html_chars() -> usize {
    20_000
}

fn default_max_prompt_nodes() -> usize {
    400
}

fn default_max_rewrite_tokens() -> usize {
    150_000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_mode_name() -> String {
    "normal".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OverlayConfig::from_json("{}").unwrap();
        assert_eq!(config.serializer.max_children, 200);
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert!(config.cache.enabled);
        assert_eq!(config.generation.strategy, GenerationStrategy::Assemble);
        assert_eq!(
            config.selection.oversize,
            OversizeStrategy::Chunk { max_chunks: 3 }
        );
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "llm": { "model": "local-model", "max_attempts": 5 },
            "selection": { "oversize": { "kind": "truncate", "keep_fraction": 0.5 } },
            "generation": { "strategy": "patch" },
            "controller": { "settle_delay_ms": 0 }
        }"#;
        let config = OverlayConfig::from_json(json).unwrap();
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.llm.max_attempts, 5);
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(
            config.selection.oversize,
            OversizeStrategy::Truncate { keep_fraction: 0.5 }
        );
        assert_eq!(config.generation.strategy, GenerationStrategy::Patch);
        assert_eq!(config.controller.settle_delay_ms, 0);
    }

    #[test]
    fn test_filter_section() {
        let json = r#"{"filter": {"keyword_patterns": ["(?i)wishlist"]}}"#;
        let config = OverlayConfig::from_json(json).unwrap();
        assert_eq!(config.filter.keyword_patterns, vec!["(?i)wishlist"]);
        assert!(!config.filter.action_patterns.is_empty());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlay.json");
        std::fs::write(&path, r#"{"cache": {"enabled": false}}"#).unwrap();

        let config = OverlayConfig::from_file(&path).unwrap();
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            OverlayConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
