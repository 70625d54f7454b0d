use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::curator::gate::QualityGate;
use crate::error::{RecallError, Result};
use crate::memory::focus::{FocusPreset, FocusTable};

/// Main configuration structure for Recall
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Retrieval engine configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Background task queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Fact consolidation configuration
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Remote extraction/judgment API configuration
    #[serde(default)]
    pub curator: CuratorConfig,
    /// Context assembly configuration
    #[serde(default)]
    pub context: ContextConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists, falling back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".recall").join("config.toml")),
            dirs::config_dir().map(|c| c.join("recall").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Read and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecallError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate TOML config text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| RecallError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        FocusTable::new(self.retrieval.focus_levels.clone())?;

        if self.storage.embedding_dimension == 0 {
            return Err(RecallError::Config(
                "storage.embedding_dimension must be greater than zero".to_string(),
            ));
        }
        if self.queue.workers == 0 {
            return Err(RecallError::Config(
                "queue.workers must be at least 1".to_string(),
            ));
        }
        if self.queue.default_max_attempts == 0 {
            return Err(RecallError::Config(
                "queue.default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retrieval.over_fetch_factor == 0 {
            return Err(RecallError::Config(
                "retrieval.over_fetch_factor must be at least 1".to_string(),
            ));
        }
        if !QualityGate::from_config(&self.consolidation).is_enabled() {
            return Err(RecallError::Config(
                "consolidation needs min_confidence <= 1.0 or min_occurrences >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the LanceDB tables
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Fixed embedding dimension for this deployment
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".recall"))
        .unwrap_or_else(|| PathBuf::from(".recall"))
}

fn default_embedding_dimension() -> usize {
    384
}

/// Embedding model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier; also used as the stored version tag
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "multilingual-e5-small".to_string()
}

/// Retrieval engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Over-fetch multiplier applied to the focus result limit
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    /// How many top semantic results seed graph expansion
    #[serde(default = "default_expansion_seeds")]
    pub expansion_seeds: usize,
    /// Visited-node cap for a single seed's traversal
    #[serde(default = "default_max_expansion_nodes")]
    pub max_expansion_nodes: usize,
    /// Cap on expansion ids across all seeds
    #[serde(default = "default_max_expansion_total")]
    pub max_expansion_total: usize,
    /// Token budget for the synthesized memory block
    #[serde(default = "default_synthesis_token_budget")]
    pub synthesis_token_budget: usize,
    /// Cosine similarity floor for semantic-phase candidates
    #[serde(default)]
    pub min_similarity: f32,
    /// The six focus presets, level 0 first
    #[serde(default = "FocusPreset::default_levels")]
    pub focus_levels: Vec<FocusPreset>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: default_over_fetch_factor(),
            expansion_seeds: default_expansion_seeds(),
            max_expansion_nodes: default_max_expansion_nodes(),
            max_expansion_total: default_max_expansion_total(),
            synthesis_token_budget: default_synthesis_token_budget(),
            min_similarity: 0.0,
            focus_levels: FocusPreset::default_levels(),
        }
    }
}

fn default_over_fetch_factor() -> usize {
    2
}

fn default_expansion_seeds() -> usize {
    5
}

fn default_max_expansion_nodes() -> usize {
    32
}

fn default_max_expansion_total() -> usize {
    64
}

fn default_synthesis_token_budget() -> usize {
    2000
}

/// Background task queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts allowed when the caller does not specify
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// First retry delay in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Upper bound on the retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// How often idle workers re-check for delayed retries
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Finished tasks older than this are purged (0 keeps them forever)
    #[serde(default = "default_finished_retention_hours")]
    pub finished_retention_hours: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            finished_retention_hours: default_finished_retention_hours(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_finished_retention_hours() -> u64 {
    24 * 7
}

/// Fact consolidation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Promote a staged fact once its best confidence reaches this value
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Option<f32>,
    /// Promote a staged fact once this many distinct interactions produced it
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: Option<u32>,
    /// Judgment score needed to mark an open question resolved
    #[serde(default = "default_reflect_threshold")]
    pub reflect_threshold: f32,
    /// Confidence assigned to triples that arrive without one
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f32,
    /// Owner used for legacy payloads that carry no owner
    #[serde(default = "default_owner_id")]
    pub default_owner_id: String,
    /// Cap on relates_to/contradicts links created per promoted fact
    #[serde(default = "default_max_related_links")]
    pub max_related_links: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_occurrences: default_min_occurrences(),
            reflect_threshold: default_reflect_threshold(),
            fallback_confidence: default_fallback_confidence(),
            default_owner_id: default_owner_id(),
            max_related_links: default_max_related_links(),
        }
    }
}

fn default_min_confidence() -> Option<f32> {
    Some(0.8)
}

fn default_min_occurrences() -> Option<u32> {
    Some(2)
}

fn default_reflect_threshold() -> f32 {
    0.75
}

fn default_fallback_confidence() -> f32 {
    0.5
}

fn default_owner_id() -> String {
    "default".to_string()
}

fn default_max_related_links() -> usize {
    5
}

/// Remote (OpenAI-compatible) extraction and judgment configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CuratorConfig {
    /// API endpoint URL
    #[serde(default = "default_curator_api_url")]
    pub api_url: String,
    /// Model name
    #[serde(default = "default_curator_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_curator_api_key_env")]
    pub api_key_env: String,
    /// Request timeout in seconds
    #[serde(default = "default_curator_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per request on rate limiting (HTTP 429) or transport errors
    #[serde(default = "default_curator_max_retries")]
    pub max_retries: u32,
    /// First delay between those attempts, doubled each time
    #[serde(default = "default_curator_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            api_url: default_curator_api_url(),
            model: default_curator_model(),
            api_key_env: default_curator_api_key_env(),
            timeout_secs: default_curator_timeout_secs(),
            max_retries: default_curator_max_retries(),
            retry_delay_ms: default_curator_retry_delay_ms(),
        }
    }
}

fn default_curator_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_curator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_curator_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_curator_timeout_secs() -> u64 {
    60
}

fn default_curator_max_retries() -> u32 {
    3
}

fn default_curator_retry_delay_ms() -> u64 {
    1000
}

/// Context assembly configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Core identity block always offered to the model
    #[serde(default)]
    pub core_identity: String,
    /// Maximum entries kept in a working-memory buffer
    #[serde(default = "default_working_memory_max_entries")]
    pub working_memory_max_entries: usize,
    /// Also enqueue a reflect task when the owner has open questions
    #[serde(default = "default_enqueue_reflect")]
    pub enqueue_reflect: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            core_identity: String::new(),
            working_memory_max_entries: default_working_memory_max_entries(),
            enqueue_reflect: default_enqueue_reflect(),
        }
    }
}

fn default_working_memory_max_entries() -> usize {
    20
}

fn default_enqueue_reflect() -> bool {
    true
}
