use crate::error::{Result, TrainerError};
use crate::services::embedding::SearchStrategy;
use crate::services::fusion::FusionWeights;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub sink: SinkConfig,
}

/// Run parameters, read from `RECO_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Only events from the last N days (0 = unbounded)
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Load shedding: keep only the N most active profiles (0 = all)
    #[serde(default)]
    pub max_profiles: usize,
    #[serde(default)]
    pub dry_run: bool,
    /// Profiles reranked concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_neighbor_multiplier")]
    pub neighbor_multiplier: f64,
    #[serde(default = "default_behavior_weight")]
    pub behavior_weight: f64,
    #[serde(default = "default_embedding_weight")]
    pub embedding_weight: f64,
    #[serde(default = "default_popularity_weight")]
    pub popularity_weight: f64,
    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,
    #[serde(default)]
    pub item_metadata_path: Option<PathBuf>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_history_days() -> u32 {
    90
}

fn default_min_score() -> f64 {
    0.2
}

fn default_top_k() -> usize {
    25
}

fn default_concurrency() -> usize {
    8
}

fn default_neighbor_multiplier() -> f64 {
    1.5
}

fn default_behavior_weight() -> f64 {
    0.6
}

fn default_embedding_weight() -> f64 {
    0.3
}

fn default_popularity_weight() -> f64 {
    0.1
}

fn default_events_path() -> PathBuf {
    PathBuf::from("data/recommendation_feedbacks.jsonl")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_days: default_history_days(),
            min_score: default_min_score(),
            top_k: default_top_k(),
            max_profiles: 0,
            dry_run: false,
            concurrency: default_concurrency(),
            neighbor_multiplier: default_neighbor_multiplier(),
            behavior_weight: default_behavior_weight(),
            embedding_weight: default_embedding_weight(),
            popularity_weight: default_popularity_weight(),
            events_path: default_events_path(),
            item_metadata_path: None,
            report_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn fusion_weights(&self) -> FusionWeights {
        FusionWeights {
            behavior: self.behavior_weight,
            embedding: self.embedding_weight,
            popularity: self.popularity_weight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(TrainerError::Config("top_k must be at least 1".to_string()));
        }
        if !self.min_score.is_finite() {
            return Err(TrainerError::Config("min_score must be finite".to_string()));
        }
        if self.concurrency == 0 {
            return Err(TrainerError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !self.neighbor_multiplier.is_finite() || self.neighbor_multiplier < 0.0 {
            return Err(TrainerError::Config(format!(
                "neighbor_multiplier must be a non-negative number, got {}",
                self.neighbor_multiplier
            )));
        }
        let weights = [
            ("behavior_weight", self.behavior_weight),
            ("embedding_weight", self.embedding_weight),
            ("popularity_weight", self.popularity_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(TrainerError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        Ok(())
    }
}

/// Embedding encoder settings, read from `EMBEDDING_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub search_strategy: SearchStrategy,
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            search_strategy: SearchStrategy::default(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_model: String,
    pub gemini_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            openai_api_key: None,
            gemini_api_key: None,
            openai_model: "gpt-4.1-mini".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            temperature: 0.15,
            max_tokens: 600,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "reco".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let pipeline: PipelineConfig = envy::prefixed("RECO_")
            .from_env()
            .map_err(|e| TrainerError::Config(e.to_string()))?;

        let openai_key = first_env(&["OPENAI_API_KEY", "LLM_API_KEY"]);
        let gemini_key = first_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]);

        let mut embedding: EmbeddingConfig = envy::prefixed("EMBEDDING_")
            .from_env()
            .map_err(|e| TrainerError::Config(e.to_string()))?;
        embedding.api_key = openai_key.clone();

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            enabled: parse_env("LLM_ENABLED", true)?,
            openai_api_key: openai_key,
            gemini_api_key: gemini_key,
            openai_model: first_env(&["LLM_MODEL", "OPENAI_LLM_MODEL"])
                .unwrap_or(llm_defaults.openai_model),
            gemini_model: first_env(&["LLM_MODEL", "GEMINI_LLM_MODEL"])
                .unwrap_or(llm_defaults.gemini_model),
            temperature: parse_env("LLM_TEMPERATURE", llm_defaults.temperature)?,
            max_tokens: parse_env("LLM_MAX_TOKENS", llm_defaults.max_tokens)?,
            timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 30u64)?),
        };

        let sink_defaults = SinkConfig::default();
        let sink = SinkConfig {
            redis_url: env::var("REDIS_URL").unwrap_or(sink_defaults.redis_url),
            key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or(sink_defaults.key_prefix),
        };

        let config = Config {
            pipeline,
            embedding,
            llm,
            sink,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.embedding.batch_size == 0 {
            return Err(TrainerError::Config(
                "EMBEDDING_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.llm.timeout.is_zero() {
            return Err(TrainerError::Config(
                "LLM_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| TrainerError::Config(format!("{} must be valid: {}", name, e))),
        Err(_) => Ok(default),
    }
}
