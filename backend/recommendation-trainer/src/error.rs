use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainerError>;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event source error: {0}")]
    Source(String),

    #[error("Item metadata error: {0}")]
    Metadata(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
