pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod sinks;
pub mod sources;
pub mod utils;

pub use config::Config;
pub use error::{Result, TrainerError};
pub use jobs::{RunReport, TrainingJob};
