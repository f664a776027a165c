// ============================================
// Batch Jobs
// ============================================
//
// The training job runs as a one-shot process (Kubernetes CronJob or a
// manual invocation) and exits once the run report has been emitted.

pub mod training;

pub use training::{ProfileRecommendation, RunReport, TrainingJob, TrainingOutput};
