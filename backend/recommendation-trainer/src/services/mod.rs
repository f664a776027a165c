pub mod aggregation;
pub mod embedding;
pub mod fusion;
pub mod hybrid;
pub mod pruning;
pub mod similarity;

pub use aggregation::{EventAggregator, NormalizedPopularity, PopularityAggregator};
pub use embedding::{EmbeddingEncoder, EmbeddingIndex, SearchStrategy};
pub use fusion::{FusionReranker, FusionWeights};
pub use hybrid::{HybridReranker, LlmProvider, RankingModel};
pub use pruning::ProfilePruner;
pub use similarity::{SimilarityGraphExpander, SimilarityIndex};
