// ============================================
// Recommendation Training Job
// ============================================
//
// One batch pass over the feedback store:
// 1. Fetch events inside the lookback window
// 2. Aggregate behaviour scores, global popularity, prune per profile
// 3. With item metadata: embedding fusion, similarity expansion and the
//    hybrid (LLM or heuristic) rerank, profiles processed concurrently
// 4. Upsert profile scores and recommendations (skipped on dry runs)
// 5. Emit one run report
//
// Usage:
//   recommendation-trainer            (reads RECO_*, EMBEDDING_*, LLM_* and REDIS_URL)

use crate::config::Config;
use crate::error::Result;
use crate::models::{FallbackReason, ProfileKey, ProfileScores, RankingMode, ScoredItem};
use crate::services::aggregation::{
    aggregate_events, AggregationStats, NormalizedPopularity, PopularityAggregator,
};
use crate::services::embedding::{EmbeddingEncoder, EmbeddingIndex, OpenAiEncoder, SearchStrategy};
use crate::services::fusion::{FusionConfig, FusionReranker, FusionWeights};
use crate::services::hybrid::{HybridReranker, RankingModel};
use crate::services::pruning::{ProfilePruner, PruneConfig};
use crate::services::similarity::{SimilarityGraphExpander, SimilarityIndex};
use crate::sinks::{
    ProfileScoresRecord, RecommendationRecord, RecommendationSink, RedisSink, RunParameters,
};
use crate::sources::{window_start, EventSource, ItemCatalog, JsonLinesEventSource};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Machine-readable summary of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub parameters: RunParameters,
    pub max_profiles: usize,
    pub events: AggregationStats,
    pub profiles_processed: usize,
    pub profiles_updated: usize,
    pub recommendations_updated: usize,
    pub dry_run: bool,
    pub item_metadata_included: bool,
    pub embedding_rerank_enabled: bool,
    pub embedding_model: Option<String>,
    pub embedding_weights: FusionWeights,
    pub search_strategy: SearchStrategy,
    pub similarity_rerank_enabled: bool,
    pub llm_provider: Option<String>,
    pub llm_ranked: usize,
    pub heuristic_ranked: usize,
    pub fallback_reasons: BTreeMap<FallbackReason, u64>,
    pub profile_modes: BTreeMap<ProfileKey, RankingMode>,
    pub duration_ms: u64,
}

/// Final list of one profile, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecommendation {
    pub key: ProfileKey,
    pub items: Vec<ScoredItem>,
    /// `None` when the final rerank was skipped
    pub mode: Option<RankingMode>,
    pub fallback: Option<FallbackReason>,
    pub candidate_count: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub recommendations: Vec<ProfileRecommendation>,
    pub report: RunReport,
}

pub struct TrainingJob {
    config: Config,
    events: Arc<dyn EventSource>,
    sink: Arc<dyn RecommendationSink>,
    catalog: Arc<ItemCatalog>,
    encoder: Option<Arc<dyn EmbeddingEncoder>>,
    model: RankingModel,
}

impl TrainingJob {
    pub fn new(
        config: Config,
        events: Arc<dyn EventSource>,
        sink: Arc<dyn RecommendationSink>,
    ) -> Self {
        Self {
            config,
            events,
            sink,
            catalog: Arc::new(ItemCatalog::empty()),
            encoder: None,
            model: RankingModel::Disabled,
        }
    }

    pub fn with_catalog(mut self, catalog: ItemCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn EmbeddingEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_ranking_model(mut self, model: RankingModel) -> Self {
        self.model = model;
        self
    }

    /// Wire the production collaborators described by `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(JsonLinesEventSource::new(&config.pipeline.events_path));
        let sink = Arc::new(RedisSink::new(&config.sink.redis_url, &config.sink.key_prefix)?);

        let catalog = match config.pipeline.item_metadata_path.as_deref() {
            Some(path) => ItemCatalog::load_json(path).await?,
            None => {
                info!("No item metadata configured, reranking stages are skipped");
                ItemCatalog::empty()
            }
        };

        let encoder: Option<Arc<dyn EmbeddingEncoder>> =
            match (config.embedding.enabled, config.embedding.api_key.as_deref()) {
                (true, Some(api_key)) => {
                    Some(Arc::new(OpenAiEncoder::new(api_key, &config.embedding.model)?))
                }
                (true, None) => {
                    info!("No embedding API key configured, embedding rerank is skipped");
                    None
                }
                (false, _) => None,
            };

        let model = RankingModel::from_config(&config.llm)?;

        let mut job = Self::new(config, events, sink)
            .with_catalog(catalog)
            .with_ranking_model(model);
        if let Some(encoder) = encoder {
            job = job.with_encoder(encoder);
        }
        Ok(job)
    }

    pub async fn run(&self) -> Result<RunReport> {
        Ok(self.run_with_output().await?.report)
    }

    pub async fn run_with_output(&self) -> Result<TrainingOutput> {
        self.config.validate()?;

        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let now = Utc::now();
        let pipeline = &self.config.pipeline;
        let parameters = RunParameters {
            history_days: pipeline.history_days,
            min_score: pipeline.min_score,
            top_k: pipeline.top_k,
        };

        info!(
            run_id = %run_id,
            history_days = pipeline.history_days,
            min_score = pipeline.min_score,
            top_k = pipeline.top_k,
            dry_run = pipeline.dry_run,
            "Starting recommendation training run"
        );

        // Step 1: events
        let since = window_start(pipeline.history_days, now);
        let events = self.events.fetch_events(since).await?;

        // Step 2: behaviour scores, popularity, pruning
        let aggregated = aggregate_events(events.iter());
        if aggregated.stats.dropped_total() > 0 {
            warn!(
                dropped = aggregated.stats.dropped_total(),
                accepted = aggregated.stats.events_accepted,
                "Dropped malformed feedback events"
            );
        }
        let popularity =
            NormalizedPopularity::from_raw(&PopularityAggregator::aggregate(&aggregated.scores));

        let pruned = ProfilePruner::new(PruneConfig {
            min_score: pipeline.min_score,
            top_k: pipeline.top_k,
            max_profiles: pipeline.max_profiles,
        })
        .prune(&aggregated.scores, &aggregated.metadata);

        // Step 3: reranking
        let (recommendations, embedding_model, embedding_enabled) = if self.catalog.is_empty() {
            info!("Item metadata unavailable, keeping pruned scores as recommendations");
            (Self::pass_through(&pruned), None, false)
        } else {
            self.rerank(&pruned, &popularity).await
        };

        // Step 4: persistence
        let mut profiles_updated = 0;
        let mut recommendations_updated = 0;
        if pipeline.dry_run {
            info!(profiles = recommendations.len(), "Dry run, skipping persistence");
        } else {
            let pruned_by_key: HashMap<&ProfileKey, &ProfileScores> =
                pruned.iter().map(|profile| (&profile.key, profile)).collect();

            for recommendation in &recommendations {
                let scores = pruned_by_key
                    .get(&recommendation.key)
                    .map(|profile| profile.items.clone())
                    .unwrap_or_default();
                self.sink
                    .upsert_profile_scores(ProfileScoresRecord::new(
                        recommendation.key.clone(),
                        scores,
                        aggregated.metadata.get(&recommendation.key),
                        parameters,
                        now,
                    ))
                    .await?;
                profiles_updated += 1;

                self.sink
                    .upsert_recommendations(RecommendationRecord::new(
                        recommendation.key.clone(),
                        &recommendation.items,
                        recommendation.candidate_count,
                        recommendation.mode,
                        parameters,
                        now,
                    ))
                    .await?;
                recommendations_updated += 1;
            }
        }

        // Step 5: report
        let mut fallback_reasons: BTreeMap<FallbackReason, u64> = BTreeMap::new();
        let mut profile_modes = BTreeMap::new();
        for recommendation in &recommendations {
            if let Some(mode) = recommendation.mode {
                profile_modes.insert(recommendation.key.clone(), mode);
            }
            if let Some(reason) = recommendation.fallback {
                *fallback_reasons.entry(reason).or_insert(0) += 1;
            }
        }
        let count_mode = |mode: RankingMode| profile_modes.values().filter(|m| **m == mode).count();

        let report = RunReport {
            run_id,
            generated_at: now,
            parameters,
            max_profiles: pipeline.max_profiles,
            events: aggregated.stats.clone(),
            profiles_processed: pruned.len(),
            profiles_updated,
            recommendations_updated,
            dry_run: pipeline.dry_run,
            item_metadata_included: !self.catalog.is_empty(),
            embedding_rerank_enabled: embedding_enabled,
            embedding_model,
            embedding_weights: pipeline.fusion_weights(),
            search_strategy: self.config.embedding.search_strategy,
            similarity_rerank_enabled: !self.catalog.is_empty(),
            llm_provider: self.model.describe(),
            llm_ranked: count_mode(RankingMode::Llm),
            heuristic_ranked: count_mode(RankingMode::Heuristic),
            fallback_reasons,
            profile_modes,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            run_id = %report.run_id,
            events_seen = report.events.events_seen,
            events_dropped = report.events.dropped_total(),
            profiles_processed = report.profiles_processed,
            profiles_updated = report.profiles_updated,
            recommendations_updated = report.recommendations_updated,
            embedding_rerank = report.embedding_rerank_enabled,
            llm_ranked = report.llm_ranked,
            heuristic_ranked = report.heuristic_ranked,
            duration_ms = report.duration_ms,
            "Recommendation training run completed"
        );

        Ok(TrainingOutput {
            recommendations,
            report,
        })
    }

    fn pass_through(pruned: &[ProfileScores]) -> Vec<ProfileRecommendation> {
        pruned
            .iter()
            .map(|profile| ProfileRecommendation {
                key: profile.key.clone(),
                items: profile.items.clone(),
                mode: None,
                fallback: None,
                candidate_count: profile.items.len(),
            })
            .collect()
    }

    /// Fusion, expansion and final rank. Shared indexes are built before any
    /// profile is processed and only read afterwards.
    async fn rerank(
        &self,
        pruned: &[ProfileScores],
        popularity: &NormalizedPopularity,
    ) -> (Vec<ProfileRecommendation>, Option<String>, bool) {
        let pipeline = &self.config.pipeline;

        let index = EmbeddingIndex::build(
            &self.catalog,
            self.encoder.as_deref(),
            self.config.embedding.batch_size,
            self.config.embedding.search_strategy,
        )
        .await;
        let fusion = FusionReranker::new(
            FusionConfig {
                weights: pipeline.fusion_weights(),
                neighbor_multiplier: pipeline.neighbor_multiplier,
                top_k: pipeline.top_k,
            },
            &self.catalog,
            &index,
            popularity,
        );
        let embedding_enabled = fusion.is_enabled();
        let fused = fusion.rerank_all(pruned.to_vec());

        let similarity = SimilarityIndex::build(&self.catalog);
        let expander = SimilarityGraphExpander::new(&self.catalog, &similarity);
        let reranker = HybridReranker::new(self.model.clone(), self.config.llm.timeout, pipeline.top_k);

        let recommendations: Vec<ProfileRecommendation> = stream::iter(fused)
            .map(|profile| {
                let expander = &expander;
                let reranker = &reranker;
                async move {
                    let candidates = expander.expand(&profile);
                    let candidate_count = candidates.len();
                    let outcome = reranker.rank(&profile.key, candidates).await;
                    ProfileRecommendation {
                        key: profile.key,
                        items: outcome.items,
                        mode: Some(outcome.mode),
                        fallback: outcome.fallback,
                        candidate_count,
                    }
                }
            })
            .buffered(pipeline.concurrency)
            .collect()
            .await;

        (
            recommendations,
            index.model().map(str::to_string),
            embedding_enabled,
        )
    }
}
