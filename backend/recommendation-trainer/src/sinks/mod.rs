// ============================================
// Output Sinks
// ============================================
//
// Two records per profile, both upserted by profile key:
// - profile scores: ordered behaviour scores plus engagement diagnostics
// - recommendations: ordered item ids served to the profile
//
// `created_at` of an existing record survives every upsert.

pub mod memory;
pub mod redis_sink;

pub use memory::InMemorySink;
pub use redis_sink::RedisSink;

use crate::error::Result;
use crate::models::{ProfileKey, ProfileMetadata, RankingMode, ScoredItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version tag written on every recommendation record.
pub const MODEL_VERSION: &str = "profile_score_v1";

#[async_trait]
pub trait RecommendationSink: Send + Sync {
    async fn upsert_profile_scores(&self, record: ProfileScoresRecord) -> Result<()>;

    async fn upsert_recommendations(&self, record: RecommendationRecord) -> Result<()>;
}

/// Parameters a run was executed with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParameters {
    pub history_days: u32,
    pub min_score: f64,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileScoresRecord {
    pub profile_key: ProfileKey,
    pub scores: Vec<ScoredItem>,
    pub total_score: f64,
    pub event_breakdown: BTreeMap<String, u64>,
    pub event_count: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub history_days: u32,
    pub min_score: f64,
    pub top_k: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileScoresRecord {
    pub fn new(
        profile_key: ProfileKey,
        scores: Vec<ScoredItem>,
        metadata: Option<&ProfileMetadata>,
        parameters: RunParameters,
        now: DateTime<Utc>,
    ) -> Self {
        let total_score = scores.iter().map(|item| item.score).sum();
        let metadata = metadata.cloned().unwrap_or_default();
        Self {
            profile_key,
            scores,
            total_score,
            event_breakdown: metadata.event_types,
            event_count: metadata.event_count,
            last_event_at: metadata.last_event_at,
            history_days: parameters.history_days,
            min_score: parameters.min_score,
            top_k: parameters.top_k,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRecord {
    pub profile_key: ProfileKey,
    pub item_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub top_k: usize,
    pub candidate_count: usize,
    pub model_version: String,
    /// `None` when the profile skipped the final rerank (no item metadata)
    pub ranking_mode: Option<RankingMode>,
    pub parameters: RunParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecommendationRecord {
    pub fn new(
        profile_key: ProfileKey,
        items: &[ScoredItem],
        candidate_count: usize,
        ranking_mode: Option<RankingMode>,
        parameters: RunParameters,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            profile_key,
            item_ids: items.iter().map(|item| item.item_id.clone()).collect(),
            generated_at: now,
            top_k: parameters.top_k,
            candidate_count,
            model_version: MODEL_VERSION.to_string(),
            ranking_mode,
            parameters,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parameters() -> RunParameters {
        RunParameters {
            history_days: 90,
            min_score: 0.2,
            top_k: 25,
        }
    }

    #[test]
    fn test_profile_record_carries_diagnostics() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut metadata = ProfileMetadata::default();
        metadata.record(&crate::models::Event::for_user(1, 10, "purchase").at(now));

        let record = ProfileScoresRecord::new(
            ProfileKey::new("user:1"),
            vec![ScoredItem::new("10", 6.0), ScoredItem::new("11", 0.5)],
            Some(&metadata),
            parameters(),
            now,
        );
        assert!((record.total_score - 6.5).abs() < 1e-9);
        assert_eq!(record.event_count, 1);
        assert_eq!(record.event_breakdown.get("purchase"), Some(&1));
        assert_eq!(record.last_event_at, Some(now));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["profileKey"], "user:1");
        assert_eq!(json["eventBreakdown"]["purchase"], 1);
        assert_eq!(json["topK"], 25);
    }

    #[test]
    fn test_recommendation_record_shape() {
        let now = Utc::now();
        let record = RecommendationRecord::new(
            ProfileKey::new("session:abc"),
            &[ScoredItem::new("3", 1.0), ScoredItem::new("1", 2.0)],
            7,
            Some(RankingMode::Heuristic),
            parameters(),
            now,
        );
        assert_eq!(record.item_ids, vec!["3", "1"]);
        assert_eq!(record.model_version, MODEL_VERSION);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["rankingMode"], "heuristic");
        assert_eq!(json["candidateCount"], 7);
        assert_eq!(json["parameters"]["historyDays"], 90);
    }
}
