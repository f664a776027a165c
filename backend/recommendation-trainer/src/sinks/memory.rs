use super::{ProfileScoresRecord, RecommendationRecord, RecommendationSink};
use crate::error::Result;
use crate::models::ProfileKey;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Sink kept in process memory (tests, dry inspection).
#[derive(Debug, Default)]
pub struct InMemorySink {
    profiles: RwLock<HashMap<ProfileKey, ProfileScoresRecord>>,
    recommendations: RwLock<HashMap<ProfileKey, RecommendationRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile_scores(&self, key: &ProfileKey) -> Option<ProfileScoresRecord> {
        self.profiles.read().await.get(key).cloned()
    }

    pub async fn recommendations(&self, key: &ProfileKey) -> Option<RecommendationRecord> {
        self.recommendations.read().await.get(key).cloned()
    }

    pub async fn profile_count(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn recommendation_count(&self) -> usize {
        self.recommendations.read().await.len()
    }
}

#[async_trait]
impl RecommendationSink for InMemorySink {
    async fn upsert_profile_scores(&self, mut record: ProfileScoresRecord) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        if let Some(existing) = profiles.get(&record.profile_key) {
            record.created_at = existing.created_at;
        }
        profiles.insert(record.profile_key.clone(), record);
        Ok(())
    }

    async fn upsert_recommendations(&self, mut record: RecommendationRecord) -> Result<()> {
        let mut recommendations = self.recommendations.write().await;
        if let Some(existing) = recommendations.get(&record.profile_key) {
            record.created_at = existing.created_at;
        }
        recommendations.insert(record.profile_key.clone(), record);
        Ok(())
    }
}
