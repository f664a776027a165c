use crate::models::{ProfileKey, ProfileMetadata, ProfileScores, ScoreMap, ScoredItem};
use crate::utils::rank_order;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// Items strictly below this total are dropped
    pub min_score: f64,
    /// Maximum items kept per profile
    pub top_k: usize,
    /// Keep only the N profiles with the most events (0 = all).
    ///
    /// This is load shedding for large runs, not a quality filter: a quiet
    /// profile is skipped purely because busier ones came first.
    pub max_profiles: usize,
}

/// Bounded, ranked candidate set per profile.
pub struct ProfilePruner {
    config: PruneConfig,
}

impl ProfilePruner {
    pub fn new(config: PruneConfig) -> Self {
        Self { config }
    }

    /// Profiles come back ordered by activity; empty profiles are not emitted.
    pub fn prune(
        &self,
        scores: &HashMap<ProfileKey, ScoreMap>,
        metadata: &HashMap<ProfileKey, ProfileMetadata>,
    ) -> Vec<ProfileScores> {
        let event_count =
            |key: &ProfileKey| metadata.get(key).map(|m| m.event_count).unwrap_or(0);

        let mut keys: Vec<&ProfileKey> = scores.keys().collect();
        keys.sort_by(|a, b| event_count(b).cmp(&event_count(a)).then_with(|| a.cmp(b)));
        if self.config.max_profiles > 0 && keys.len() > self.config.max_profiles {
            info!(
                total = keys.len(),
                kept = self.config.max_profiles,
                "Shedding profiles beyond max_profiles"
            );
            keys.truncate(self.config.max_profiles);
        }

        let pruned: Vec<ProfileScores> = keys
            .into_iter()
            .filter_map(|key| {
                let items = self.prune_items(&scores[key]);
                if items.is_empty() {
                    debug!(profile = %key, "Profile empty after pruning");
                    None
                } else {
                    Some(ProfileScores {
                        key: key.clone(),
                        items,
                    })
                }
            })
            .collect();

        info!(
            profiles_in = scores.len(),
            profiles_out = pruned.len(),
            min_score = self.config.min_score,
            top_k = self.config.top_k,
            "Profile pruning completed"
        );
        pruned
    }

    fn prune_items(&self, score_map: &ScoreMap) -> Vec<ScoredItem> {
        let mut items: Vec<ScoredItem> = score_map
            .iter()
            .filter(|(_, score)| score.is_finite() && **score >= self.config.min_score)
            .map(|(item_id, score)| ScoredItem::new(item_id.clone(), *score))
            .collect();

        items.sort_by(|a, b| rank_order((&a.item_id, a.score), (&b.item_id, b.score)));
        items.truncate(self.config.top_k);
        items
    }
}
