// ============================================
// Fusion Reranker
// ============================================
//
// Merges three independently normalized signals per candidate:
//   behavior   = score / max score of the profile
//   embedding  = (cos(profile, item) + 1) / 2
//   popularity = global popularity / max popularity
//
// Candidates are widened with embedding neighbours of the profile vector.
// Fusion only decides selection and order: the stored score stays the raw
// behaviour score (0 for injected neighbours).

use crate::models::{ProfileScores, ScoredItem};
use crate::services::aggregation::NormalizedPopularity;
use crate::services::embedding::EmbeddingIndex;
use crate::sources::ItemCatalog;
use crate::utils::{rank_order, unit_cosine};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub behavior: f64,
    pub embedding: f64,
    pub popularity: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            behavior: 0.6,
            embedding: 0.3,
            popularity: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub weights: FusionWeights,
    /// Neighbours injected per profile = round(top_k * multiplier)
    pub neighbor_multiplier: f64,
    pub top_k: usize,
}

pub struct FusionReranker<'a> {
    config: FusionConfig,
    catalog: &'a ItemCatalog,
    index: &'a EmbeddingIndex,
    popularity: &'a NormalizedPopularity,
}

impl<'a> FusionReranker<'a> {
    pub fn new(
        config: FusionConfig,
        catalog: &'a ItemCatalog,
        index: &'a EmbeddingIndex,
        popularity: &'a NormalizedPopularity,
    ) -> Self {
        Self {
            config,
            catalog,
            index,
            popularity,
        }
    }

    /// False when there is nothing to fuse with; `rerank_all` is then a pass-through.
    pub fn is_enabled(&self) -> bool {
        !self.catalog.is_empty() && self.index.is_active()
    }

    pub fn neighbor_limit(&self) -> usize {
        (self.config.top_k as f64 * self.config.neighbor_multiplier).round() as usize
    }

    pub fn rerank_all(&self, profiles: Vec<ProfileScores>) -> Vec<ProfileScores> {
        if !self.is_enabled() {
            info!(
                catalog_items = self.catalog.len(),
                index_active = self.index.is_active(),
                "Fusion rerank skipped"
            );
            return profiles;
        }

        let reranked: Vec<ProfileScores> =
            profiles.iter().map(|profile| self.rerank(profile)).collect();
        info!(profiles = reranked.len(), "Fusion rerank completed");
        reranked
    }

    pub fn rerank(&self, profile: &ProfileScores) -> ProfileScores {
        if !self.is_enabled() {
            return profile.clone();
        }

        let mut candidates: Vec<ScoredItem> = profile.items.clone();
        let profile_vector = self.index.profile_vector(&profile.items);

        if let Some(vector) = profile_vector.as_ref() {
            let present: HashSet<String> =
                candidates.iter().map(|item| item.item_id.clone()).collect();
            let neighbours = self
                .index
                .nearest(vector.view(), self.neighbor_limit(), &present);
            debug!(
                profile = %profile.key,
                injected = neighbours.len(),
                "Injecting embedding neighbours"
            );
            candidates.extend(
                neighbours
                    .into_iter()
                    .map(|(item_id, _)| ScoredItem::new(item_id, 0.0)),
            );
        }

        let max_behavior = candidates
            .iter()
            .map(|item| item.score)
            .filter(|score| score.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);

        let weights = self.config.weights;
        let mut fused: Vec<(f64, ScoredItem)> = candidates
            .into_iter()
            .map(|item| {
                let behavior = if max_behavior > 0.0 && item.score.is_finite() {
                    item.score / max_behavior
                } else {
                    0.0
                };

                let embedding = match (profile_vector.as_ref(), self.index.vector_of(&item.item_id)) {
                    (Some(user), Some(vector)) => {
                        (f64::from(unit_cosine(user.view(), vector)) + 1.0) / 2.0
                    }
                    _ => 0.0,
                };

                let popularity = self.popularity.get(&item.item_id);

                let score = weights.behavior * behavior
                    + weights.embedding * embedding
                    + weights.popularity * popularity;
                (score, item)
            })
            .collect();

        fused.sort_by(|a, b| rank_order((&a.1.item_id, a.0), (&b.1.item_id, b.0)));
        fused.truncate(self.config.top_k);

        ProfileScores {
            key: profile.key.clone(),
            items: fused.into_iter().map(|(_, item)| item).collect(),
        }
    }
}
