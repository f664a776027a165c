use crate::models::{ProfileKey, ScoreMap};
use crate::utils::normalize_score;
use std::collections::{BTreeMap, HashMap};

/// Global popularity: sum of every profile's score per item.
///
/// Must run on the unpruned score maps so popularity reflects the full signal.
pub struct PopularityAggregator;

impl PopularityAggregator {
    pub fn aggregate(scores: &HashMap<ProfileKey, ScoreMap>) -> HashMap<String, f64> {
        // Profiles visited in key order for a reproducible floating-point sum
        let ordered: BTreeMap<&ProfileKey, &ScoreMap> = scores.iter().collect();

        let mut popularity: HashMap<String, f64> = HashMap::new();
        for score_map in ordered.values() {
            let mut items: Vec<(&String, &f64)> = score_map.iter().collect();
            items.sort_by(|a, b| a.0.cmp(b.0));
            for (item_id, score) in items {
                *popularity.entry(item_id.clone()).or_insert(0.0) += *score;
            }
        }
        popularity
    }
}

/// Popularity scaled to [0, 1]; negative or non-finite totals count as 0.
#[derive(Debug, Clone, Default)]
pub struct NormalizedPopularity {
    values: HashMap<String, f64>,
}

impl NormalizedPopularity {
    pub fn from_raw(raw: &HashMap<String, f64>) -> Self {
        let clamped = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
        let max = raw.values().copied().map(clamped).fold(0.0_f64, f64::max);

        let values = raw
            .iter()
            .map(|(item_id, v)| (item_id.clone(), normalize_score(clamped(*v), 0.0, max)))
            .collect();
        Self { values }
    }

    pub fn get(&self, item_id: &str) -> f64 {
        self.values.get(item_id).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
