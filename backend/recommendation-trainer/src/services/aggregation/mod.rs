// ============================================
// Event Aggregator
// ============================================
//
// Turns raw feedback events into per-profile score maps:
// 1. Resolve the profile key (user beats session)
// 2. Canonicalize the item reference to an integer string
// 3. Score the event (final score > value > type weight > 1.0)
// 4. Accumulate, and keep engagement metadata for diagnostics
//
// Malformed events are dropped with a reason code, never raised.

pub mod popularity;

pub use popularity::{NormalizedPopularity, PopularityAggregator};

use crate::models::{Event, ProfileKey, ProfileMetadata, ScoreMap};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Weight applied when an event carries no explicit score.
pub const EVENT_WEIGHTS: &[(&str, f64)] = &[
    ("view_detail", 0.5),
    ("recommendation_click", 2.0),
    ("add_to_cart", 4.0),
    ("purchase", 6.0),
    ("like", 3.0),
    ("dislike", -2.0),
    ("impression", 0.25),
];

pub const DEFAULT_EVENT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingProfileKey,
    MissingItemId,
    InvalidItemId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationStats {
    pub events_seen: u64,
    pub events_accepted: u64,
    pub dropped: BTreeMap<DropReason, u64>,
}

impl AggregationStats {
    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, reason: DropReason) -> u64 {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }
}

/// Output of a full aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct AggregatedProfiles {
    pub scores: HashMap<ProfileKey, ScoreMap>,
    pub metadata: HashMap<ProfileKey, ProfileMetadata>,
    pub stats: AggregationStats,
}

/// Score of a single event by strict precedence.
pub fn event_score(event: &Event) -> f64 {
    if let Some(score) = event.final_score.filter(|s| s.is_finite()) {
        return score;
    }
    if let Some(value) = event.value.filter(|v| v.is_finite()) {
        return value;
    }
    event
        .event_type
        .as_deref()
        .and_then(|event_type| {
            EVENT_WEIGHTS
                .iter()
                .find(|(name, _)| *name == event_type)
                .map(|(_, weight)| *weight)
        })
        .unwrap_or(DEFAULT_EVENT_WEIGHT)
}

/// Canonical item id: decimal string of the integer item reference.
pub fn canonical_item_id(event: &Event) -> Result<String, DropReason> {
    let item_ref = event.item_ref.as_ref().ok_or(DropReason::MissingItemId)?;
    item_ref
        .as_integer()
        .map(|id| id.to_string())
        .ok_or(DropReason::InvalidItemId)
}

#[derive(Debug, Default)]
pub struct EventAggregator {
    contributions: HashMap<ProfileKey, HashMap<String, Vec<f64>>>,
    metadata: HashMap<ProfileKey, ProfileMetadata>,
    stats: AggregationStats,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns the drop reason when the event is discarded.
    pub fn push(&mut self, event: &Event) -> Option<DropReason> {
        self.stats.events_seen += 1;

        let outcome = ProfileKey::from_event(event)
            .ok_or(DropReason::MissingProfileKey)
            .and_then(|key| canonical_item_id(event).map(|item_id| (key, item_id)));

        let (key, item_id) = match outcome {
            Ok(pair) => pair,
            Err(reason) => {
                *self.stats.dropped.entry(reason).or_insert(0) += 1;
                debug!(reason = ?reason, "Dropping event");
                return Some(reason);
            }
        };

        let score = event_score(event);
        self.contributions
            .entry(key.clone())
            .or_default()
            .entry(item_id)
            .or_default()
            .push(score);
        self.metadata.entry(key).or_default().record(event);
        self.stats.events_accepted += 1;
        None
    }

    pub fn extend<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            self.push(event);
        }
    }

    pub fn finish(self) -> AggregatedProfiles {
        // Contributions are summed in sorted order so the total does not depend on arrival order
        let scores: HashMap<ProfileKey, ScoreMap> = self
            .contributions
            .into_iter()
            .map(|(key, items)| {
                let score_map = items
                    .into_iter()
                    .map(|(item_id, mut parts)| {
                        parts.sort_by(|a, b| a.total_cmp(b));
                        (item_id, parts.iter().sum::<f64>())
                    })
                    .collect();
                (key, score_map)
            })
            .collect();

        info!(
            profiles = scores.len(),
            events_seen = self.stats.events_seen,
            events_accepted = self.stats.events_accepted,
            events_dropped = self.stats.dropped_total(),
            "Event aggregation completed"
        );

        AggregatedProfiles {
            scores,
            metadata: self.metadata,
            stats: self.stats,
        }
    }
}

/// Aggregate a batch of events in one call.
pub fn aggregate_events<'a, I>(events: I) -> AggregatedProfiles
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut aggregator = EventAggregator::new();
    aggregator.extend(events);
    aggregator.finish()
}
