// ============================================
// Hybrid Reranker
// ============================================
//
// Final ordering of a profile's candidate pool:
// 1. Ask the language model for a holistic ranking (when enabled)
// 2. Otherwise, or when the answer is unusable, sort by the attribute
//    heuristic: base + 1.0*category + 0.6*author + 0.4*publisher
//
// A failing model only affects the profile being ranked.

pub mod llm;

pub use llm::{GeminiProvider, LlmProvider, OpenAiProvider, RankingModel};

use crate::models::{CandidateEntry, FallbackReason, ProfileKey, RankingMode, ScoredItem};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const CATEGORY_BOOST: f64 = 1.0;
const AUTHOR_BOOST: f64 = 0.6;
const PUBLISHER_BOOST: f64 = 0.4;

pub fn heuristic_score(candidate: &CandidateEntry) -> f64 {
    let mut score = candidate.base_score;
    if candidate.same_category {
        score += CATEGORY_BOOST;
    }
    if candidate.same_author {
        score += AUTHOR_BOOST;
    }
    if candidate.same_publisher {
        score += PUBLISHER_BOOST;
    }
    score
}

fn heuristic_order(a: &CandidateEntry, b: &CandidateEntry) -> Ordering {
    heuristic_score(b)
        .total_cmp(&heuristic_score(a))
        .then_with(|| b.base_score.total_cmp(&a.base_score))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

fn reasons_of(candidate: &CandidateEntry) -> String {
    let mut reasons = Vec::new();
    if candidate.same_category {
        reasons.push("same category");
    }
    if candidate.same_author {
        reasons.push("same author");
    }
    if candidate.same_publisher {
        reasons.push("same publisher");
    }
    if reasons.is_empty() {
        reasons.push("high interaction score");
    }
    reasons.join(", ")
}

pub fn build_prompt(profile: &ProfileKey, candidates: &[CandidateEntry]) -> String {
    let lines: Vec<String> = candidates
        .iter()
        .map(|candidate| {
            format!(
                "- ID {} | base score {:.2} | {} | title: {}",
                candidate.item_id,
                candidate.base_score,
                reasons_of(candidate),
                candidate.title.as_deref().unwrap_or("(unknown)")
            )
        })
        .collect();

    format!(
        "You are a personalized book recommendation system. \
         Order the candidates below from highest to lowest priority for this reader, \
         favouring a high base score and shared category, author or publisher. \
         Return only plain JSON of the form {{\"ranking\": [ids_in_order]}}.\n\n\
         Profile: {}\n\
         Candidates:\n{}",
        profile,
        lines.join("\n")
    )
}

/// Isolate the JSON object in a model answer, tolerating markdown fences.
pub fn extract_json_block(text: &str) -> &str {
    let mut cleaned = text.trim();
    if cleaned.contains("```") {
        if let Some(segment) = cleaned
            .split("```")
            .map(str::trim)
            .find(|segment| segment.starts_with('{'))
        {
            cleaned = segment;
        }
    }

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    }
}

fn coerce_id(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => match n.as_i64() {
            Some(v) => return Some(v),
            None => n.as_f64()?,
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Some(v);
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    (number.is_finite() && number.abs() < i64::MAX as f64).then(|| number.trunc() as i64)
}

/// Ids of a `{"ranking": [...]}` answer, in model order.
pub fn parse_ranking(raw: &str) -> std::result::Result<Vec<i64>, FallbackReason> {
    let block = extract_json_block(raw);
    if block.is_empty() {
        return Err(FallbackReason::Unparseable);
    }
    let payload: Value = serde_json::from_str(block).map_err(|_| FallbackReason::Unparseable)?;
    let ranking = payload
        .get("ranking")
        .and_then(Value::as_array)
        .ok_or(FallbackReason::Unparseable)?;

    let ids: Vec<i64> = ranking.iter().filter_map(coerce_id).collect();
    if ids.is_empty() {
        return Err(FallbackReason::EmptyRanking);
    }
    Ok(ids)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankOutcome {
    pub items: Vec<ScoredItem>,
    pub mode: RankingMode,
    pub fallback: Option<FallbackReason>,
}

pub struct HybridReranker {
    model: RankingModel,
    timeout: Duration,
    top_k: usize,
}

impl HybridReranker {
    pub fn new(model: RankingModel, timeout: Duration, top_k: usize) -> Self {
        Self {
            model,
            timeout,
            top_k,
        }
    }

    pub fn model(&self) -> &RankingModel {
        &self.model
    }

    pub async fn rank(&self, profile: &ProfileKey, candidates: Vec<CandidateEntry>) -> RankOutcome {
        let Some(provider) = self.model.provider() else {
            return self.heuristic(candidates, FallbackReason::Disabled);
        };
        if candidates.is_empty() {
            return RankOutcome {
                items: Vec::new(),
                mode: RankingMode::Heuristic,
                fallback: None,
            };
        }

        let prompt = build_prompt(profile, &candidates);
        let raw = match timeout(self.timeout, provider.generate(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(profile = %profile, provider = provider.name(), error = %e, "LLM rerank failed, using heuristic");
                return self.heuristic(candidates, FallbackReason::ProviderError);
            }
            Err(_) => {
                warn!(
                    profile = %profile,
                    provider = provider.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "LLM rerank timed out, using heuristic"
                );
                return self.heuristic(candidates, FallbackReason::Timeout);
            }
        };

        let ranking = match parse_ranking(&raw) {
            Ok(ranking) => ranking,
            Err(reason) => {
                warn!(profile = %profile, reason = reason.as_str(), "Unusable LLM ranking, using heuristic");
                return self.heuristic(candidates, reason);
            }
        };

        match self.apply_ranking(&candidates, &ranking) {
            Some(items) => {
                debug!(profile = %profile, ranked = items.len(), candidates = candidates.len(), "LLM rerank applied");
                RankOutcome {
                    items,
                    mode: RankingMode::Llm,
                    fallback: None,
                }
            }
            None => {
                warn!(profile = %profile, "LLM ranking matched no candidate, using heuristic");
                self.heuristic(candidates, FallbackReason::UnrecognizedIds)
            }
        }
    }

    /// Model order restricted to known candidates. Shorter lists are kept as is.
    fn apply_ranking(&self, candidates: &[CandidateEntry], ranking: &[i64]) -> Option<Vec<ScoredItem>> {
        let by_id: HashMap<i64, &CandidateEntry> = candidates
            .iter()
            .map(|candidate| (candidate.item_id, candidate))
            .collect();

        let mut seen = HashSet::new();
        let items: Vec<ScoredItem> = ranking
            .iter()
            .filter(|item_id| seen.insert(**item_id))
            .filter_map(|item_id| by_id.get(item_id))
            .take(self.top_k)
            .map(|candidate| ScoredItem::new(candidate.item_id.to_string(), candidate.base_score))
            .collect();

        (!items.is_empty()).then_some(items)
    }

    pub fn heuristic(&self, mut candidates: Vec<CandidateEntry>, reason: FallbackReason) -> RankOutcome {
        candidates.sort_by(heuristic_order);
        candidates.truncate(self.top_k);
        RankOutcome {
            items: candidates
                .into_iter()
                .map(|candidate| ScoredItem::new(candidate.item_id.to_string(), candidate.base_score))
                .collect(),
            mode: RankingMode::Heuristic,
            fallback: Some(reason),
        }
    }
}
