use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier as it arrives from the event export: integer, float or string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawId {
    Int(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl RawId {
    /// Integer value of the identifier, truncating floats toward zero.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RawId::Int(v) => Some(*v),
            RawId::Float(f) => float_to_i64(*f),
            RawId::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
            }
            RawId::Other(_) => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            RawId::Int(v) => Some(v.to_string()),
            RawId::Float(f) if f.is_finite() => Some(float_text(*f)),
            RawId::Text(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// Whole floats keep their fractional digit (`3.0`), matching keys already persisted.
fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

fn float_to_i64(f: f64) -> Option<i64> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

/// Raw behavioural event from the event store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub user_id: Option<RawId>,
    #[serde(default)]
    pub session_id: Option<RawId>,
    #[serde(default, rename = "bookId", alias = "itemId", alias = "productId")]
    pub item_ref: Option<RawId>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub event_type: Option<String>,
    /// Score already computed upstream (e.g. with time decay applied)
    #[serde(default, deserialize_with = "lenient_number")]
    pub final_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub occurred_at: Option<DateTime<Utc>>,
}

// Export fields are loosely typed. A field of the wrong shape reads as absent
// so the event falls through to the next scoring rule instead of failing the load.

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(timestamp_from_value))
}

/// RFC 3339 strings, epoch milliseconds, and extended-JSON `{"$date": ...}` wrappers.
fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::Object(map) => match map.get("$date")? {
            Value::Object(inner) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|ms| ms.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis),
            other => timestamp_from_value(other),
        },
        _ => None,
    }
}

impl Event {
    pub fn for_user(user_id: i64, item_id: i64, event_type: &str) -> Self {
        Self {
            user_id: Some(RawId::Int(user_id)),
            item_ref: Some(RawId::Int(item_id)),
            event_type: Some(event_type.to_string()),
            ..Default::default()
        }
    }

    pub fn for_session(session_id: &str, item_id: i64, event_type: &str) -> Self {
        Self {
            session_id: Some(RawId::Text(session_id.to_string())),
            item_ref: Some(RawId::Int(item_id)),
            event_type: Some(event_type.to_string()),
            ..Default::default()
        }
    }

    pub fn with_final_score(mut self, score: f64) -> Self {
        self.final_score = Some(score);
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }
}

/// Aggregation bucket: `user:<id>` for signed-in users, the raw session id otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileKey(String);

impl ProfileKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_event(event: &Event) -> Option<Self> {
        let user = event
            .user_id
            .as_ref()
            .and_then(RawId::as_text)
            .filter(|id| id != "null");
        if let Some(user) = user {
            return Some(Self(format!("user:{}", user)));
        }

        event
            .session_id
            .as_ref()
            .and_then(RawId::as_text)
            .map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulated behaviour score per item for one profile.
pub type ScoreMap = std::collections::HashMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: String,
    pub score: f64,
}

impl ScoredItem {
    pub fn new(item_id: impl Into<String>, score: f64) -> Self {
        Self {
            item_id: item_id.into(),
            score,
        }
    }
}

/// Ordered item list of one profile, as handed from stage to stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileScores {
    pub key: ProfileKey,
    pub items: Vec<ScoredItem>,
}

impl ProfileScores {
    pub fn score_of(&self, item_id: &str) -> Option<f64> {
        self.items
            .iter()
            .find(|item| item.item_id == item_id)
            .map(|item| item.score)
    }

    pub fn item_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.item_id.as_str()).collect()
    }

    pub fn total_score(&self) -> f64 {
        self.items.iter().map(|item| item.score).sum()
    }
}

/// Per-profile engagement diagnostics. Never used for scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub event_count: u64,
    pub event_types: BTreeMap<String, u64>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ProfileMetadata {
    pub fn record(&mut self, event: &Event) {
        self.event_count += 1;
        let event_type = event
            .event_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or("unknown");
        *self.event_types.entry(event_type.to_string()).or_insert(0) += 1;

        if let Some(occurred_at) = event.occurred_at {
            if self.last_event_at.map_or(true, |last| occurred_at > last) {
                self.last_event_at = Some(occurred_at);
            }
        }
    }
}

/// Catalogue entry for one item (read-only, external).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub item_id: i64,
    pub title: Option<String>,
    pub category_id: Option<i64>,
    pub author_id: Option<i64>,
    pub publisher_id: Option<i64>,
    pub price: Option<f64>,
    pub stock: Option<f64>,
}

/// One candidate in a profile's pool during the final rerank.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    pub item_id: i64,
    pub title: Option<String>,
    pub base_score: f64,
    pub same_category: bool,
    pub same_author: bool,
    pub same_publisher: bool,
}

impl CandidateEntry {
    pub fn new(item_id: i64, title: Option<String>, base_score: f64) -> Self {
        Self {
            item_id,
            title,
            base_score,
            same_category: false,
            same_author: false,
            same_publisher: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    Llm,
    Heuristic,
}

impl RankingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMode::Llm => "llm",
            RankingMode::Heuristic => "heuristic",
        }
    }
}

/// Why the final rerank of a profile used the heuristic path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Disabled,
    Timeout,
    ProviderError,
    Unparseable,
    EmptyRanking,
    UnrecognizedIds,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Disabled => "disabled",
            FallbackReason::Timeout => "timeout",
            FallbackReason::ProviderError => "provider_error",
            FallbackReason::Unparseable => "unparseable",
            FallbackReason::EmptyRanking => "empty_ranking",
            FallbackReason::UnrecognizedIds => "unrecognized_ids",
        }
    }
}
