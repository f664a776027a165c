use crate::error::{Result, TrainerError};
use crate::models::Event;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

/// Read-only access to the feedback event store.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events at or after `since`; all events when `since` is `None`.
    async fn fetch_events(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Event>>;
}

/// Start of the lookback window (`history_days == 0` means unbounded).
pub fn window_start(history_days: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (history_days > 0).then(|| now - Duration::days(i64::from(history_days)))
}

fn in_window(event: &Event, since: Option<DateTime<Utc>>) -> bool {
    match since {
        None => true,
        Some(since) => event.occurred_at.map_or(false, |at| at >= since),
    }
}

/// Events held in memory (tests, replays).
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSource {
    events: Vec<Event>,
}

impl InMemoryEventSource {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn fetch_events(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Event>> {
        Ok(self
            .events
            .iter()
            .filter(|event| in_window(event, since))
            .cloned()
            .collect())
    }
}

/// Newline-delimited JSON export of the feedback collection.
pub struct JsonLinesEventSource {
    path: PathBuf,
}

impl JsonLinesEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(raw: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let invalid = |reason: String| {
                TrainerError::Source(format!(
                    "line {}: invalid event record: {}",
                    line_no + 1,
                    reason
                ))
            };
            let record: Value = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
            if !record.is_object() {
                return Err(invalid("not a JSON object".to_string()));
            }
            let event: Event = serde_json::from_value(record).map_err(|e| invalid(e.to_string()))?;
            if in_window(&event, since) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSource for JsonLinesEventSource {
    async fn fetch_events(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Event>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            TrainerError::Source(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let events = Self::parse(&raw, since)?;
        info!(
            path = %self.path.display(),
            events = events.len(),
            since = ?since,
            "Loaded feedback events"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_start() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        assert_eq!(window_start(0, now), None);
        assert_eq!(
            window_start(30, now),
            Some(Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_skips_blank_lines_and_filters_window() {
        let raw = r#"
{"userId": 1, "bookId": 10, "eventType": "view_detail", "occurredAt": "2024-06-01T00:00:00Z"}

{"userId": 1, "bookId": 11, "eventType": "purchase", "occurredAt": "2023-01-01T00:00:00Z"}
{"sessionId": "s1", "bookId": 12}
"#;
        let all = JsonLinesEventSource::parse(raw, None).unwrap();
        assert_eq!(all.len(), 3);

        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let recent = JsonLinesEventSource::parse(raw, Some(since)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event_type.as_deref(), Some("view_detail"));
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let raw = "{\"userId\": 1}\nnot-json\n";
        let err = JsonLinesEventSource::parse(raw, None).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_non_object_line_is_fatal() {
        let raw = "{\"userId\": 1, \"bookId\": 1}\n[1, 10]\n";
        let err = JsonLinesEventSource::parse(raw, None).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn test_badly_typed_fields_do_not_reject_the_file() {
        let raw = r#"
{"userId": 1, "bookId": 10, "eventType": "purchase"}
{"userId": 1, "bookId": 11, "finalScore": "2.5", "occurredAt": {"$oid": "x"}}
{"userId": 2, "bookId": 12, "eventType": 4, "value": [1]}
"#;
        let events = JsonLinesEventSource::parse(raw, None).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type.as_deref(), Some("purchase"));
        assert_eq!(events[1].final_score, Some(2.5));
        assert_eq!(events[1].occurred_at, None);
        assert_eq!(events[2].event_type.as_deref(), Some("4"));
        assert_eq!(events[2].value, None);
    }

    #[tokio::test]
    async fn test_in_memory_source_applies_window() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let source = InMemoryEventSource::new(vec![
            Event::for_user(1, 1, "like").at(since),
            Event::for_user(1, 2, "like"),
        ]);

        assert_eq!(source.fetch_events(None).await.unwrap().len(), 2);
        assert_eq!(source.fetch_events(Some(since)).await.unwrap().len(), 1);
    }
}
