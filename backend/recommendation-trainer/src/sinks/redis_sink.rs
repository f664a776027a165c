use super::{ProfileScoresRecord, RecommendationRecord, RecommendationSink};
use crate::error::Result;
use crate::models::ProfileKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Deserialize;
use tracing::debug;

/// Records stored as JSON strings under `{prefix}:profile:{key}` and
/// `{prefix}:recommendations:{key}`.
pub struct RedisSink {
    client: redis::Client,
    prefix: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredStamp {
    created_at: DateTime<Utc>,
}

impl RedisSink {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    pub fn profile_key(&self, key: &ProfileKey) -> String {
        format!("{}:profile:{}", self.prefix, key)
    }

    pub fn recommendations_key(&self, key: &ProfileKey) -> String {
        format!("{}:recommendations:{}", self.prefix, key)
    }

    /// Creation time of the record already stored at `key`, if any.
    async fn existing_created_at(
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let existing: Option<String> = conn.get(key).await?;
        Ok(existing
            .and_then(|raw| serde_json::from_str::<StoredStamp>(&raw).ok())
            .map(|stamp| stamp.created_at))
    }
}

#[async_trait]
impl RecommendationSink for RedisSink {
    async fn upsert_profile_scores(&self, mut record: ProfileScoresRecord) -> Result<()> {
        let key = self.profile_key(&record.profile_key);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        if let Some(created_at) = Self::existing_created_at(&mut conn, &key).await? {
            record.created_at = created_at;
        }
        let payload = serde_json::to_string(&record)?;
        let _: () = conn.set(&key, payload).await?;

        debug!(key = %key, items = record.scores.len(), "Upserted profile scores");
        Ok(())
    }

    async fn upsert_recommendations(&self, mut record: RecommendationRecord) -> Result<()> {
        let key = self.recommendations_key(&record.profile_key);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        if let Some(created_at) = Self::existing_created_at(&mut conn, &key).await? {
            record.created_at = created_at;
        }
        let payload = serde_json::to_string(&record)?;
        let _: () = conn.set(&key, payload).await?;

        debug!(key = %key, items = record.item_ids.len(), "Upserted recommendations");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let sink = RedisSink::new("redis://localhost:6379", "reco").unwrap();
        let key = ProfileKey::new("session:abc");
        assert_eq!(sink.profile_key(&key), "reco:profile:session:abc");
        assert_eq!(
            sink.recommendations_key(&ProfileKey::new("user:7")),
            "reco:recommendations:user:7"
        );
    }

    #[test]
    fn test_stamp_reads_created_at() {
        let stamp: StoredStamp =
            serde_json::from_str(r#"{"createdAt": "2024-01-01T00:00:00Z", "other": 1}"#).unwrap();
        assert_eq!(stamp.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
