use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Pool, Runtime};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

const KEY_PREFIX: &str = "dedup:span:";

fn claim_key(dedup_id: &str) -> String {
    format!("{KEY_PREFIX}{dedup_id}")
}

/// Outcome of an atomic claim: the two lists partition the input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub claimed: Vec<String>,
    pub duplicates: Vec<String>,
}

/// A claim key observed in the store: owning batch and remaining TTL.
#[derive(Debug, Clone)]
pub struct ClaimInfo {
    pub batch_id: String,
    pub expires_in: Option<Duration>,
}

/// Approximate store statistics from a cursor scan.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DedupStats {
    pub tracked_keys: u64,
}

/// Key-value dedup store granting at-most-once ingestion for span dedup
/// keys across concurrent batches (§4.1). Claims are pipelined
/// `SET NX PX`, one round trip per batch regardless of size. This is the
/// authoritative cache-only implementation; orphaned claims self-heal at
/// TTL expiry.
#[derive(Clone)]
pub struct DedupStore {
    pool: Pool,
}

impl DedupStore {
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let config = Config::from_url(redis_url);
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CoreError::Transient(format!("redis pool for {redis_url}: {e}")))?;
        // Validate connectivity on startup.
        let mut conn = pool.get().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(Self { pool })
    }

    /// Atomically claim each dedup id with a TTL: a key lands in `claimed`
    /// iff this call created it, otherwise in `duplicates`. The relative
    /// outcome of each id is independent of its position in the input.
    pub async fn claim_events(
        &self,
        batch_id: &str,
        dedup_ids: &[String],
        ttl: Duration,
    ) -> CoreResult<ClaimOutcome> {
        if dedup_ids.is_empty() {
            return Ok(ClaimOutcome::default());
        }
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        for id in dedup_ids {
            pipe.cmd("SET")
                .arg(claim_key(id))
                .arg(batch_id)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms);
        }
        let replies: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        Ok(partition_claims(dedup_ids, &replies))
    }

    /// Delete the listed claim keys, returning them to the free state. Used
    /// when a later pipeline stage fails after the claim.
    pub async fn release_events(&self, dedup_ids: &[String]) -> CoreResult<u64> {
        if dedup_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let keys: Vec<String> = dedup_ids.iter().map(|id| claim_key(id)).collect();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    pub async fn exists(&self, dedup_id: &str) -> CoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(claim_key(dedup_id)).await?;
        Ok(exists)
    }

    /// Pipelined existence probe. A reply that cannot be read is mapped
    /// conservatively to non-duplicate so no data is dropped up front; the
    /// subsequent claim still deduplicates atomically.
    pub async fn check_batch_duplicates(&self, dedup_ids: &[String]) -> CoreResult<Vec<String>> {
        if dedup_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        for id in dedup_ids {
            pipe.cmd("EXISTS").arg(claim_key(id));
        }
        let replies: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        let duplicates = dedup_ids
            .iter()
            .zip(replies.iter())
            .filter(|(_, reply)| matches!(reply, redis::Value::Int(n) if *n > 0))
            .map(|(id, _)| id.clone())
            .collect();
        Ok(duplicates)
    }

    pub async fn delete(&self, dedup_id: &str) -> CoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = conn.del(claim_key(dedup_id)).await?;
        Ok(deleted > 0)
    }

    /// Owning batch id and approximate remaining TTL for a claim key.
    pub async fn get_by_event_id(&self, dedup_id: &str) -> CoreResult<ClaimInfo> {
        let mut conn = self.pool.get().await?;
        let key = claim_key(dedup_id);
        let batch_id: Option<String> = conn.get(&key).await?;
        let batch_id = batch_id.ok_or(CoreError::NotFound("dedup key"))?;
        let ttl_ms: i64 = redis::cmd("PTTL").arg(&key).query_async(&mut conn).await?;
        let expires_in = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64));
        Ok(ClaimInfo {
            batch_id,
            expires_in,
        })
    }

    /// Approximate count of live claim keys via a cursor scan.
    pub async fn stats(&self) -> CoreResult<DedupStats> {
        let mut conn = self.pool.get().await?;
        let mut tracked_keys = 0u64;
        let mut cursor: u64 = 0;
        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            tracked_keys += keys.len() as u64;
            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(DedupStats { tracked_keys })
    }
}

/// Partition ids by their SET NX replies. A missing or unreadable reply is
/// conservatively a duplicate so the caller will not re-publish that span.
fn partition_claims(dedup_ids: &[String], replies: &[Option<String>]) -> ClaimOutcome {
    let mut outcome = ClaimOutcome::default();
    for (i, id) in dedup_ids.iter().enumerate() {
        match replies.get(i) {
            Some(Some(_)) => outcome.claimed.push(id.clone()),
            _ => outcome.duplicates.push(id.clone()),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_key_format() {
        let trace = "aa".repeat(16);
        let id = format!("{trace}:0123456789abcdef");
        assert_eq!(claim_key(&id), format!("dedup:span:{trace}:0123456789abcdef"));
    }

    #[test]
    fn test_partition_claims_splits_input() {
        let ids = vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()];
        let replies = vec![Some("OK".to_string()), None, Some("OK".to_string())];
        let outcome = partition_claims(&ids, &replies);
        assert_eq!(outcome.claimed, vec!["a:1", "c:3"]);
        assert_eq!(outcome.duplicates, vec!["b:2"]);
        assert_eq!(
            outcome.claimed.len() + outcome.duplicates.len(),
            ids.len()
        );
    }

    #[test]
    fn test_partition_claims_missing_reply_is_duplicate() {
        let ids = vec!["a:1".to_string(), "b:2".to_string()];
        let replies = vec![Some("OK".to_string())];
        let outcome = partition_claims(&ids, &replies);
        assert_eq!(outcome.claimed, vec!["a:1"]);
        assert_eq!(outcome.duplicates, vec!["b:2"]);
    }

    #[test]
    fn test_partition_claims_empty() {
        let outcome = partition_claims(&[], &[]);
        assert!(outcome.claimed.is_empty());
        assert!(outcome.duplicates.is_empty());
    }
}
