//! Shared L2 tier backed by Redis. Values are stored as JSON with a
//! process-assigned TTL; a self-healing read treats a deserialize failure
//! (e.g. a classification schema bump) as a miss rather than an error, so a
//! stale entry from an older deployment never wedges the pipeline.
//!
//! A companion Redis set (`KEY_PREFIX` + `set`) tracks every fingerprint
//! believed to have a live L2 entry, independent of the individual keys'
//! own TTLs. This is what lets a freshly-started process rebuild its L1
//! from L2 in O(members) instead of scanning the keyspace (spec §4.3/§6).

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::AppResult;
use crate::model::Classification;

const KEY_PREFIX: &str = "sentrymux:classification:";
const SET_KEY: &str = "sentrymux:classification:set";

pub struct L2Cache {
    conn: ConnectionManager,
}

impl L2Cache {
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn key(fingerprint: &str) -> String {
        format!("{KEY_PREFIX}{fingerprint}")
    }

    pub async fn get(&self, fingerprint: &str) -> AppResult<Option<Classification>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(fingerprint)).await?;
        let Some(raw) = raw else {
            // The key may simply have expired on its own TTL while still
            // listed in the membership set; heal the set so a later rebuild
            // doesn't try to load a dead entry.
            let _: () = conn.srem(SET_KEY, fingerprint).await.unwrap_or(());
            return Ok(None);
        };

        match serde_json::from_str::<Classification>(&raw) {
            Ok(classification) => Ok(Some(classification)),
            Err(err) => {
                tracing::warn!(
                    fingerprint,
                    error = %err,
                    "l2 cache entry failed to deserialize, treating as orphaned"
                );
                let _: () = conn.del(Self::key(fingerprint)).await.unwrap_or(());
                let _: () = conn.srem(SET_KEY, fingerprint).await.unwrap_or(());
                Ok(None)
            }
        }
    }

    pub async fn put(
        &self,
        fingerprint: &str,
        classification: &Classification,
        ttl: Duration,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(classification)?;
        let _: () = conn.set_ex(Self::key(fingerprint), raw, ttl.as_secs().max(1)).await?;
        let _: () = conn.sadd(SET_KEY, fingerprint).await?;
        Ok(())
    }

    pub async fn invalidate(&self, fingerprint: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(fingerprint)).await?;
        let _: () = conn.srem(SET_KEY, fingerprint).await?;
        Ok(())
    }

    /// Every fingerprint believed to have a live L2 entry. Used at startup
    /// to rebuild L1 without scanning the Redis keyspace.
    pub async fn members(&self) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(SET_KEY).await?;
        Ok(members)
    }
}
