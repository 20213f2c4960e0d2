//! Redis cache client
//!
//! One logical store split across db indexes by purpose: dedup=0,
//! enrichment=1, threat-intel=2, rate-limit=3. Writes are last-writer-wins;
//! the cache is a performance aid, never a correctness gate.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// Logical cache purposes, mapped to Redis db indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePurpose {
    Dedup,
    Enrichment,
    ThreatIntel,
    RateLimit,
}

impl CachePurpose {
    pub fn db_index(&self) -> u8 {
        match self {
            Self::Dedup => 0,
            Self::Enrichment => 1,
            Self::ThreatIntel => 2,
            Self::RateLimit => 3,
        }
    }
}

/// Multiplexed connections, one per purpose db
#[derive(Clone)]
pub struct CachePool {
    dedup: ConnectionManager,
    enrichment: ConnectionManager,
    threat_intel: ConnectionManager,
    rate_limit: ConnectionManager,
}

impl CachePool {
    /// `base_url` is the server without a db index, e.g. "redis://localhost:6379"
    pub async fn connect(base_url: &str) -> Result<Self> {
        let open = |purpose: CachePurpose| {
            let url = format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                purpose.db_index()
            );
            async move {
                let client = redis::Client::open(url)?;
                client.get_connection_manager().await
            }
        };
        Ok(Self {
            dedup: open(CachePurpose::Dedup).await?,
            enrichment: open(CachePurpose::Enrichment).await?,
            threat_intel: open(CachePurpose::ThreatIntel).await?,
            rate_limit: open(CachePurpose::RateLimit).await?,
        })
    }

    fn conn(&self, purpose: CachePurpose) -> ConnectionManager {
        match purpose {
            CachePurpose::Dedup => self.dedup.clone(),
            CachePurpose::Enrichment => self.enrichment.clone(),
            CachePurpose::ThreatIntel => self.threat_intel.clone(),
            CachePurpose::RateLimit => self.rate_limit.clone(),
        }
    }

    /// Atomically claim a fingerprint for the dedup window on behalf of one
    /// alert. Returns true when `owner` holds the claim: it just inserted
    /// it, or it already held it from an earlier delivery of the same
    /// message. A claim held by a different alert is a duplicate.
    pub async fn dedup_claim(
        &self,
        fingerprint: &str,
        owner: &str,
        ttl_secs: u64,
    ) -> Result<bool> {
        let mut conn = self.conn(CachePurpose::Dedup);
        let set: Option<String> = redis::cmd("SET")
            .arg(fingerprint)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        if set.is_some() {
            return Ok(true);
        }
        // Redelivery of the message that planted the claim must not count
        // as a duplicate of itself
        let holder: Option<String> = conn.get(fingerprint).await?;
        Ok(holder.as_deref() == Some(owner))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        purpose: CachePurpose,
        key: &str,
    ) -> Result<Option<T>> {
        let mut conn = self.conn(purpose);
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        purpose: CachePurpose,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<()> {
        let mut conn = self.conn(purpose);
        let raw = serde_json::to_string(value)?;
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(raw)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.dedup.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_db_mapping() {
        assert_eq!(CachePurpose::Dedup.db_index(), 0);
        assert_eq!(CachePurpose::Enrichment.db_index(), 1);
        assert_eq!(CachePurpose::ThreatIntel.db_index(), 2);
        assert_eq!(CachePurpose::RateLimit.db_index(), 3);
    }
}
