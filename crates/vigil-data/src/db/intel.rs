//! Threat-intel rows, keyed (ioc, ioc_type), upserted on re-query

use sqlx::PgPool;

use vigil_core::model::ThreatIntelRecord;

use crate::Result;

pub struct IntelRepo {
    pool: PgPool,
}

impl IntelRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, record: &ThreatIntelRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO threat_intel (ioc, ioc_type, threat_level, threat_score, \
             sources_queried, sources_hit, last_seen, raw_vendor_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (ioc, ioc_type) DO UPDATE SET \
               threat_level = EXCLUDED.threat_level, \
               threat_score = EXCLUDED.threat_score, \
               sources_queried = EXCLUDED.sources_queried, \
               sources_hit = EXCLUDED.sources_hit, \
               last_seen = EXCLUDED.last_seen, \
               raw_vendor_data = EXCLUDED.raw_vendor_data",
        )
        .bind(&record.ioc)
        .bind(record.ioc_type.as_str())
        .bind(record.threat_level.as_str())
        .bind(record.threat_score)
        .bind(serde_json::to_value(&record.sources_queried)?)
        .bind(serde_json::to_value(&record.sources_hit)?)
        .bind(record.last_seen)
        .bind(&record.raw_vendor_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
