//! Enrichment context rows, one per (alert, context kind)

use sqlx::PgPool;
use uuid::Uuid;

use vigil_core::model::EnrichmentContext;

use crate::Result;

pub struct ContextRepo {
    pool: PgPool,
}

impl ContextRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reprocessing the same alert overwrites the previous row
    pub async fn upsert(&self, alert_id: Uuid, ctx: &EnrichmentContext) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_context (alert_id, context_type, source, status, data, collected_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (alert_id, context_type) DO UPDATE SET \
               source = EXCLUDED.source, \
               status = EXCLUDED.status, \
               data = EXCLUDED.data, \
               collected_at = EXCLUDED.collected_at",
        )
        .bind(alert_id)
        .bind(ctx.context_type.as_str())
        .bind(&ctx.source)
        .bind(match ctx.status {
            vigil_core::model::EnrichmentStatus::Ok => "ok",
            vigil_core::model::EnrichmentStatus::Partial => "partial",
        })
        .bind(&ctx.data)
        .bind(ctx.collected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
