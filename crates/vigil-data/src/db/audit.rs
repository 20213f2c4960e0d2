//! Append-only audit trail

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::Result;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub alert_id: Uuid,
    pub old_status: Option<String>,
    pub new_status: String,
    pub actor: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct AuditRepo {
    pool: PgPool,
}

impl AuditRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        alert_id: Uuid,
        old_status: Option<&str>,
        new_status: &str,
        actor: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (alert_id, old_status, new_status, actor, detail) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(alert_id)
        .bind(old_status)
        .bind(new_status)
        .bind(actor)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn for_alert(&self, alert_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT alert_id, old_status, new_status, actor, detail, created_at \
             FROM audit_log WHERE alert_id = $1 ORDER BY created_at",
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditEntry {
                    alert_id: row.try_get("alert_id")?,
                    old_status: row.try_get("old_status")?,
                    new_status: row.try_get("new_status")?,
                    actor: row.try_get("actor")?,
                    detail: row.try_get("detail")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
