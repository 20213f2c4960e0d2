//! Canonical alert rows

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vigil_core::model::{Alert, AlertStatus};

use crate::{DataError, Result};

use super::parse_enum;

const ALERT_COLUMNS: &str = "id, alert_id, source, alert_type, severity, status, description, \
     event_ts, source_ip, target_ip, file_hash, url, asset_id, user_id, process_name, \
     raw_payload, fingerprint, risk_score, assigned_to, created_at, updated_at";

pub struct AlertRepo {
    pool: PgPool,
}

impl AlertRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the canonical row. Must succeed before any publish; the broker
    /// is not the system of record.
    pub async fn insert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            "INSERT INTO alerts (id, alert_id, source, alert_type, severity, status, \
             description, event_ts, source_ip, target_ip, file_hash, url, asset_id, \
             user_id, process_name, raw_payload, fingerprint, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(alert.id)
        .bind(&alert.alert_id)
        .bind(&alert.source)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.description)
        .bind(alert.timestamp)
        .bind(alert.source_ip.map(|ip| ip.to_string()))
        .bind(alert.target_ip.map(|ip| ip.to_string()))
        .bind(&alert.file_hash)
        .bind(&alert.url)
        .bind(&alert.asset_id)
        .bind(&alert.user_id)
        .bind(&alert.process_name)
        .bind(&alert.raw_payload)
        .bind(&alert.fingerprint)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Alert>> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_alert(&r)).transpose()
    }

    /// Lookup by external id; newest row wins when multiple sources reuse ids
    pub async fn get_by_external_id(&self, alert_id: &str) -> Result<Option<Alert>> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decode_alert(&r)).transpose()
    }

    /// Status transition with its audit row, atomically
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: AlertStatus,
        actor: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let old: Option<String> =
            sqlx::query_scalar("SELECT status FROM alerts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(old) = old else {
            return Err(DataError::Decode(format!("alert {id} not found")));
        };

        sqlx::query("UPDATE alerts SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(new_status.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO audit_log (alert_id, old_status, new_status, actor, detail) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&old)
        .bind(new_status.as_str())
        .bind(actor)
        .bind(detail)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_fingerprint(&self, id: Uuid, fingerprint: &str) -> Result<()> {
        sqlx::query("UPDATE alerts SET fingerprint = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a successful publish to the raw subject
    pub async fn mark_published(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE alerts SET published_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Alerts persisted but never published, for the startup reconciler
    pub async fn unpublished(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE published_at IS NULL AND created_at < $1 \
             ORDER BY created_at LIMIT $2"
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_alert).collect()
    }

    /// DB-side dedup check, the fallback when the cache is cold or down.
    /// True when another alert already carries this fingerprint in-window.
    pub async fn fingerprint_seen_since(
        &self,
        fingerprint: &str,
        since: DateTime<Utc>,
        exclude: Uuid,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alerts \
             WHERE fingerprint = $1 AND id <> $2 AND created_at >= $3 \
               AND status <> 'duplicate'",
        )
        .bind(fingerprint)
        .bind(exclude)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Count of recent similar high-risk alerts for the historical multiplier
    pub async fn recent_high_risk_count(
        &self,
        asset_id: Option<&str>,
        source_ip: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        if asset_id.is_none() && source_ip.is_none() {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alerts a \
             JOIN triage_results t ON t.alert_id = a.id \
             WHERE t.risk_level IN ('high', 'critical') \
               AND a.created_at >= $1 \
               AND ((a.asset_id IS NOT NULL AND a.asset_id = $2) \
                 OR (a.source_ip IS NOT NULL AND a.source_ip = $3))",
        )
        .bind(since)
        .bind(asset_id)
        .bind(source_ip)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn decode_alert(row: &PgRow) -> Result<Alert> {
    let source_ip: Option<String> = row.try_get("source_ip")?;
    let target_ip: Option<String> = row.try_get("target_ip")?;
    let parse_ip = |raw: Option<String>, col: &str| {
        raw.map(|s| {
            s.parse()
                .map_err(|_| DataError::Decode(format!("bad {col} value: {s}")))
        })
        .transpose()
    };

    Ok(Alert {
        id: row.try_get("id")?,
        alert_id: row.try_get("alert_id")?,
        source: row.try_get("source")?,
        alert_type: parse_enum("alert_type", row.try_get::<&str, _>("alert_type")?)?,
        severity: parse_enum("severity", row.try_get::<&str, _>("severity")?)?,
        status: parse_enum("status", row.try_get::<&str, _>("status")?)?,
        description: row.try_get("description")?,
        timestamp: row.try_get("event_ts")?,
        source_ip: parse_ip(source_ip, "source_ip")?,
        target_ip: parse_ip(target_ip, "target_ip")?,
        file_hash: row.try_get("file_hash")?,
        url: row.try_get("url")?,
        asset_id: row.try_get("asset_id")?,
        user_id: row.try_get("user_id")?,
        process_name: row.try_get("process_name")?,
        raw_payload: row.try_get("raw_payload")?,
        fingerprint: row.try_get("fingerprint")?,
        risk_score: row.try_get("risk_score")?,
        assigned_to: row.try_get("assigned_to")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
