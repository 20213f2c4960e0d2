//! Triage result rows, at most one per alert
//!
//! The upsert bumps `result_version` inside the conflict clause, so the row
//! lock taken by the update serializes concurrent retries; `alerts.risk_score`
//! is written in the same transaction.

use sqlx::PgPool;

use vigil_core::model::TriageResult;

use crate::Result;

pub struct TriageRepo {
    pool: PgPool,
}

impl TriageRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the result and the alert's risk score transactionally.
    /// Returns the stored `result_version`.
    pub async fn upsert(&self, result: &TriageResult) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let version: i32 = sqlx::query_scalar(
            "INSERT INTO triage_results (alert_id, risk_score, risk_level, confidence, \
             analysis_text, key_findings, recommended_actions, iocs, model_used, \
             processing_ms, result_version, requires_human_review) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11) \
             ON CONFLICT (alert_id) DO UPDATE SET \
               risk_score = EXCLUDED.risk_score, \
               risk_level = EXCLUDED.risk_level, \
               confidence = EXCLUDED.confidence, \
               analysis_text = EXCLUDED.analysis_text, \
               key_findings = EXCLUDED.key_findings, \
               recommended_actions = EXCLUDED.recommended_actions, \
               iocs = EXCLUDED.iocs, \
               model_used = EXCLUDED.model_used, \
               processing_ms = EXCLUDED.processing_ms, \
               result_version = triage_results.result_version + 1, \
               requires_human_review = EXCLUDED.requires_human_review, \
               updated_at = now() \
             RETURNING result_version",
        )
        .bind(result.alert_id)
        .bind(result.risk_score)
        .bind(result.risk_level.as_str())
        .bind(result.confidence)
        .bind(&result.analysis_text)
        .bind(serde_json::to_value(&result.key_findings)?)
        .bind(serde_json::to_value(&result.recommended_actions)?)
        .bind(serde_json::to_value(&result.iocs_extracted)?)
        .bind(&result.model_used)
        .bind(result.processing_ms as i64)
        .bind(result.requires_human_review)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE alerts SET risk_score = $2, updated_at = now() WHERE id = $1")
            .bind(result.alert_id)
            .bind(result.risk_score)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }
}
