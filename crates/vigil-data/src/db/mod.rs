//! Postgres repositories
//!
//! Runtime-bound queries over a shared pool. Enum columns are TEXT in their
//! wire (snake_case) form; list and blob columns are JSONB.

pub mod alerts;
pub mod audit;
pub mod context;
pub mod intel;
pub mod triage;

use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::{DataError, Result};

pub use alerts::AlertRepo;
pub use audit::{AuditEntry, AuditRepo};
pub use context::ContextRepo;
pub use intel::IntelRepo;
pub use triage::TriageRepo;

const SCHEMA: &str = include_str!("schema.sql");

/// Shared database handle; repositories are cheap views over the pool
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply the idempotent schema
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Liveness probe for /health
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn alerts(&self) -> AlertRepo {
        AlertRepo::new(self.pool.clone())
    }

    pub fn context(&self) -> ContextRepo {
        ContextRepo::new(self.pool.clone())
    }

    pub fn intel(&self) -> IntelRepo {
        IntelRepo::new(self.pool.clone())
    }

    pub fn triage(&self) -> TriageRepo {
        TriageRepo::new(self.pool.clone())
    }

    pub fn audit(&self) -> AuditRepo {
        AuditRepo::new(self.pool.clone())
    }
}

/// Decode a TEXT column holding the snake_case wire form of an enum
pub(crate) fn parse_enum<T: DeserializeOwned>(column: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| DataError::Decode(format!("bad {column} value: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::model::{AlertStatus, AlertType, ThreatLevel};

    #[test]
    fn enum_column_decoding() {
        let t: AlertType = parse_enum("alert_type", "data_exfiltration").unwrap();
        assert_eq!(t, AlertType::DataExfiltration);
        let s: AlertStatus = parse_enum("status", "in_progress").unwrap();
        assert_eq!(s, AlertStatus::InProgress);
        let l: ThreatLevel = parse_enum("threat_level", "clean").unwrap();
        assert_eq!(l, ThreatLevel::Clean);
        assert!(parse_enum::<AlertType>("alert_type", "bogus").is_err());
    }
}
