//! Vigil core library
//!
//! Shared foundation for the alert triage pipeline:
//! - Canonical alert model and per-stage extension records
//! - Observable validation (IPs, hashes, URLs, timestamps)
//! - Environment-driven configuration
//! - HTTP response envelope and stable error codes
//! - Token-bucket rate limiting and retry/backoff policy

pub mod backoff;
pub mod config;
pub mod envelope;
pub mod error;
pub mod limiter;
pub mod model;
pub mod process;
pub mod validate;

pub use config::Config;
pub use envelope::AlertEnvelope;
pub use error::{ApiError, ApiErrorCode, ApiResponse};
pub use model::{
    Alert, AlertStatus, AlertType, ContextType, EnrichmentContext, EnrichmentStatus, Ioc,
    IocType, RecommendedAction, RiskLevel, Severity, SimilarAlert, ThreatIntelRecord,
    ThreatLevel, ThreatSummary, TriageResult,
};
