//! Vigil ingestor (S1)
//!
//! HTTP intake for security alerts: schema validation, per-client rate
//! limiting, canonical row persistence, and emission to `alerts.raw`. The
//! row always exists before the message does.

pub mod http;
pub mod intake;
pub mod service;

pub use service::IngestService;
