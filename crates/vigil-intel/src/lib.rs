//! Vigil threat-intel aggregator (S4)
//!
//! Consumes `alerts.enriched`: every IOC is scored across the configured
//! threat sources in parallel, the weighted aggregate lands in the
//! `threat_intel` table and on the message, and the alert moves on to
//! `alerts.contextualized`.

pub mod aggregate;
pub mod breaker;
pub mod handler;
pub mod sources;

pub use handler::IntelHandler;
