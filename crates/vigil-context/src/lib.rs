//! Vigil context collector (S3)
//!
//! Consumes `alerts.normalized` and enriches each alert with network, asset,
//! and user context from pluggable providers. Missing or slow providers
//! degrade to partial rows; the stage always forwards.

pub mod collectors;
pub mod handler;
pub mod network;
pub mod providers;

pub use collectors::Collectors;
pub use handler::ContextHandler;
