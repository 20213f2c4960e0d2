//! Vigil persistence layer
//!
//! The relational store owns persistent state; the cache is a derived,
//! rebuildable projection; the vector index is derived from committed
//! alerts. Every idempotence property survives a cold or absent cache.

pub mod cache;
pub mod db;
pub mod vector;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("row decode error: {0}")]
    Decode(String),
    #[error("vector index error: {0}")]
    Vector(String),
}

impl DataError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Self::Cache(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            Self::Serialize(_) | Self::Decode(_) => false,
            Self::Vector(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
