//! FILENAME: result-cache/src/error.rs

use thiserror::Error;

/// Internal persistence failures. These never surface to cache callers;
/// the cache logs them and keeps serving from memory.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cache layout: {0}")]
    InvalidLayout(String),
}
