use crate::ports::{FetchError, IdentityError};

/// Core error type.
///
/// Adapter crates map their specific failures into this type so the bot core
/// can handle them consistently (user-facing message vs retryable).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),

    #[error("content fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
