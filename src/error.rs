//! Error types for the HTTP API client.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer; `detail` is the server's explanation when it sent one.
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;
