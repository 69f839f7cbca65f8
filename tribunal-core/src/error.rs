use thiserror::Error;

/// All errors produced by tribunal-core.
#[derive(Debug, Error)]
pub enum TribunalError {
    #[error("judge API credential is not configured")]
    MissingCredential,

    #[error("judge returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("response parsing failed: {0}")]
    Parsing(String),

    #[error("request timed out")]
    Timeout,

    #[error("all {attempts} attempts failed, last error: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    /// Terminal outcome of a cancelled generation. Not a failure.
    #[error("generation cancelled")]
    Cancelled,

    #[error("model load failed: {0}")]
    Load(String),

    #[error("model download failed: {0}")]
    Download(String),

    #[error("model delete failed: {0}")]
    Delete(String),

    #[error("unknown model id: {0}")]
    UnknownModel(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("source text is empty")]
    EmptySource,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TribunalError>;
