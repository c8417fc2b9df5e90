//! Structured error kinds shared across the engine.
//!
//! Internal plumbing still uses `anyhow::Result` for `?`-composition; component
//! entry points convert into `EngineError` at their boundary so callers can
//! match on kind.

use thiserror::Error;

/// Classification of a face-service failure, used to decide whether a caller
/// should retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Connection/read timeout.
    Timeout,
    /// 5xx or connection reset: may succeed on retry.
    Transient,
    /// 4xx: retrying with the same input will not help.
    Permanent,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(String),

    #[error("duplicate file: hash {hash} already stored as image {existing_id}")]
    DuplicateFile { hash: String, existing_id: i64 },

    #[error("external service error ({kind:?}): {message}")]
    ExternalService {
        kind: ServiceErrorKind,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Db(e.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(e: toml::ser::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl From<ureq::Error> for EngineError {
    fn from(e: ureq::Error) -> Self {
        match &e {
            ureq::Error::Status(code, _) if (400..500).contains(code) => EngineError::ExternalService {
                kind: ServiceErrorKind::Permanent,
                message: e.to_string(),
            },
            ureq::Error::Status(_, _) => EngineError::ExternalService {
                kind: ServiceErrorKind::Transient,
                message: e.to_string(),
            },
            ureq::Error::Transport(t) => {
                let kind = if t.kind() == ureq::ErrorKind::Io || t.kind() == ureq::ErrorKind::ConnectionFailed {
                    ServiceErrorKind::Transient
                } else {
                    ServiceErrorKind::Timeout
                };
                EngineError::ExternalService {
                    kind,
                    message: e.to_string(),
                }
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
