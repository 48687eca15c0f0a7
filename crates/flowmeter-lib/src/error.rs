//! Error taxonomy shared by the classification and meter pipeline

use thiserror::Error;

/// Errors surfaced by the console core
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("controller returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("lookup store unavailable: {0}")]
    TransientStore(String),

    #[error("failed to load model: {0}")]
    Load(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConsoleError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// HTTP status the console maps this error to
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::Upstream { .. } => 502,
            Self::TransientStore(_) => 503,
            Self::Timeout(_) => 504,
            Self::Load(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::Upstream { .. } => "upstream_error",
            Self::TransientStore(_) => "store_unavailable",
            Self::Load(_) => "load_error",
            Self::Timeout(_) => "timeout",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Upstream {
                status: 504,
                body: format!("controller request timed out: {}", err),
            };
        }
        let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
        Self::Upstream {
            status,
            body: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ConsoleError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;
