//! Error types for aivis-speaker

use std::fmt;
use std::io;
use thiserror::Error;

/// Failure category reported by the synthesis API
///
/// The same category is produced whether the service answered with an HTTP
/// error status or with a `{status_code, detail}` object inside a 200 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// 400 - the text or parameters were rejected
    BadRequest,
    /// 401 - the API key is missing or invalid
    Unauthorized,
    /// 402 - the account ran out of credit
    InsufficientCredit,
    /// 404 - unknown model UUID
    ModelNotFound,
    /// 429 - too many requests
    RateLimited,
    /// 500 - failure inside the service
    InternalServerError,
    /// 503 - outage or maintenance
    ServiceUnavailable,
    /// Any other status code
    Unexpected,
}

impl ApiErrorCategory {
    /// Classify an HTTP (or embedded) status code
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::InsufficientCredit,
            404 => Self::ModelNotFound,
            429 => Self::RateLimited,
            500 => Self::InternalServerError,
            503 => Self::ServiceUnavailable,
            _ => Self::Unexpected,
        }
    }

    /// Human-readable explanation shown to the user
    pub fn message(&self) -> &'static str {
        match self {
            Self::BadRequest => "Bad request: check the text and voice parameters",
            Self::Unauthorized => "Authentication failed: check the AIVIS_API_KEY environment variable",
            Self::InsufficientCredit => "Insufficient credit on the Aivis Cloud account",
            Self::ModelNotFound => "The requested voice model UUID was not found",
            Self::RateLimited => "API rate limit reached: wait a moment and try again",
            Self::InternalServerError => "Internal server error on the Aivis Cloud side",
            Self::ServiceUnavailable => "Aivis Cloud API is unavailable: try again later",
            Self::Unexpected => "Unexpected API error",
        }
    }
}

impl fmt::Display for ApiErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Main error type for aivis-speaker
#[derive(Error, Debug)]
pub enum SpeakerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{category} (HTTP {status}){}", detail_suffix(.detail))]
    Api {
        category: ApiErrorCategory,
        status: u16,
        detail: String,
    },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("INI parse error: {0}")]
    IniParse(String),

    #[error("{0}")]
    Other(String),
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

impl SpeakerError {
    /// Build an API error from a status code and the service's detail text
    pub fn api(status: u16, detail: impl Into<String>) -> Self {
        SpeakerError::Api {
            category: ApiErrorCategory::from_status(status),
            status,
            detail: detail.into(),
        }
    }

    /// Category of an API error, if this is one
    pub fn api_category(&self) -> Option<ApiErrorCategory> {
        match self {
            SpeakerError::Api { category, .. } => Some(*category),
            _ => None,
        }
    }
}

/// Result type alias for aivis-speaker operations
pub type Result<T> = std::result::Result<T, SpeakerError>;

impl From<String> for SpeakerError {
    fn from(s: String) -> Self {
        SpeakerError::Other(s)
    }
}

impl From<&str> for SpeakerError {
    fn from(s: &str) -> Self {
        SpeakerError::Other(s.to_string())
    }
}
