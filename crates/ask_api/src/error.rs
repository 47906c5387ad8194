use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Message shown to users when no more specific failure text is available.
pub const GENERIC_FAILURE_MESSAGE: &str = "Network error, please try again later.";

#[derive(Debug, Error)]
pub enum AskApiError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header {name}")]
    InvalidHeader { name: String },

    #[error("invalid ask request: {0}")]
    InvalidRequest(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("timed out after {}ms waiting for {phase}", after.as_millis())]
    Timeout {
        phase: TimeoutPhase,
        after: Duration,
    },

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last_error: Box<AskApiError>,
    },

    #[error("request was cancelled")]
    Cancelled,
}

/// Coarse classification used by the retry policy and by callers that only
/// need to know where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskErrorKind {
    Setup,
    Transport,
    Stream,
    Exhausted,
    Cancelled,
}

/// Which wait a [`AskApiError::Timeout`] interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    ResponseHeaders,
    Idle,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResponseHeaders => f.write_str("response headers"),
            Self::Idle => f.write_str("the next stream chunk"),
        }
    }
}

impl AskApiError {
    pub fn kind(&self) -> AskErrorKind {
        match self {
            Self::InvalidBaseUrl(_)
            | Self::InvalidHeader { .. }
            | Self::InvalidRequest(_)
            | Self::Serde(_) => AskErrorKind::Setup,
            Self::Request(_)
            | Self::Status { .. }
            | Self::Timeout {
                phase: TimeoutPhase::ResponseHeaders,
                ..
            } => AskErrorKind::Transport,
            Self::Stream(_)
            | Self::Timeout {
                phase: TimeoutPhase::Idle,
                ..
            } => AskErrorKind::Stream,
            Self::RetryExhausted { .. } => AskErrorKind::Exhausted,
            Self::Cancelled => AskErrorKind::Cancelled,
        }
    }

    /// Whether a failure is worth another attempt under
    /// [`RetryClassification::TransientOnly`](crate::retry::RetryClassification).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, message } => {
                crate::retry::is_retryable_http_error(status.as_u16(), message)
            }
            Self::Request(error) => !error.is_builder() && !error.is_decode(),
            Self::Timeout { .. } | Self::Stream(_) => true,
            Self::RetryExhausted { last_error, .. } => last_error.is_retryable(),
            Self::InvalidBaseUrl(_)
            | Self::InvalidHeader { .. }
            | Self::InvalidRequest(_)
            | Self::Serde(_)
            | Self::Cancelled => false,
        }
    }

    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::RetryExhausted { last_error, .. } => last_error.user_message(),
            Self::Status { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::InvalidRequest(message) => message.clone(),
            Self::Cancelled => self.to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_owned(),
        }
    }
}

/// A single malformed `data:` frame. Recovered locally by the decoder.
#[derive(Debug, Error)]
#[error("dropped malformed frame {payload:?}: {source}")]
pub struct FrameParseWarning {
    pub payload: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Flat {
        message: String,
    },
    Nested {
        error: ErrorBodyFields,
    },
    Plain {
        error: String,
    },
}

#[derive(Debug, Deserialize)]
struct ErrorBodyFields {
    message: Option<String>,
}

pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let from_json = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Flat { message }) => Some(message),
        Ok(ErrorBody::Nested { error }) => error.message,
        Ok(ErrorBody::Plain { error }) => Some(error),
        Err(_) => None,
    };

    if let Some(message) = from_json.filter(|message| !message.trim().is_empty()) {
        return message;
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    }
}
