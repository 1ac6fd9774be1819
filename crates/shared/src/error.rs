use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a download did not produce local content.
///
/// `Clone` because every caller joined to the same in-flight fetch receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadError {
    #[error("server answered with status {status}")]
    Http { status: u16 },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("server returned an empty body")]
    Empty,
    #[error("download exceeded the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short label used in logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Network { .. } => "network",
            Self::Storage { .. } => "storage",
            Self::Empty => "empty",
            Self::TooLarge { .. } => "too_large",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media storage error: {0}")]
    Storage(String),
    #[error("invalid media url '{0}'")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
