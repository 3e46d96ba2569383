use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Unknown venue or adapter. A caller bug, never retryable.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("source unavailable for {venue}: {reason}")]
    SourceUnavailable { venue: String, reason: String },
    #[error("unreadable listing for {venue}: {reason}")]
    Parse { venue: String, reason: String },
}

impl DiscoveryError {
    pub fn unavailable(venue: &str, reason: impl fmt::Display) -> Self {
        DiscoveryError::SourceUnavailable {
            venue: venue.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(venue: &str, reason: impl fmt::Display) -> Self {
        DiscoveryError::Parse {
            venue: venue.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::SourceUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// One item of a batch that could not be fully extracted. Collected and
/// logged; siblings are unaffected.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialExtractionFailure {
    pub item: String,
    pub reason: String,
}

impl PartialExtractionFailure {
    pub fn new(item: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            item: item.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for PartialExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.reason)
    }
}
