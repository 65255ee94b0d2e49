//! Error taxonomy for photo acquisition.
//!
//! Transport failures ([`NetworkError`]) and undecodable responses
//! ([`ParseError`]) are kept apart so callers can tell "server unreachable"
//! from "server returned garbage". A pin whose search yields zero pages is not
//! an error at all; see [`crate::Discovery::Empty`].

use crate::{photo::PhotoId, pin::PinId};

/// A transport-level failure talking to the search API or an asset host.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} was cancelled")]
    Cancelled { url: String },
}

impl NetworkError {
    pub fn transport(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Cancelled { .. } => false,
        }
    }
}

/// A response arrived but did not have the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("search API rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },
}

/// Everything that can go wrong discovering or fetching a page for a pin.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("page {requested} is outside 1..={total_pages}")]
    InvalidPage { requested: u32, total_pages: u32 },
    #[error("pin {0} not found")]
    PinNotFound(PinId),
    #[error("photo {0} not found")]
    PhotoNotFound(PhotoId),
    #[error("pin {0} was deleted while a fetch was in flight")]
    Cancelled(PinId),
    #[error(transparent)]
    Records(#[from] anyhow::Error),
}

impl FetchError {
    /// A short, human-readable explanation suitable for showing to a user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Could not reach the photo service. Check your connection and try again.".into()
            }
            Self::Parse(ParseError::Rejected { message, .. }) => {
                format!("The photo service rejected the search: {message}")
            }
            Self::Parse(_) => "The photo service returned an unexpected response.".into(),
            Self::InvalidPage { .. } => "That page of results does not exist.".into(),
            Self::PinNotFound(_) => "That pin no longer exists.".into(),
            Self::PhotoNotFound(_) => "That photo no longer exists.".into(),
            Self::Cancelled(_) => "The pin was removed before its photos finished loading.".into(),
            Self::Records(e) => format!("Could not save photos: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_parse_failures_stay_distinct() {
        let net: FetchError = NetworkError::Status {
            url: "https://example.com".into(),
            status: 503,
        }
        .into();
        let parse: FetchError = ParseError::MissingField("photos").into();

        assert!(matches!(net, FetchError::Network(_)));
        assert!(matches!(parse, FetchError::Parse(_)));
        assert_ne!(net.user_message(), parse.user_message());
    }

    #[test]
    fn transient_classification() {
        let status = |status| NetworkError::Status {
            url: String::new(),
            status,
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!NetworkError::Cancelled { url: String::new() }.is_transient());
        assert!(NetworkError::transport("u", "connection reset").is_transient());
    }
}
