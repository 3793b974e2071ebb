//! Error kinds for the feed handler, per the error-handling design in §7.

/// Errors surfaced by the order-book store (§4.1 "Failure").
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A contract requiring presence (e.g. `remove`) was violated.
    #[error("level not found for {pair}/{side:?} @ {price}")]
    NotFound {
        pair: crate::types::Pair,
        side: crate::types::Side,
        price: crate::types::Price,
    },

    /// The remote backend (e.g. Redis) returned an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// A mutation would have produced a negative size not explicitly permitted.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Errors raised while driving a feed: parsing, sequencing, and connection
/// lifecycle failures (§7).
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("protocol malformed: {0}")]
    ProtocolMalformed(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("sequence gap on {pair}: expected {expected}, got {got}")]
    SequenceGap {
        pair: crate::types::Pair,
        expected: u64,
        got: u64,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),
}

impl From<StoreError> for FeedError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { pair, side, price } => {
                FeedError::ProtocolMalformed(format!("no level {pair}/{side:?} @ {price}"))
            }
            StoreError::Backend(msg) => FeedError::BackendUnavailable(msg),
            StoreError::InvariantViolation(msg) => FeedError::InvariantViolation(msg),
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::ProtocolMalformed(e.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::BackendUnavailable(e.to_string())
    }
}
