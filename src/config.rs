//! Configuration inputs (§6).

use std::time::Duration;

use crate::callbacks::Callbacks;
use crate::types::Pair;

/// Channels a feed can subscribe to. `Book { prec, freq, len }` mirrors
/// bitfinex's `book-R0-F0-25`-style channel suffix (§4.2 Venue A); other
/// adapters ignore the precision fields they don't use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Ticker,
    Trades,
    L2Book,
    L3Book,
    RawBook,
    Volume,
}

/// Which order-book store backend a feed's adapter should use.
#[derive(Clone, Debug, Default)]
pub enum BookBackend {
    #[default]
    InProcess,
    #[cfg(feature = "redis-book")]
    Redis(crate::store::RedisBookConfig),
}

/// Per-feed configuration (§6 "Configuration inputs").
#[derive(Clone)]
pub struct FeedConfig {
    /// Overrides the venue's default websocket endpoint, mainly for tests.
    pub endpoint: Option<String>,
    pub pairs: Vec<Pair>,
    pub channels: Vec<Channel>,
    pub callbacks: Callbacks,
    /// Periodic snapshot refresh intervals, used by the full-order-feed
    /// synthesized L3 channel (§4.2 Venue C).
    pub intervals: Option<Vec<Duration>>,
    pub book_backend: BookBackend,
    /// Bound on the adapter-to-sink queue; `None` dispatches inline. See
    /// §9 "Callback isolation".
    pub queue_depth: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            pairs: Vec::new(),
            channels: Vec::new(),
            callbacks: Callbacks::default(),
            intervals: None,
            book_backend: BookBackend::default(),
            queue_depth: None,
        }
    }
}

impl FeedConfig {
    /// The sinks an adapter should actually be constructed with: `callbacks`
    /// as configured, rewrapped behind a bounded queue if `queue_depth` was
    /// set (§9 "Callback isolation").
    pub fn resolved_callbacks(&self) -> Callbacks {
        match self.queue_depth {
            Some(depth) => self.callbacks.clone().queued(depth),
            None => self.callbacks.clone(),
        }
    }
}

/// Handler-wide configuration (§6).
#[derive(Clone, Copy, Debug)]
pub struct HandlerConfig {
    pub retries: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self { retries: 10 }
    }
}
