//! C2 — venue adapters.
//!
//! Each adapter owns its venue-specific protocol state exclusively; the
//! order-book store (C1) is the only resource shared with its caller. Per
//! Design Note 1, adapters are unified behind one dynamic-dispatch trait so
//! the session supervisor (C3) can drive any of them identically.

use async_trait::async_trait;

use crate::error::FeedError;

pub mod bitfinex;
pub mod bitmex;
pub mod coinbase;
pub mod gemini;
pub mod poloniex;

/// A frame to send while subscribing, or a raw inbound text frame to parse.
pub type RawFrame = str;

/// The capability every venue adapter implements: announce subscriptions,
/// then translate each inbound frame into store mutations and callbacks.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Venue identifier, used for `feed` fields in sinks and logging.
    fn id(&self) -> &'static str;

    /// Returns the subscription frames to send right after connecting.
    fn subscribe_frames(&self) -> Result<Vec<String>, FeedError>;

    /// Parses and applies one inbound frame. Implementations never retain
    /// cross-session state beyond what's rebuilt by `subscribe_frames` plus
    /// the first snapshot — a reconnect always begins in the initial state.
    async fn handle_message(&mut self, frame: &str) -> Result<(), FeedError>;
}

/// Per-order identity map used by raw/L3-book adapters to reverse a
/// specific order's contribution to an aggregated price level (§3 `OrderRef`).
#[derive(Debug, Clone, Copy)]
pub struct OrderRefEntry {
    pub price: crate::types::Price,
    pub size: crate::types::Size,
    pub side: crate::types::Side,
}
