//! A multi-exchange cryptocurrency market-data feed handler.
//!
//! Normalizes order-book, trade, ticker and volume updates from several
//! venues' websocket feeds into one shared, atomically-mutated order-book
//! store (`store`), behind a common per-venue adapter interface
//! (`adapters`). The `feedhandler` feature adds the session supervisor
//! (`session`) and feed handler (`handler`) that actually open websocket
//! connections; without it, the crate is just the book, the adapters'
//! pure message-handling logic, and the NBBO aggregator, usable against
//! frames fed in from any transport (e.g. replayed from a file in tests).

pub mod adapters;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod nbbo;
pub mod normalize;
pub mod store;
pub mod types;

#[cfg(feature = "feedhandler")]
pub mod handler;
#[cfg(feature = "feedhandler")]
pub mod session;

pub use callbacks::Callbacks;
pub use config::{BookBackend, Channel, FeedConfig, HandlerConfig};
pub use error::{FeedError, StoreError};
pub use nbbo::Nbbo;
pub use store::{Book, OrderBookStore};
pub use types::{Pair, Price, Side, Size};

#[cfg(feature = "feedhandler")]
pub use handler::FeedHandler;
