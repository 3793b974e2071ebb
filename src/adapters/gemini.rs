//! Venue D — single-pair sequenced adapter (gemini-like), §4.2.
//!
//! Gemini multiplexes exactly one pair per websocket session; a second pair
//! (or a channel filter) requires a second connection entirely, so the
//! constructor rejects configs asking for more than one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::config::Channel;
use crate::error::FeedError;
use crate::normalize::{gemini_pairs, PairMap};
use crate::store::OrderBookStore;
use crate::types::{price_from_json, size_from_json, Pair, Side};

use super::VenueAdapter;

pub struct Gemini {
    store: Arc<dyn OrderBookStore>,
    callbacks: Callbacks,
    pair: Pair,
    pair_map: PairMap,
}

impl Gemini {
    /// Fails with `ConfigInvalid` unless exactly one pair is given — gemini's
    /// market-data websocket is scoped to a single symbol per connection.
    pub fn new(store: Arc<dyn OrderBookStore>, pairs: Vec<Pair>, callbacks: Callbacks) -> Result<Self, FeedError> {
        if pairs.len() != 1 {
            return Err(FeedError::ConfigInvalid(format!(
                "gemini requires exactly one pair per session, got {}",
                pairs.len()
            )));
        }
        Ok(Self {
            store,
            callbacks,
            pair: pairs.into_iter().next().expect("length checked above"),
            pair_map: gemini_pairs(),
        })
    }

    fn side_of(value: &Value) -> Side {
        match value.as_str() {
            Some("ask") => Side::Ask,
            _ => Side::Bid,
        }
    }

    async fn on_book(&self, event: &Value) -> Result<(), FeedError> {
        let side = Self::side_of(event.get("side").unwrap_or(&Value::Null));
        let price = price_from_json(event.get("price").unwrap_or(&Value::Null))?;
        let size = size_from_json(event.get("remaining").unwrap_or(&Value::Null))?;
        let reason = event.get("reason").and_then(Value::as_str).unwrap_or_default();

        if reason == "initial" {
            self.store.set(&self.pair, side, price, size).await?;
        } else if size.is_zero() {
            self.store.remove_if_exists(&self.pair, side, price).await?;
        } else {
            self.store.set(&self.pair, side, price, size).await?;
        }
        Ok(())
    }

    async fn on_trade(&self, event: &Value) -> Result<(), FeedError> {
        let Some(cb) = &self.callbacks.trades else { return Ok(()) };
        let side = Self::side_of(event.get("makerSide").unwrap_or(&Value::Null));
        let price = price_from_json(event.get("price").unwrap_or(&Value::Null))?;
        let size = size_from_json(event.get("amount").unwrap_or(&Value::Null))?;
        let id = event.get("tid").map(|v| v.to_string());
        cb(self.id(), &self.pair, id, None, side, size, price).await;
        Ok(())
    }

    async fn on_update(&self, msg: &Value) -> Result<(), FeedError> {
        let mut book_touched = false;
        for event in msg.get("events").and_then(Value::as_array).cloned().unwrap_or_default() {
            match event.get("type").and_then(Value::as_str) {
                Some("change") => {
                    self.on_book(&event).await?;
                    book_touched = true;
                }
                Some("trade") => self.on_trade(&event).await?,
                Some("auction") | None => {}
                Some(other) => return Err(FeedError::ProtocolMalformed(format!("unknown event type {other}"))),
            }
        }
        if book_touched {
            if let Some(cb) = &self.callbacks.l2_book {
                let book = self.store.get_pair_book(&self.pair).await?;
                cb(self.id(), &self.pair, book).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VenueAdapter for Gemini {
    fn id(&self) -> &'static str {
        "gemini"
    }

    fn subscribe_frames(&self) -> Result<Vec<String>, FeedError> {
        // Gemini's market-data feed subscribes implicitly via the URL path
        // (`/v1/marketdata/{symbol}`); no subscribe frame is sent post-connect.
        let _ = self.pair_map.to_exchange(&self.pair);
        Ok(Vec::new())
    }

    async fn handle_message(&mut self, frame: &str) -> Result<(), FeedError> {
        let msg: Value = serde_json::from_str(frame)?;
        match msg.get("type").and_then(Value::as_str) {
            Some("update") => self.on_update(&msg).await,
            Some("heartbeat") => Ok(()),
            Some(other) => Err(FeedError::ProtocolMalformed(format!("unknown message type {other}"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InProcessBook;

    fn adapter() -> Gemini {
        Gemini::new(Arc::new(InProcessBook::new()), vec![Pair::new("BTC-USD")], Callbacks::default()).unwrap()
    }

    #[test]
    fn rejects_multi_pair_sessions() {
        let err = Gemini::new(
            Arc::new(InProcessBook::new()),
            vec![Pair::new("BTC-USD"), Pair::new("ETH-USD")],
            Callbacks::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FeedError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn initial_snapshot_then_zero_size_removes_level() {
        let mut adapter = adapter();
        adapter
            .handle_message(
                r#"{"type":"update","eventId":1,"events":[{"type":"change","side":"bid","price":"100","remaining":"5","reason":"initial"}]}"#,
            )
            .await
            .unwrap();
        let bids = adapter.store.get_pair_side(&adapter.pair, Side::Bid).await.unwrap();
        assert_eq!(bids.len(), 1);

        adapter
            .handle_message(
                r#"{"type":"update","eventId":2,"events":[{"type":"change","side":"bid","price":"100","remaining":"0","reason":"cancel"}]}"#,
            )
            .await
            .unwrap();
        let bids = adapter.store.get_pair_side(&adapter.pair, Side::Bid).await.unwrap();
        assert!(bids.is_empty());
    }
}
