//! Venue E — numeric-channel adapter (poloniex-like), §4.2.
//!
//! Channels are bare integers on the wire: 1002 is the ticker, 1003 is the
//! 24h-volume broadcast, 1010 is the heartbeat, and every channel id at or
//! below 200 is a pair's order-book-plus-trades channel, keyed per pair by a
//! static table handed out at subscribe time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::error::FeedError;
use crate::normalize::{poloniex_pairs, PairMap};
use crate::store::OrderBookStore;
use crate::types::{price_from_json, size_from_json, Pair, Side};

use super::VenueAdapter;

const TICKER_CHANNEL: i64 = 1002;
const VOLUME_CHANNEL: i64 = 1003;
const HEARTBEAT_CHANNEL: i64 = 1010;
const MAX_BOOK_CHANNEL: i64 = 200;

pub struct Poloniex {
    store: Arc<dyn OrderBookStore>,
    callbacks: Callbacks,
    pairs: Vec<Pair>,
    pair_map: PairMap,
    /// Populated from each book channel's own snapshot frame, since
    /// poloniex assigns channel ids to pairs dynamically at connect time.
    channel_pair: HashMap<i64, Pair>,
}

impl Poloniex {
    pub fn new(store: Arc<dyn OrderBookStore>, pairs: Vec<Pair>, callbacks: Callbacks) -> Self {
        Self {
            store,
            callbacks,
            pairs,
            pair_map: poloniex_pairs(),
            channel_pair: HashMap::new(),
        }
    }

    async fn on_ticker(&self, data: &Value) -> Result<(), FeedError> {
        let Some(cb) = &self.callbacks.ticker else { return Ok(()) };
        let fields = data.as_array().ok_or_else(|| FeedError::ProtocolMalformed("ticker not an array".into()))?;
        let symbol = fields.first().and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("ticker missing symbol".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let bid = price_from_json(fields.get(3).unwrap_or(&Value::Null))?;
        let ask = price_from_json(fields.get(2).unwrap_or(&Value::Null))?;
        cb(self.id(), &pair, bid, ask).await;
        Ok(())
    }

    async fn on_volume(&self, data: &Value) -> Result<(), FeedError> {
        let Some(cb) = &self.callbacks.volume else { return Ok(()) };
        let fields = data.as_array().ok_or_else(|| FeedError::ProtocolMalformed("volume not an array".into()))?;
        let mut volumes = HashMap::new();
        if let Some(Value::Object(map)) = fields.get(2) {
            for (currency, amount) in map {
                let decimal = crate::types::decimal_from_json(amount).unwrap_or(Decimal::ZERO);
                volumes.insert(currency.clone(), decimal);
            }
        }
        cb(self.id(), volumes).await;
        Ok(())
    }

    async fn on_book(&mut self, channel_id: i64, sequence: i64, updates: &[Value]) -> Result<(), FeedError> {
        let mut touched = false;
        for update in updates {
            let msg_type = update.get(0).and_then(Value::as_str).unwrap_or_default();
            match msg_type {
                "i" => {
                    let payload = update.get(1).ok_or_else(|| {
                        FeedError::ProtocolMalformed("poloniex 'i' frame missing payload".into())
                    })?;
                    let symbol = payload.get("currencyPair").and_then(Value::as_str).ok_or_else(|| {
                        FeedError::ProtocolMalformed("snapshot missing currencyPair".into())
                    })?;
                    let pair = self.pair_map.to_canonical(symbol);
                    self.channel_pair.insert(channel_id, pair.clone());

                    let mut book = crate::store::Book::default();
                    for (side, key) in [(Side::Ask, "asks"), (Side::Bid, "bids")] {
                        if let Some(Value::Object(levels)) = payload.get("orderBook").and_then(|ob| ob.get(match side {
                            Side::Ask => 0,
                            Side::Bid => 1,
                        })) {
                            for (price_str, size_value) in levels {
                                let price = price_str.parse().map_err(|e| {
                                    FeedError::ProtocolMalformed(format!("invalid price {price_str:?}: {e}"))
                                })?;
                                let size = size_from_json(size_value)?;
                                book.side_mut(side).insert(crate::types::Price(price), size);
                            }
                        }
                    }
                    self.store.set_pair_book(&pair, book).await?;
                    touched = true;
                }
                "o" => {
                    let pair = self
                        .channel_pair
                        .get(&channel_id)
                        .cloned()
                        .ok_or_else(|| FeedError::ProtocolMalformed(format!("channel {channel_id} has no snapshot yet")))?;
                    let side = match update.get(1).and_then(Value::as_i64) {
                        Some(1) => Side::Bid,
                        _ => Side::Ask,
                    };
                    let price = price_from_json(update.get(2).unwrap_or(&Value::Null))?;
                    let size = size_from_json(update.get(3).unwrap_or(&Value::Null))?;
                    if size.is_zero() {
                        self.store.remove_if_exists(&pair, side, price).await?;
                    } else {
                        self.store.set(&pair, side, price, size).await?;
                    }
                    touched = true;
                }
                "t" => {
                    let pair = self
                        .channel_pair
                        .get(&channel_id)
                        .cloned()
                        .ok_or_else(|| FeedError::ProtocolMalformed(format!("channel {channel_id} has no snapshot yet")))?;
                    if let Some(cb) = &self.callbacks.trades {
                        let trade_id = update.get(1).map(|v| v.to_string());
                        let side = match update.get(2).and_then(Value::as_i64) {
                            Some(1) => Side::Bid,
                            _ => Side::Ask,
                        };
                        let price = price_from_json(update.get(3).unwrap_or(&Value::Null))?;
                        let size = size_from_json(update.get(4).unwrap_or(&Value::Null))?;
                        cb(self.id(), &pair, trade_id, None, side, size, price).await;
                    }
                }
                other => return Err(FeedError::ProtocolMalformed(format!("unknown poloniex update type {other:?}"))),
            }
        }

        if touched {
            if let (Some(cb), Some(pair)) = (&self.callbacks.l2_book, self.channel_pair.get(&channel_id)) {
                let book = self.store.get_pair_book(pair).await?;
                cb(self.id(), pair, book).await;
            }
        }
        let _ = sequence;
        Ok(())
    }
}

#[async_trait]
impl VenueAdapter for Poloniex {
    fn id(&self) -> &'static str {
        "poloniex"
    }

    fn subscribe_frames(&self) -> Result<Vec<String>, FeedError> {
        let mut frames = Vec::new();
        for pair in &self.pairs {
            let symbol = self.pair_map.to_exchange(pair);
            frames.push(serde_json::to_string(&serde_json::json!({ "command": "subscribe", "channel": symbol }))?);
        }
        frames.push(serde_json::to_string(&serde_json::json!({ "command": "subscribe", "channel": TICKER_CHANNEL }))?);
        Ok(frames)
    }

    async fn handle_message(&mut self, frame: &str) -> Result<(), FeedError> {
        let msg: Value = serde_json::from_str(frame)?;
        let fields = msg.as_array().ok_or_else(|| FeedError::ProtocolMalformed("frame not an array".into()))?;
        let channel_id = fields.first().and_then(Value::as_i64).ok_or_else(|| {
            FeedError::ProtocolMalformed("frame missing channel id".into())
        })?;

        match channel_id {
            TICKER_CHANNEL => self.on_ticker(fields.get(2).unwrap_or(&Value::Null)).await,
            VOLUME_CHANNEL => self.on_volume(&msg).await,
            HEARTBEAT_CHANNEL => Ok(()),
            id if id <= MAX_BOOK_CHANNEL => {
                let sequence = fields.get(1).and_then(Value::as_i64).unwrap_or_default();
                let updates = fields.get(2).and_then(Value::as_array).cloned().unwrap_or_default();
                self.on_book(id, sequence, &updates).await
            }
            other => Err(FeedError::UnknownChannel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InProcessBook;

    fn adapter() -> Poloniex {
        Poloniex::new(Arc::new(InProcessBook::new()), vec![Pair::new("BTC-USDT")], Callbacks::default())
    }

    #[tokio::test]
    async fn snapshot_then_remove_order() {
        let mut adapter = adapter();
        adapter
            .handle_message(
                r#"[14,8767,[["i",{"currencyPair":"USDT_BTC","orderBook":[{"101":"2"},{"100":"5"}]}]]]"#,
            )
            .await
            .unwrap();
        let pair = Pair::new("BTC-USDT");
        let asks = adapter.store.get_pair_side(&pair, Side::Ask).await.unwrap();
        assert_eq!(asks.len(), 1);

        adapter
            .handle_message(r#"[14,8768,[["o",0,"100","0"]]]"#)
            .await
            .unwrap();
        let bids = adapter.store.get_pair_side(&pair, Side::Bid).await.unwrap();
        assert!(bids.is_empty());
    }
}
