//! Venue A — numeric-channel-keyed adapter (bitfinex-like), §4.2.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::config::Channel;
use crate::error::FeedError;
use crate::normalize::{bitfinex_pairs, PairMap};
use crate::store::{Book, OrderBookStore};
use crate::types::{price_from_json, size_from_json, Pair, Price, Side, Size};

use super::{OrderRefEntry, VenueAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    Ticker,
    Trades,
    Book { raw: bool },
}

#[derive(Debug, Clone)]
struct ChannelBinding {
    pair: Pair,
    kind: ChannelKind,
}

pub struct Bitfinex {
    store: Arc<dyn OrderBookStore>,
    callbacks: Callbacks,
    pairs: Vec<Pair>,
    channels: Vec<Channel>,
    pair_map: PairMap,
    channel_map: HashMap<i64, ChannelBinding>,
    order_map: HashMap<i64, OrderRefEntry>,
}

impl Bitfinex {
    pub fn new(store: Arc<dyn OrderBookStore>, pairs: Vec<Pair>, channels: Vec<Channel>, callbacks: Callbacks) -> Self {
        Self {
            store,
            callbacks,
            pairs,
            channels,
            pair_map: bitfinex_pairs(),
            channel_map: HashMap::new(),
            order_map: HashMap::new(),
        }
    }

    fn bind_channel(&mut self, chan_id: i64, msg: &serde_json::Map<String, Value>) -> Result<(), FeedError> {
        let symbol = msg.get("symbol").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("subscription ack missing symbol".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let kind = match msg.get("channel").and_then(Value::as_str) {
            Some("ticker") => ChannelKind::Ticker,
            Some("trades") => ChannelKind::Trades,
            Some("book") => {
                let raw = msg.get("prec").and_then(Value::as_str) == Some("R0");
                ChannelKind::Book { raw }
            }
            other => {
                return Err(FeedError::ProtocolMalformed(format!(
                    "invalid subscription ack channel {other:?}"
                )))
            }
        };
        self.channel_map.insert(chan_id, ChannelBinding { pair, kind });
        Ok(())
    }

    async fn on_ticker(&self, pair: &Pair, payload: &Value) -> Result<(), FeedError> {
        let Value::Array(tuple) = payload else {
            return Ok(()); // heartbeats arrive as the literal string "hb"
        };
        if tuple.len() < 10 {
            return Err(FeedError::ProtocolMalformed("ticker tuple too short".into()));
        }
        let bid = price_from_json(&tuple[0])?;
        let ask = price_from_json(&tuple[2])?;
        if let Some(cb) = &self.callbacks.ticker {
            cb(self.id(), pair, bid, ask).await;
        }
        Ok(())
    }

    async fn emit_trade(&self, pair: &Pair, trade: &Value) -> Result<(), FeedError> {
        let Value::Array(fields) = trade else {
            return Err(FeedError::ProtocolMalformed("trade must be a tuple".into()));
        };
        if fields.len() < 4 {
            return Err(FeedError::ProtocolMalformed("trade tuple too short".into()));
        }
        let amount = size_from_json(&fields[2])?;
        let side = Side::from_signed_amount(amount.0);
        let price = price_from_json(&fields[3])?;
        if let Some(cb) = &self.callbacks.trades {
            cb(self.id(), pair, None, None, side, amount.abs(), price).await;
        }
        Ok(())
    }

    async fn on_trades(&self, pair: &Pair, frame: &[Value]) -> Result<(), FeedError> {
        match &frame[1] {
            Value::Array(snapshot) => {
                for trade in snapshot {
                    self.emit_trade(pair, trade).await?;
                }
            }
            Value::String(tag) if tag == "te" => {
                self.emit_trade(pair, &frame[2]).await?;
            }
            Value::String(tag) if tag == "tu" => {} // updates ignored per spec
            Value::String(tag) if tag == "hb" => {}
            other => return Err(FeedError::ProtocolMalformed(format!("unexpected trade frame {other:?}"))),
        }
        Ok(())
    }

    async fn emit_book(&self, pair: &Pair, raw: bool) -> Result<(), FeedError> {
        let book = self.store.get_pair_book(pair).await?;
        if raw {
            if let Some(cb) = &self.callbacks.l3_book {
                cb(self.id(), pair, None, None, book).await;
            }
        } else if let Some(cb) = &self.callbacks.l2_book {
            cb(self.id(), pair, book).await;
        }
        Ok(())
    }

    async fn on_book(&self, pair: &Pair, payload: &Value) -> Result<(), FeedError> {
        match payload {
            Value::Array(entries) if matches!(entries.first(), Some(Value::Array(_))) => {
                self.store.delete_pair(pair).await?;
                for entry in entries {
                    let Value::Array(fields) = entry else { continue };
                    let price = price_from_json(&fields[0])?;
                    let amount = size_from_json(&fields[2])?;
                    let side = Side::from_signed_amount(amount.0);
                    self.store.set(pair, side, price, amount.abs()).await?;
                }
            }
            Value::Array(fields) if fields.len() == 3 => {
                let price = price_from_json(&fields[0])?;
                let count = &fields[1];
                let amount = size_from_json(&fields[2])?;
                let side = Side::from_signed_amount(amount.0);
                let count_positive = match count {
                    Value::Number(n) => n.as_i64().map(|v| v > 0).unwrap_or(true),
                    _ => true,
                };
                if count_positive {
                    self.store.set(pair, side, price, amount.abs()).await?;
                } else {
                    self.store.remove_if_exists(pair, side, price).await?;
                }
            }
            Value::String(tag) if tag == "hb" => return Ok(()),
            other => return Err(FeedError::ProtocolMalformed(format!("unexpected book frame {other:?}"))),
        }
        self.emit_book(pair, false).await
    }

    async fn on_raw_book(&mut self, pair: &Pair, payload: &Value) -> Result<(), FeedError> {
        match payload {
            Value::Array(entries) if matches!(entries.first(), Some(Value::Array(_))) => {
                self.store.delete_pair(pair).await?;
                for entry in entries {
                    let Value::Array(fields) = entry else { continue };
                    let order_id = fields[0].as_i64().ok_or_else(|| {
                        FeedError::ProtocolMalformed("raw book order id not an integer".into())
                    })?;
                    let price = price_from_json(&fields[1])?;
                    let amount = size_from_json(&fields[2])?;
                    let side = Side::from_signed_amount(amount.0);
                    let abs_amount = amount.abs();
                    self.store
                        .increment_if_exists_else_set_abs(pair, side, price, abs_amount)
                        .await?;
                    self.order_map.insert(order_id, OrderRefEntry { price, size: abs_amount, side });
                }
            }
            Value::Array(fields) if fields.len() == 3 => {
                let order_id = fields[0].as_i64().ok_or_else(|| {
                    FeedError::ProtocolMalformed("raw book order id not an integer".into())
                })?;
                let price = price_from_json(&fields[1])?;
                let amount = size_from_json(&fields[2])?;

                if price.0.is_zero() {
                    // cancellation: reverse the order's last known contribution
                    if let Some(prior) = self.order_map.remove(&order_id) {
                        self.store
                            .decrement_and_remove_if_zero(pair, prior.side, prior.price, prior.size)
                            .await?;
                    }
                } else {
                    let side = Side::from_signed_amount(amount.0);
                    let abs_amount = amount.abs();
                    // Design Note (§9): if this order was previously at a different
                    // price, reverse its old contribution before applying the new one
                    // so a re-keying never double-counts.
                    if let Some(prior) = self.order_map.get(&order_id).copied() {
                        if prior.price != price || prior.side != side {
                            self.store
                                .decrement_and_remove_if_zero(pair, prior.side, prior.price, prior.size)
                                .await?;
                        }
                    }
                    self.store
                        .increment_if_exists_else_set_abs(pair, side, price, abs_amount)
                        .await?;
                    self.order_map.insert(order_id, OrderRefEntry { price, size: abs_amount, side });
                }
            }
            Value::String(tag) if tag == "hb" => return Ok(()),
            other => return Err(FeedError::ProtocolMalformed(format!("unexpected raw book frame {other:?}"))),
        }
        self.emit_book(pair, true).await
    }
}

#[async_trait]
impl VenueAdapter for Bitfinex {
    fn id(&self) -> &'static str {
        "bitfinex"
    }

    fn subscribe_frames(&self) -> Result<Vec<String>, FeedError> {
        let mut frames = Vec::new();
        for channel in &self.channels {
            for pair in &self.pairs {
                let symbol = self.pair_map.to_exchange(pair);
                let mut message = serde_json::Map::new();
                message.insert("event".into(), Value::String("subscribe".into()));
                match channel {
                    Channel::Ticker => {
                        message.insert("channel".into(), Value::String("ticker".into()));
                    }
                    Channel::Trades => {
                        message.insert("channel".into(), Value::String("trades".into()));
                    }
                    Channel::L2Book => {
                        message.insert("channel".into(), Value::String("book".into()));
                        message.insert("prec".into(), Value::String("P0".into()));
                    }
                    Channel::RawBook | Channel::L3Book => {
                        message.insert("channel".into(), Value::String("book".into()));
                        message.insert("prec".into(), Value::String("R0".into()));
                    }
                    Channel::Volume => continue, // bitfinex has no volume channel
                }
                message.insert("symbol".into(), Value::String(symbol));
                frames.push(serde_json::to_string(&Value::Object(message))?);
            }
        }
        Ok(frames)
    }

    async fn handle_message(&mut self, frame: &str) -> Result<(), FeedError> {
        let value: Value = serde_json::from_str(frame)?;
        match value {
            Value::Array(ref items) => {
                let chan_id = items[0].as_i64().ok_or_else(|| {
                    FeedError::ProtocolMalformed("channel frame missing numeric chanId".into())
                })?;
                if items.get(1).and_then(Value::as_str) == Some("hb") {
                    return Ok(());
                }
                let Some(binding) = self.channel_map.get(&chan_id).cloned() else {
                    return Err(FeedError::UnknownChannel(format!("unbound channel {chan_id}")));
                };
                match binding.kind {
                    ChannelKind::Ticker => self.on_ticker(&binding.pair, &items[1]).await,
                    ChannelKind::Trades => self.on_trades(&binding.pair, items).await,
                    ChannelKind::Book { raw: false } => self.on_book(&binding.pair, &items[1]).await,
                    ChannelKind::Book { raw: true } => self.on_raw_book(&binding.pair, &items[1]).await,
                }
            }
            Value::Object(ref map) => {
                if map.get("event").and_then(Value::as_str) == Some("error") {
                    return Err(FeedError::ProtocolMalformed(format!("exchange error: {value}")));
                }
                if map.contains_key("chanId") && map.contains_key("symbol") {
                    let chan_id = map["chanId"].as_i64().ok_or_else(|| {
                        FeedError::ProtocolMalformed("chanId not an integer".into())
                    })?;
                    return self.bind_channel(chan_id, map);
                }
                Ok(())
            }
            other => Err(FeedError::ProtocolMalformed(format!("unexpected frame {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Channel;
    use crate::store::InProcessBook;
    use std::str::FromStr;

    fn adapter() -> Bitfinex {
        Bitfinex::new(
            Arc::new(InProcessBook::new()),
            vec![Pair::new("BTC-USD")],
            vec![Channel::L2Book],
            Callbacks::default(),
        )
    }

    #[tokio::test]
    async fn l2_snapshot_then_delete() {
        let mut adapter = adapter();
        adapter
            .handle_message(r#"{"event":"subscribe","chanId":17,"channel":"book","symbol":"BTCUSD","prec":"P0"}"#)
            .await
            .unwrap();

        adapter
            .handle_message(r#"[17, [[100.0, 1, 0.5], [99.0, 2, 0.3], [101.0, 0, -0.2]]]"#)
            .await
            .unwrap();
        adapter.handle_message(r#"[17, [99.0, 0, 0.3]]"#).await.unwrap();

        let pair = Pair::new("BTC-USD");
        let bids = adapter.store.get_pair_side(&pair, Side::Bid).await.unwrap();
        let asks = adapter.store.get_pair_side(&pair, Side::Ask).await.unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[&Price::from_str("100.0").unwrap()], Size::from_str("0.5").unwrap());
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[&Price::from_str("101.0").unwrap()], Size::from_str("0.2").unwrap());
    }

    #[tokio::test]
    async fn raw_book_cancel_reduces_level() {
        let mut adapter = Bitfinex::new(
            Arc::new(InProcessBook::new()),
            vec![Pair::new("BTC-USD")],
            vec![Channel::RawBook],
            Callbacks::default(),
        );
        adapter
            .handle_message(r#"{"event":"subscribe","chanId":17,"channel":"book","symbol":"BTCUSD","prec":"R0"}"#)
            .await
            .unwrap();
        adapter
            .handle_message(r#"[17, [[1, 100.0, 0.5], [2, 100.0, 0.4]]]"#)
            .await
            .unwrap();
        adapter.handle_message(r#"[17, [1, 0, 0.5]]"#).await.unwrap();

        let pair = Pair::new("BTC-USD");
        let size = adapter
            .store
            .get(&pair, Side::Bid, Price::from_str("100.0").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(size, Some(Size::from_str("0.4").unwrap()));
    }

    #[tokio::test]
    async fn unbound_channel_is_rejected() {
        let mut adapter = adapter();
        let err = adapter.handle_message(r#"[99, "hb-not"]"#).await;
        assert!(matches!(err, Err(FeedError::UnknownChannel(_))));
    }
}
