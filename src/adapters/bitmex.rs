//! Venue B — table/action-keyed adapter (bitmex-like), §4.2.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::config::Channel;
use crate::error::FeedError;
use crate::normalize::{bitmex_pairs, PairMap};
use crate::store::OrderBookStore;
use crate::types::{price_from_json, size_from_json, Pair, Price, Side, Size};

use super::VenueAdapter;

pub struct Bitmex {
    store: Arc<dyn OrderBookStore>,
    callbacks: Callbacks,
    pairs: Vec<Pair>,
    channels: Vec<Channel>,
    pair_map: PairMap,
    snapshot_received: bool,
    order_id: HashMap<Pair, HashMap<i64, (Price, Size)>>,
}

impl Bitmex {
    pub fn new(store: Arc<dyn OrderBookStore>, pairs: Vec<Pair>, channels: Vec<Channel>, callbacks: Callbacks) -> Self {
        Self {
            store,
            callbacks,
            pairs,
            channels,
            pair_map: bitmex_pairs(),
            snapshot_received: false,
            order_id: HashMap::new(),
        }
    }

    async fn reset(&mut self) -> Result<(), FeedError> {
        self.snapshot_received = false;
        self.order_id.clear();
        for pair in &self.pairs {
            self.store.delete_pair(pair).await?;
            self.order_id.insert(pair.clone(), HashMap::new());
        }
        Ok(())
    }

    fn side_of(value: &Value) -> Side {
        match value.as_str() {
            Some("Buy") => Side::Bid,
            _ => Side::Ask,
        }
    }

    async fn on_trade(&self, data: &[Value]) -> Result<(), FeedError> {
        let Some(cb) = &self.callbacks.trades else { return Ok(()) };
        for entry in data {
            let symbol = entry.get("symbol").and_then(Value::as_str).ok_or_else(|| {
                FeedError::ProtocolMalformed("trade missing symbol".into())
            })?;
            let pair = self.pair_map.to_canonical(symbol);
            let side = Self::side_of(entry.get("side").unwrap_or(&Value::Null));
            let size = size_from_json(entry.get("size").unwrap_or(&Value::Null))?;
            let price = price_from_json(entry.get("price").unwrap_or(&Value::Null))?;
            let id = entry.get("trdMatchID").and_then(Value::as_str).map(str::to_string);
            cb(self.id(), &pair, id, None, side, size, price).await;
        }
        Ok(())
    }

    async fn on_book(&mut self, action: &str, data: &[Value]) -> Result<(), FeedError> {
        if !self.snapshot_received {
            if action != "partial" {
                return Ok(());
            }
            self.reset().await?;
            self.snapshot_received = true;
        }

        let mut touched_pairs = Vec::new();
        match action {
            "partial" | "insert" => {
                for entry in data {
                    let symbol = entry.get("symbol").and_then(Value::as_str).ok_or_else(|| {
                        FeedError::ProtocolMalformed("book entry missing symbol".into())
                    })?;
                    let pair = self.pair_map.to_canonical(symbol);
                    let side = Self::side_of(entry.get("side").unwrap_or(&Value::Null));
                    let price = price_from_json(entry.get("price").unwrap_or(&Value::Null))?;
                    let size = size_from_json(entry.get("size").unwrap_or(&Value::Null))?;
                    let id = entry.get("id").and_then(Value::as_i64).ok_or_else(|| {
                        FeedError::ProtocolMalformed("book entry missing id".into())
                    })?;
                    self.store.set(&pair, side, price, size).await?;
                    self.order_id.entry(pair.clone()).or_default().insert(id, (price, size));
                    touched_pairs.push(pair);
                }
            }
            "update" => {
                for entry in data {
                    let symbol = entry.get("symbol").and_then(Value::as_str).ok_or_else(|| {
                        FeedError::ProtocolMalformed("book entry missing symbol".into())
                    })?;
                    let pair = self.pair_map.to_canonical(symbol);
                    let side = Self::side_of(entry.get("side").unwrap_or(&Value::Null));
                    let new_size = size_from_json(entry.get("size").unwrap_or(&Value::Null))?;
                    let id = entry.get("id").and_then(Value::as_i64).ok_or_else(|| {
                        FeedError::ProtocolMalformed("book entry missing id".into())
                    })?;
                    let (price, _) = *self
                        .order_id
                        .get(&pair)
                        .and_then(|m| m.get(&id))
                        .ok_or_else(|| FeedError::ProtocolMalformed(format!("update for unknown order {id}")))?;
                    self.store.set(&pair, side, price, new_size).await?;
                    self.order_id.entry(pair.clone()).or_default().insert(id, (price, new_size));
                    touched_pairs.push(pair);
                }
            }
            "delete" => {
                for entry in data {
                    let symbol = entry.get("symbol").and_then(Value::as_str).ok_or_else(|| {
                        FeedError::ProtocolMalformed("book entry missing symbol".into())
                    })?;
                    let pair = self.pair_map.to_canonical(symbol);
                    let side = Self::side_of(entry.get("side").unwrap_or(&Value::Null));
                    let id = entry.get("id").and_then(Value::as_i64).ok_or_else(|| {
                        FeedError::ProtocolMalformed("book entry missing id".into())
                    })?;
                    let (price, size) = self
                        .order_id
                        .get_mut(&pair)
                        .and_then(|m| m.remove(&id))
                        .ok_or_else(|| FeedError::ProtocolMalformed(format!("delete for unknown order {id}")))?;
                    self.store.decrement_and_remove_if_zero(&pair, side, price, size).await?;
                    touched_pairs.push(pair);
                }
            }
            other => return Err(FeedError::ProtocolMalformed(format!("unexpected L2 book action {other}"))),
        }

        if let Some(cb) = &self.callbacks.l2_book {
            touched_pairs.sort();
            touched_pairs.dedup();
            for pair in touched_pairs {
                let book = self.store.get_pair_book(&pair).await?;
                cb(self.id(), &pair, book).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VenueAdapter for Bitmex {
    fn id(&self) -> &'static str {
        "bitmex"
    }

    fn subscribe_frames(&self) -> Result<Vec<String>, FeedError> {
        let mut args = Vec::new();
        for channel in &self.channels {
            let channel_name = match channel {
                Channel::Trades => "trade",
                Channel::L2Book => "orderBookL2",
                _ => continue,
            };
            for pair in &self.pairs {
                args.push(format!("{}:{}", channel_name, self.pair_map.to_exchange(pair)));
            }
        }
        let frame = serde_json::json!({ "op": "subscribe", "args": args });
        Ok(vec![serde_json::to_string(&frame)?])
    }

    async fn handle_message(&mut self, frame: &str) -> Result<(), FeedError> {
        let msg: Value = serde_json::from_str(frame)?;
        if msg.get("info").is_some() {
            return Ok(());
        }
        if let Some(success) = msg.get("subscribe").and(msg.get("success")) {
            if success == &Value::Bool(false) {
                return Err(FeedError::ProtocolMalformed(format!("subscribe failed: {msg}")));
            }
            return Ok(());
        }
        if msg.get("error").is_some() {
            return Err(FeedError::ProtocolMalformed(format!("exchange error: {msg}")));
        }
        let table = msg.get("table").and_then(Value::as_str);
        let data = msg.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let action = msg.get("action").and_then(Value::as_str).unwrap_or_default();
        match table {
            Some("trade") => self.on_trade(&data).await,
            Some("orderBookL2") => self.on_book(action, &data).await,
            Some(other) => Err(FeedError::UnsupportedChannel(other.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InProcessBook;
    use std::str::FromStr;

    fn adapter() -> Bitmex {
        Bitmex::new(
            Arc::new(InProcessBook::new()),
            vec![Pair::new("BTC-USD")],
            vec![Channel::L2Book],
            Callbacks::default(),
        )
    }

    #[tokio::test]
    async fn discards_messages_before_partial() {
        let mut adapter = adapter();
        adapter
            .handle_message(
                r#"{"table":"orderBookL2","action":"insert","data":[{"symbol":"XBTUSD","id":1,"side":"Buy","price":10,"size":5}]}"#,
            )
            .await
            .unwrap();
        assert!(!adapter.snapshot_received);

        adapter
            .handle_message(
                r#"{"table":"orderBookL2","action":"partial","data":[{"symbol":"XBTUSD","id":1,"side":"Buy","price":10,"size":5}]}"#,
            )
            .await
            .unwrap();
        assert!(adapter.snapshot_received);

        adapter
            .handle_message(
                r#"{"table":"orderBookL2","action":"delete","data":[{"symbol":"XBTUSD","id":1,"side":"Buy"}]}"#,
            )
            .await
            .unwrap();

        let pair = Pair::new("BTC-USD");
        let bids = adapter.store.get_pair_side(&pair, Side::Bid).await.unwrap();
        assert!(bids.is_empty());
        let _ = Price::from_str("10").unwrap();
    }
}
