//! Venue C — sequenced full-order-feed adapter (gdax/coinbase-like), §4.2.
//!
//! Supports both the synthesized L3 full-order channel (`open`/`match`/
//! `done`/`change`) and the aggregated L2 channel (`snapshot`/`l2update`)
//! side by side, matching the original's dual support.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::callbacks::{Callbacks, L3UpdateKind};
use crate::config::Channel;
use crate::error::FeedError;
use crate::normalize::{coinbase_pairs, PairMap};
use crate::store::OrderBookStore;
use crate::types::{price_from_json, size_from_json, Pair, Price, Side, Size};

use super::VenueAdapter;

const DEFAULT_REST_BASE: &str = "https://api.exchange.coinbase.com";

#[derive(Debug, Clone, Copy)]
struct OpenOrder {
    price: Price,
    size: Size,
    side: Side,
}

pub struct Coinbase {
    store: Arc<dyn OrderBookStore>,
    callbacks: Callbacks,
    pairs: Vec<Pair>,
    channels: Vec<Channel>,
    pair_map: PairMap,
    rest_base: String,
    http: reqwest::Client,
    full_book: bool,
    seq_no: HashMap<Pair, u64>,
    order_map: HashMap<String, OpenOrder>,
}

impl Coinbase {
    pub fn new(
        store: Arc<dyn OrderBookStore>,
        pairs: Vec<Pair>,
        channels: Vec<Channel>,
        callbacks: Callbacks,
        rest_base: Option<String>,
    ) -> Self {
        let full_book = channels.contains(&Channel::L3Book) || channels.contains(&Channel::RawBook);
        Self {
            store,
            callbacks,
            pairs,
            channels,
            pair_map: coinbase_pairs(),
            rest_base: rest_base.unwrap_or_else(|| DEFAULT_REST_BASE.to_string()),
            http: reqwest::Client::new(),
            full_book,
            seq_no: HashMap::new(),
            order_map: HashMap::new(),
        }
    }

    fn side_of(value: &Value) -> Side {
        match value.as_str() {
            Some("sell") => Side::Ask,
            _ => Side::Bid,
        }
    }

    fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
        value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))
    }

    /// Fetches a fresh L3 snapshot over REST and re-seeds the store,
    /// `OrderRef` map and sequence cursor for `pair` (§4.2 Venue C,
    /// sequence-gap recovery).
    pub async fn resnapshot(&mut self, pair: &Pair) -> Result<(), FeedError> {
        let symbol = self.pair_map.to_exchange(pair);
        let url = format!("{}/products/{}/book?level=3", self.rest_base, symbol);
        let resp: Value = self.http.get(&url).send().await?.json().await?;
        let seq = resp
            .get("sequence")
            .and_then(Value::as_u64)
            .ok_or_else(|| FeedError::ProtocolMalformed("snapshot missing sequence".into()))?;

        let mut aggregated: HashMap<Price, Size> = HashMap::new();
        let mut book = crate::store::Book::default();
        for (side, key) in [(Side::Bid, "bids"), (Side::Ask, "asks")] {
            aggregated.clear();
            let rows = resp.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
            for row in rows {
                let Value::Array(fields) = row else { continue };
                let price = price_from_json(&fields[0])?;
                let size = size_from_json(&fields[1])?;
                let order_id = fields[2].as_str().unwrap_or_default().to_string();
                let total = aggregated.entry(price).or_insert(Size::zero());
                *total = *total + size;
                self.order_map.insert(order_id, OpenOrder { price, size, side });
            }
            for (price, size) in &aggregated {
                book.side_mut(side).insert(*price, *size);
            }
        }

        self.store.set_pair_book(pair, book).await?;
        self.seq_no.insert(pair.clone(), seq);
        Ok(())
    }

    async fn on_ticker(&self, msg: &Value) -> Result<(), FeedError> {
        let Some(cb) = &self.callbacks.ticker else { return Ok(()) };
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("ticker missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let bid = price_from_json(msg.get("best_bid").unwrap_or(&Value::Null))?;
        let ask = price_from_json(msg.get("best_ask").unwrap_or(&Value::Null))?;
        cb(self.id(), &pair, bid, ask).await;
        Ok(())
    }

    async fn on_match(&mut self, msg: &Value) -> Result<(), FeedError> {
        let sequence = msg.get("sequence").and_then(Value::as_u64).unwrap_or_default();
        let timestamp = msg.get("time").and_then(Self::parse_time);
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("match missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let price = price_from_json(msg.get("price").unwrap_or(&Value::Null))?;
        let side = Self::side_of(msg.get("side").unwrap_or(&Value::Null));
        let size = size_from_json(msg.get("size").unwrap_or(&Value::Null))?;

        if self.full_book {
            let maker_id = msg.get("maker_order_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let exhausted = match self.order_map.get_mut(&maker_id) {
                Some(maker) => {
                    maker.size = maker.size - size;
                    maker.size.0 <= rust_decimal::Decimal::ZERO
                }
                None => false,
            };
            if exhausted {
                self.order_map.remove(&maker_id);
            }
            self.store.decrement_and_remove_if_zero(&pair, side, price, size).await?;
            if let Some(cb) = &self.callbacks.l3_book_update {
                cb(self.id(), &pair, L3UpdateKind::Trade, timestamp, sequence, side, price, size).await;
            }
        }

        if let Some(cb) = &self.callbacks.trades {
            let trade_id = msg.get("trade_id").map(|v| v.to_string());
            cb(self.id(), &pair, trade_id, timestamp, side, size, price).await;
        }
        Ok(())
    }

    async fn on_l2_snapshot(&self, msg: &Value) -> Result<(), FeedError> {
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("snapshot missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let mut book = crate::store::Book::default();
        for (side, key) in [(Side::Bid, "bids"), (Side::Ask, "asks")] {
            for row in msg.get(key).and_then(Value::as_array).cloned().unwrap_or_default() {
                let Value::Array(fields) = row else { continue };
                let price = price_from_json(&fields[0])?;
                let size = size_from_json(&fields[1])?;
                book.side_mut(side).insert(price, size);
            }
        }
        self.store.set_pair_book(&pair, book).await?;
        Ok(())
    }

    async fn on_l2_update(&self, msg: &Value) -> Result<(), FeedError> {
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("l2update missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        for change in msg.get("changes").and_then(Value::as_array).cloned().unwrap_or_default() {
            let Value::Array(fields) = change else { continue };
            let side = Self::side_of(&fields[0]);
            let price = price_from_json(&fields[1])?;
            let amount = size_from_json(&fields[2])?;
            if amount.is_zero() {
                self.store.remove_if_exists(&pair, side, price).await?;
            } else {
                self.store.set(&pair, side, price, amount).await?;
            }
        }
        if let Some(cb) = &self.callbacks.l2_book {
            let book = self.store.get_pair_book(&pair).await?;
            cb(self.id(), &pair, book).await;
        }
        Ok(())
    }

    async fn on_open(&mut self, msg: &Value) -> Result<(), FeedError> {
        let price = price_from_json(msg.get("price").unwrap_or(&Value::Null))?;
        let side = Self::side_of(msg.get("side").unwrap_or(&Value::Null));
        let size = size_from_json(msg.get("remaining_size").unwrap_or(&Value::Null))?;
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("open missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let order_id = msg.get("order_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let sequence = msg.get("sequence").and_then(Value::as_u64).unwrap_or_default();
        let timestamp = msg.get("time").and_then(Self::parse_time);

        self.store.increment_if_exists_else_set_abs(&pair, side, price, size).await?;
        self.order_map.insert(order_id, OpenOrder { price, size, side });

        if let Some(cb) = &self.callbacks.l3_book_update {
            cb(self.id(), &pair, L3UpdateKind::Open, timestamp, sequence, side, price, size).await;
        }
        Ok(())
    }

    async fn on_done(&mut self, msg: &Value) -> Result<(), FeedError> {
        let Some(price_value) = msg.get("price") else { return Ok(()) };
        let order_id = msg.get("order_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let Some(order) = self.order_map.remove(&order_id) else { return Ok(()) };
        let price = price_from_json(price_value)?;
        let side = Self::side_of(msg.get("side").unwrap_or(&Value::Null));
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("done missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let sequence = msg.get("sequence").and_then(Value::as_u64).unwrap_or_default();
        let timestamp = msg.get("time").and_then(Self::parse_time);

        self.store.decrement_and_remove_if_zero(&pair, side, price, order.size).await?;

        if let Some(cb) = &self.callbacks.l3_book_update {
            cb(self.id(), &pair, L3UpdateKind::Done, timestamp, sequence, side, price, order.size).await;
        }
        Ok(())
    }

    async fn on_change(&mut self, msg: &Value) -> Result<(), FeedError> {
        let order_id = msg.get("order_id").and_then(Value::as_str).unwrap_or_default().to_string();
        if !self.order_map.contains_key(&order_id) {
            return Ok(());
        }
        let price = price_from_json(msg.get("price").unwrap_or(&Value::Null))?;
        let side = Self::side_of(msg.get("side").unwrap_or(&Value::Null));
        let new_size = size_from_json(msg.get("new_size").unwrap_or(&Value::Null))?;
        let old_size = size_from_json(msg.get("old_size").unwrap_or(&Value::Null))?;
        let symbol = msg.get("product_id").and_then(Value::as_str).ok_or_else(|| {
            FeedError::ProtocolMalformed("change missing product_id".into())
        })?;
        let pair = self.pair_map.to_canonical(symbol);
        let size_delta = old_size - new_size;
        let sequence = msg.get("sequence").and_then(Value::as_u64).unwrap_or_default();
        let timestamp = msg.get("time").and_then(Self::parse_time);

        self.store.increment(&pair, side, price, -size_delta).await?;
        self.order_map.insert(order_id, OpenOrder { price, size: new_size, side });

        if let Some(cb) = &self.callbacks.l3_book_update {
            cb(self.id(), &pair, L3UpdateKind::Change, timestamp, sequence, side, price, size_delta).await;
        }
        Ok(())
    }
}

#[async_trait]
impl VenueAdapter for Coinbase {
    fn id(&self) -> &'static str {
        "coinbase"
    }

    fn subscribe_frames(&self) -> Result<Vec<String>, FeedError> {
        let product_ids: Vec<String> = self.pairs.iter().map(|p| self.pair_map.to_exchange(p)).collect();
        let mut channels: Vec<&str> = Vec::new();
        for channel in &self.channels {
            match channel {
                Channel::Ticker => channels.push("ticker"),
                Channel::Trades => channels.push("matches"),
                Channel::L2Book => channels.push("level2"),
                Channel::L3Book | Channel::RawBook => channels.push("full"),
                Channel::Volume => {}
            }
        }
        let frame = serde_json::json!({
            "type": "subscribe",
            "product_ids": product_ids,
            "channels": channels,
        });
        Ok(vec![serde_json::to_string(&frame)?])
    }

    async fn handle_message(&mut self, frame: &str) -> Result<(), FeedError> {
        let msg: Value = serde_json::from_str(frame)?;

        if let (Some(symbol), Some(sequence)) = (
            msg.get("product_id").and_then(Value::as_str),
            msg.get("sequence").and_then(Value::as_u64),
        ) {
            let pair = self.pair_map.to_canonical(symbol);
            match self.seq_no.get(&pair).copied() {
                None => {
                    self.seq_no.insert(pair.clone(), sequence);
                }
                Some(cursor) if sequence <= cursor => return Ok(()),
                Some(cursor) if self.full_book && sequence != cursor + 1 => {
                    // Guard the cursor: the out-of-order frame that triggered
                    // the gap never updates `seq_no`. The snapshot re-seeds it;
                    // the next in-order frame re-establishes continuity.
                    self.resnapshot(&pair).await?;
                    return Ok(());
                }
                Some(_) => {
                    self.seq_no.insert(pair.clone(), sequence);
                }
            }
        }

        match msg.get("type").and_then(Value::as_str) {
            Some("ticker") => self.on_ticker(&msg).await,
            Some("match") | Some("last_match") => self.on_match(&msg).await,
            Some("snapshot") => self.on_l2_snapshot(&msg).await,
            Some("l2update") => self.on_l2_update(&msg).await,
            Some("open") => self.on_open(&msg).await,
            Some("done") => self.on_done(&msg).await,
            Some("change") => self.on_change(&msg).await,
            Some("received") | Some("activate") | Some("subscriptions") => Ok(()),
            Some(other) => Err(FeedError::ProtocolMalformed(format!("invalid message type {other}"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InProcessBook;

    fn adapter() -> Coinbase {
        Coinbase::new(
            Arc::new(InProcessBook::new()),
            vec![Pair::new("BTC-USD")],
            vec![Channel::L3Book],
            Callbacks::default(),
            None,
        )
    }

    #[tokio::test]
    async fn sequence_gap_is_dropped_not_applied() {
        let mut adapter = adapter();
        adapter.seq_no.insert(Pair::new("BTC-USD"), 100);
        // seq == cursor -> dropped
        let result = adapter
            .handle_message(r#"{"type":"received","product_id":"BTC-USD","sequence":100}"#)
            .await;
        assert!(result.is_ok());
        assert_eq!(adapter.seq_no[&Pair::new("BTC-USD")], 100);
    }
}
