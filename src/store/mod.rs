//! C1 — the order-book store.
//!
//! Keyed by `(Pair, Side, Price)`, with atomic compound mutation primitives
//! per §4.1. Two interchangeable backends implement [`OrderBookStore`]: an
//! in-process ordered map ([`InProcessBook`]) and, behind the `redis-book`
//! feature, a remote ordered-map service ([`redis_book::RedisBook`]).

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Pair, Price, Side, Size};

mod in_process;
pub use in_process::InProcessBook;

#[cfg(feature = "redis-book")]
mod redis_book;
#[cfg(feature = "redis-book")]
pub use redis_book::{RedisBook, RedisBookConfig};

/// One side of one pair's book: price -> size, naturally ordered ascending
/// by `Price`'s `Ord` impl. Iterate `.rev()` for descending (bids).
pub type Side2Levels = BTreeMap<Price, Size>;

/// Both sides of a pair's book, as returned by `get_pair_book`.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub bids: Side2Levels,
    pub asks: Side2Levels,
}

impl Book {
    pub fn side(&self, side: Side) -> &Side2Levels {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Side2Levels {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}

/// Async, atomic, ordered price-level container. All operations are
/// atomic with respect to other operations on the same `(Pair, Side,
/// Price)` key — see §4.1 "Atomicity".
#[async_trait]
pub trait OrderBookStore: Send + Sync {
    async fn get(&self, pair: &Pair, side: Side, price: Price, default: Option<Size>) -> Result<Option<Size>, StoreError>;

    async fn set(&self, pair: &Pair, side: Side, price: Price, size: Size) -> Result<(), StoreError>;

    async fn get_pair_side(&self, pair: &Pair, side: Side) -> Result<Side2Levels, StoreError>;

    async fn get_pair_book(&self, pair: &Pair) -> Result<Book, StoreError>;

    async fn set_pair_book(&self, pair: &Pair, book: Book) -> Result<(), StoreError>;

    async fn delete_pair(&self, pair: &Pair) -> Result<(), StoreError>;

    async fn price_exists(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError>;

    /// Adds `delta` (may be negative). Creates the level with value `delta`
    /// if absent — the caller is responsible for the sign.
    async fn increment(&self, pair: &Pair, side: Side, price: Price, delta: Size) -> Result<(), StoreError>;

    /// Returns `true` iff the level existed and was updated.
    async fn increment_if_exists(&self, pair: &Pair, side: Side, price: Price, delta: Size) -> Result<bool, StoreError>;

    /// If the level exists, adds `size`; else sets it to `|size|`. Returns
    /// whether the level existed prior to this call.
    async fn increment_if_exists_else_set_abs(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<bool, StoreError>;

    /// Subtracts `size`; removes the level if the result is zero. Returns
    /// whether the level was removed.
    async fn decrement_and_remove_if_zero(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<bool, StoreError>;

    async fn remove(&self, pair: &Pair, side: Side, price: Price) -> Result<(), StoreError>;

    async fn remove_if_exists(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError>;

    async fn remove_if_zero_size(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError>;

    async fn sorted_bids_for_pair(&self, pair: &Pair) -> Result<Vec<Price>, StoreError>;

    async fn sorted_asks_for_pair(&self, pair: &Pair) -> Result<Vec<Price>, StoreError>;

    async fn get_pairs(&self) -> Result<Vec<Pair>, StoreError>;

    async fn get_exchange_book(&self) -> Result<Vec<(Pair, Book)>, StoreError>;
}

#[cfg(test)]
mod contract_tests {
    //! Property-style tests exercised against every `OrderBookStore`
    //! implementation, per §8's invariants.
    use super::*;
    use std::str::FromStr;

    pub async fn run_all(store: &dyn OrderBookStore) {
        set_pair_book_roundtrip(store).await;
        increment_if_exists_else_set_abs_on_absent(store).await;
        increment_if_exists_else_set_abs_on_present(store).await;
        decrement_and_remove_if_zero_exact(store).await;
        decimal_normalized_equality(store).await;
        bids_descending_asks_ascending(store).await;
    }

    async fn set_pair_book_roundtrip(store: &dyn OrderBookStore) {
        let pair = Pair::new("contract-roundtrip");
        let mut book = Book::default();
        book.bids.insert(Price::from_str("100").unwrap(), Size::from_str("1").unwrap());
        book.asks.insert(Price::from_str("101").unwrap(), Size::from_str("2").unwrap());
        store.set_pair_book(&pair, book.clone()).await.unwrap();
        let got = store.get_pair_book(&pair).await.unwrap();
        assert_eq!(got.bids, book.bids);
        assert_eq!(got.asks, book.asks);
    }

    async fn increment_if_exists_else_set_abs_on_absent(store: &dyn OrderBookStore) {
        let pair = Pair::new("contract-absent");
        let price = Price::from_str("5").unwrap();
        let existed = store
            .increment_if_exists_else_set_abs(&pair, Side::Bid, price, Size::from_str("-3").unwrap())
            .await
            .unwrap();
        assert!(!existed);
        let v = store.get(&pair, Side::Bid, price, None).await.unwrap();
        assert_eq!(v, Some(Size::from_str("3").unwrap()));
    }

    async fn increment_if_exists_else_set_abs_on_present(store: &dyn OrderBookStore) {
        let pair = Pair::new("contract-present");
        let price = Price::from_str("5").unwrap();
        store.set(&pair, Side::Bid, price, Size::from_str("2").unwrap()).await.unwrap();
        let existed = store
            .increment_if_exists_else_set_abs(&pair, Side::Bid, price, Size::from_str("3").unwrap())
            .await
            .unwrap();
        assert!(existed);
        let v = store.get(&pair, Side::Bid, price, None).await.unwrap();
        assert_eq!(v, Some(Size::from_str("5").unwrap()));
    }

    async fn decrement_and_remove_if_zero_exact(store: &dyn OrderBookStore) {
        let pair = Pair::new("contract-decrement");
        let price = Price::from_str("5").unwrap();
        store.set(&pair, Side::Bid, price, Size::from_str("4").unwrap()).await.unwrap();
        let removed = store
            .decrement_and_remove_if_zero(&pair, Side::Bid, price, Size::from_str("4").unwrap())
            .await
            .unwrap();
        assert!(removed);
        assert!(!store.price_exists(&pair, Side::Bid, price).await.unwrap());
    }

    async fn decimal_normalized_equality(store: &dyn OrderBookStore) {
        let pair = Pair::new("contract-decimal");
        store
            .set(&pair, Side::Bid, Price::from_str("0.10").unwrap(), Size::from_str("1").unwrap())
            .await
            .unwrap();
        let v = store
            .get(&pair, Side::Bid, Price::from_str("0.1").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(v, Some(Size::from_str("1").unwrap()));
    }

    async fn bids_descending_asks_ascending(store: &dyn OrderBookStore) {
        let pair = Pair::new("contract-ordering");
        for p in ["99", "101", "100"] {
            store
                .set(&pair, Side::Bid, Price::from_str(p).unwrap(), Size::from_str("1").unwrap())
                .await
                .unwrap();
            store
                .set(&pair, Side::Ask, Price::from_str(p).unwrap(), Size::from_str("1").unwrap())
                .await
                .unwrap();
        }
        let bids = store.sorted_bids_for_pair(&pair).await.unwrap();
        assert_eq!(
            bids,
            vec![
                Price::from_str("101").unwrap(),
                Price::from_str("100").unwrap(),
                Price::from_str("99").unwrap(),
            ]
        );
        let asks = store.sorted_asks_for_pair(&pair).await.unwrap();
        assert_eq!(
            asks,
            vec![
                Price::from_str("99").unwrap(),
                Price::from_str("100").unwrap(),
                Price::from_str("101").unwrap(),
            ]
        );
    }

}
