//! In-process backend: one `Book` per pair, each guarded by its own mutex so
//! that compound operations are atomic without serializing unrelated pairs
//! (§4.1 "In-process" backend variant).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::types::{Pair, Price, Side, Size};

use super::{Book, OrderBookStore, Side2Levels};

#[derive(Default)]
pub struct InProcessBook {
    pairs: RwLock<HashMap<Pair, Arc<Mutex<Book>>>>,
}

impl InProcessBook {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pair_lock(&self, pair: &Pair) -> Arc<Mutex<Book>> {
        if let Some(lock) = self.pairs.read().await.get(pair) {
            return lock.clone();
        }
        let mut pairs = self.pairs.write().await;
        pairs
            .entry(pair.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Book::default())))
            .clone()
    }
}

#[async_trait]
impl OrderBookStore for InProcessBook {
    async fn get(&self, pair: &Pair, side: Side, price: Price, default: Option<Size>) -> Result<Option<Size>, StoreError> {
        let lock = self.pair_lock(pair).await;
        let book = lock.lock().await;
        Ok(book.side(side).get(&price).copied().or(default))
    }

    async fn set(&self, pair: &Pair, side: Side, price: Price, size: Size) -> Result<(), StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        book.side_mut(side).insert(price, size);
        Ok(())
    }

    async fn get_pair_side(&self, pair: &Pair, side: Side) -> Result<Side2Levels, StoreError> {
        let lock = self.pair_lock(pair).await;
        let book = lock.lock().await;
        Ok(book.side(side).clone())
    }

    async fn get_pair_book(&self, pair: &Pair) -> Result<Book, StoreError> {
        let lock = self.pair_lock(pair).await;
        let book = lock.lock().await;
        Ok(book.clone())
    }

    async fn set_pair_book(&self, pair: &Pair, book: Book) -> Result<(), StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut current = lock.lock().await;
        *current = book;
        Ok(())
    }

    async fn delete_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        *book = Book::default();
        Ok(())
    }

    async fn price_exists(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError> {
        let lock = self.pair_lock(pair).await;
        let book = lock.lock().await;
        Ok(book.side(side).contains_key(&price))
    }

    async fn increment(&self, pair: &Pair, side: Side, price: Price, delta: Size) -> Result<(), StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        let levels = book.side_mut(side);
        let entry = levels.entry(price).or_insert(Size::zero());
        *entry = *entry + delta;
        Ok(())
    }

    async fn increment_if_exists(&self, pair: &Pair, side: Side, price: Price, delta: Size) -> Result<bool, StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        let levels = book.side_mut(side);
        match levels.get_mut(&price) {
            Some(size) => {
                *size = *size + delta;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_if_exists_else_set_abs(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<bool, StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        let levels = book.side_mut(side);
        match levels.get_mut(&price) {
            Some(existing) => {
                *existing = *existing + size;
                Ok(true)
            }
            None => {
                levels.insert(price, size.abs());
                Ok(false)
            }
        }
    }

    async fn decrement_and_remove_if_zero(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<bool, StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        let levels = book.side_mut(side);
        let remaining = match levels.get(&price) {
            Some(existing) => *existing - size,
            None => return Err(StoreError::NotFound { pair: pair.clone(), side, price }),
        };
        if remaining.is_zero() {
            levels.remove(&price);
            Ok(true)
        } else {
            levels.insert(price, remaining);
            Ok(false)
        }
    }

    async fn remove(&self, pair: &Pair, side: Side, price: Price) -> Result<(), StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        book.side_mut(side)
            .remove(&price)
            .map(|_| ())
            .ok_or(StoreError::NotFound { pair: pair.clone(), side, price })
    }

    async fn remove_if_exists(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        Ok(book.side_mut(side).remove(&price).is_some())
    }

    async fn remove_if_zero_size(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError> {
        let lock = self.pair_lock(pair).await;
        let mut book = lock.lock().await;
        let levels = book.side_mut(side);
        if levels.get(&price).map(Size::is_zero).unwrap_or(false) {
            levels.remove(&price);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn sorted_bids_for_pair(&self, pair: &Pair) -> Result<Vec<Price>, StoreError> {
        let lock = self.pair_lock(pair).await;
        let book = lock.lock().await;
        Ok(book.bids.keys().rev().copied().collect())
    }

    async fn sorted_asks_for_pair(&self, pair: &Pair) -> Result<Vec<Price>, StoreError> {
        let lock = self.pair_lock(pair).await;
        let book = lock.lock().await;
        Ok(book.asks.keys().copied().collect())
    }

    async fn get_pairs(&self) -> Result<Vec<Pair>, StoreError> {
        Ok(self.pairs.read().await.keys().cloned().collect())
    }

    async fn get_exchange_book(&self) -> Result<Vec<(Pair, Book)>, StoreError> {
        let pairs: Vec<Pair> = self.pairs.read().await.keys().cloned().collect();
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let book = self.get_pair_book(&pair).await?;
            out.push((pair, book));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    //! Concurrency invariants, §8 "Concurrency".
    use std::str::FromStr;
    use std::sync::Arc;

    use super::*;
    use crate::store::contract_tests;

    #[tokio::test]
    async fn satisfies_shared_contract() {
        let store = InProcessBook::new();
        contract_tests::run_all(&store).await;
    }

    #[tokio::test]
    async fn concurrent_increments_sum_exactly() {
        let store = Arc::new(InProcessBook::new());
        let pair = Pair::new("concurrent-increment");
        let price = Price::from_str("100").unwrap();
        store.set(&pair, Side::Bid, price, Size::zero()).await.unwrap();

        const N: usize = 50;
        let mut tasks = Vec::with_capacity(N);
        for _ in 0..N {
            let store = store.clone();
            let pair = pair.clone();
            tasks.push(tokio::spawn(async move {
                store.increment(&pair, Side::Bid, price, Size::from_str("1").unwrap()).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let v = store.get(&pair, Side::Bid, price, None).await.unwrap().unwrap();
        assert_eq!(v, Size::from_str(&N.to_string()).unwrap());
    }

    #[tokio::test]
    async fn concurrent_decrement_removes_exactly_once() {
        let store = Arc::new(InProcessBook::new());
        let pair = Pair::new("concurrent-decrement");
        let price = Price::from_str("100").unwrap();
        const N: usize = 10;
        store.set(&pair, Side::Bid, price, Size::from_str(&N.to_string()).unwrap()).await.unwrap();

        let mut tasks = Vec::with_capacity(N);
        for _ in 0..N {
            let store = store.clone();
            let pair = pair.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .decrement_and_remove_if_zero(&pair, Side::Bid, price, Size::from_str("1").unwrap())
                    .await
                    .unwrap()
            }));
        }
        let mut removed_count = 0;
        for t in tasks {
            if t.await.unwrap() {
                removed_count += 1;
            }
        }

        assert_eq!(removed_count, 1);
        assert!(!store.price_exists(&pair, Side::Bid, price).await.unwrap());
    }

    #[tokio::test]
    async fn set_pair_book_is_atomic_replace() {
        let store = InProcessBook::new();
        let pair = Pair::new("replace");
        store.set(&pair, Side::Bid, Price::from_str("1").unwrap(), Size::from_str("1").unwrap()).await.unwrap();

        let mut next = Book::default();
        next.bids.insert(Price::from_str("2").unwrap(), Size::from_str("2").unwrap());
        store.set_pair_book(&pair, next).await.unwrap();

        let book = store.get_pair_book(&pair).await.unwrap();
        assert!(!book.bids.contains_key(&Price::from_str("1").unwrap()));
        assert_eq!(book.bids.get(&Price::from_str("2").unwrap()), Some(&Size::from_str("2").unwrap()));
    }
}
