//! Remote ordered-map backend (`redis-book` feature).
//!
//! Key layout, per §4.1/§6:
//!   `{exchange}:{pair}:{side}`         -> hash of canonical-decimal-string -> scaled-size-string
//!   `{exchange}:{pair}:{side}:prices`  -> sorted set, member = canonical decimal string,
//!                                         score = price as f64 (the one permitted binary float,
//!                                         used for ordering only, within SCALE's precision bound)
//!
//! Compound ops are single Lua scripts so the read-modify-write is one
//! atomic step server-side, per §4.1 "Atomicity". To avoid Lua's lack of an
//! arbitrary-precision numeric type, sizes are scaled to fixed-point
//! integers (`SCALE` = 1e8, i.e. 8 decimal places) before crossing into the
//! script; Lua's doubles represent integers up to 2^53 exactly, so the
//! add/subtract the scripts perform is exact integer arithmetic, not
//! lossy float arithmetic, within that precision bound.

use std::str::FromStr;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script};
use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::types::{Pair, Price, Side, Size};

use super::{Book, OrderBookStore, Side2Levels};

const SCALE: i64 = 100_000_000;

fn scale_size(size: Size) -> i64 {
    (size.0 * Decimal::from(SCALE))
        .round()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn unscale_size(raw: i64) -> Size {
    Size(Decimal::from(raw) / Decimal::from(SCALE))
}

fn price_member(price: Price) -> String {
    price.0.normalize().to_string()
}

fn price_score(price: Price) -> Result<f64, StoreError> {
    price
        .0
        .to_string()
        .parse::<f64>()
        .map_err(|e| StoreError::Backend(format!("price {price} does not fit a double: {e}")))
}

#[derive(Clone, Debug)]
pub struct RedisBookConfig {
    pub url: String,
    pub exchange: String,
}

pub struct RedisBook {
    exchange: String,
    client: Client,
    incr: Script,
    incr_if_exists: Script,
    incr_if_exists_else_set_abs: Script,
    decr_and_remove_if_zero: Script,
    delete_if_zero_size: Script,
}

impl RedisBook {
    pub fn connect(config: RedisBookConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Backend(format!("failed to open redis client: {e}")))?;
        Ok(Self {
            exchange: config.exchange,
            client,
            incr: Script::new(INCR),
            incr_if_exists: Script::new(INCR_IF_EXISTS),
            incr_if_exists_else_set_abs: Script::new(INCR_IF_EXISTS_ELSE_SET_ABS),
            decr_and_remove_if_zero: Script::new(DECR_AND_REMOVE_IF_ZERO),
            delete_if_zero_size: Script::new(DELETE_IF_ZERO_SIZE),
        })
    }

    fn hash_key(&self, pair: &Pair, side: Side) -> String {
        format!("{}:{}:{}", self.exchange, pair, side)
    }

    fn prices_key(&self, pair: &Pair, side: Side) -> String {
        format!("{}:{}:{}:prices", self.exchange, pair, side)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

// get_pair_book: HGETALL both hashes, decode into Book.
const INCR: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
local new_val
if existing == false then
    new_val = tonumber(ARGV[2])
    redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
else
    new_val = tonumber(existing) + tonumber(ARGV[2])
end
redis.call('HSET', KEYS[1], ARGV[1], new_val)
return new_val
"#;

const INCR_IF_EXISTS: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing == false then
    return 0
end
local new_val = tonumber(existing) + tonumber(ARGV[2])
redis.call('HSET', KEYS[1], ARGV[1], new_val)
return 1
"#;

const INCR_IF_EXISTS_ELSE_SET_ABS: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing == false then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
    redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
    return 0
else
    local new_val = tonumber(existing) + tonumber(ARGV[2])
    redis.call('HSET', KEYS[1], ARGV[1], new_val)
    return 1
end
"#;

const DECR_AND_REMOVE_IF_ZERO: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing == false then
    return -1
end
local new_val = tonumber(existing) - tonumber(ARGV[2])
if new_val == 0 then
    redis.call('HDEL', KEYS[1], ARGV[1])
    redis.call('ZREM', KEYS[2], ARGV[1])
    return 1
else
    redis.call('HSET', KEYS[1], ARGV[1], new_val)
    return 0
end
"#;

const DELETE_IF_ZERO_SIZE: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing == '0' then
    redis.call('HDEL', KEYS[1], ARGV[1])
    redis.call('ZREM', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

#[async_trait]
impl OrderBookStore for RedisBook {
    async fn get(&self, pair: &Pair, side: Side, price: Price, default: Option<Size>) -> Result<Option<Size>, StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let raw: Option<String> = conn
            .hget(self.hash_key(pair, side), &member)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        match raw {
            Some(s) => {
                let scaled: i64 = s.parse().map_err(|e| StoreError::Backend(format!("{e}")))?;
                Ok(Some(unscale_size(scaled)))
            }
            None => Ok(default),
        }
    }

    async fn set(&self, pair: &Pair, side: Side, price: Price, size: Size) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let score = price_score(price)?;
        let scaled = scale_size(size);
        let _: () = redis::pipe()
            .hset(self.hash_key(pair, side), &member, scaled)
            .zadd(self.prices_key(pair, side), &member, score)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_pair_side(&self, pair: &Pair, side: Side) -> Result<Side2Levels, StoreError> {
        let mut conn = self.conn().await?;
        let raw: Vec<(String, i64)> = conn
            .hgetall(self.hash_key(pair, side))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut levels = Side2Levels::new();
        for (price_str, scaled) in raw {
            let price = Price(Decimal::from_str(&price_str).map_err(|e| StoreError::Backend(e.to_string()))?);
            levels.insert(price, unscale_size(scaled));
        }
        Ok(levels)
    }

    async fn get_pair_book(&self, pair: &Pair) -> Result<Book, StoreError> {
        Ok(Book {
            bids: self.get_pair_side(pair, Side::Bid).await?,
            asks: self.get_pair_side(pair, Side::Ask).await?,
        })
    }

    async fn set_pair_book(&self, pair: &Pair, book: Book) -> Result<(), StoreError> {
        self.delete_pair(pair).await?;
        for (price, size) in &book.bids {
            self.set(pair, Side::Bid, *price, *size).await?;
        }
        for (price, size) in &book.asks {
            self.set(pair, Side::Ask, *price, *size).await?;
        }
        Ok(())
    }

    async fn delete_pair(&self, pair: &Pair) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .del((
                self.hash_key(pair, Side::Bid),
                self.prices_key(pair, Side::Bid),
                self.hash_key(pair, Side::Ask),
                self.prices_key(pair, Side::Ask),
            ))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn price_exists(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        conn.hexists(self.hash_key(pair, side), price_member(price))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn increment(&self, pair: &Pair, side: Side, price: Price, delta: Size) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let score = price_score(price)?;
        let scaled = scale_size(delta);
        let _: i64 = self
            .incr
            .key(self.hash_key(pair, side))
            .key(self.prices_key(pair, side))
            .arg(&member)
            .arg(scaled)
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn increment_if_exists(&self, pair: &Pair, side: Side, price: Price, delta: Size) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let scaled = scale_size(delta);
        let result: i64 = self
            .incr_if_exists
            .key(self.hash_key(pair, side))
            .arg(member)
            .arg(scaled)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn increment_if_exists_else_set_abs(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let score = price_score(price)?;
        let scaled = scale_size(size);
        let scaled_abs = scale_size(size.abs());
        let result: i64 = self
            .incr_if_exists_else_set_abs
            .key(self.hash_key(pair, side))
            .key(self.prices_key(pair, side))
            .arg(&member)
            .arg(scaled)
            .arg(scaled_abs)
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn decrement_and_remove_if_zero(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        size: Size,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let scaled = scale_size(size);
        let result: i64 = self
            .decr_and_remove_if_zero
            .key(self.hash_key(pair, side))
            .key(self.prices_key(pair, side))
            .arg(&member)
            .arg(scaled)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if result < 0 {
            return Err(StoreError::NotFound { pair: pair.clone(), side, price });
        }
        Ok(result == 1)
    }

    async fn remove(&self, pair: &Pair, side: Side, price: Price) -> Result<(), StoreError> {
        if self.remove_if_exists(pair, side, price).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound { pair: pair.clone(), side, price })
        }
    }

    async fn remove_if_exists(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let removed: i64 = redis::pipe()
            .hdel(self.hash_key(pair, side), &member)
            .zrem(self.prices_key(pair, side), &member)
            .query_async::<Vec<i64>>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .first()
            .copied()
            .unwrap_or(0);
        Ok(removed > 0)
    }

    async fn remove_if_zero_size(&self, pair: &Pair, side: Side, price: Price) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let member = price_member(price);
        let result: i64 = self
            .delete_if_zero_size
            .key(self.hash_key(pair, side))
            .key(self.prices_key(pair, side))
            .arg(&member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result == 1)
    }

    async fn sorted_bids_for_pair(&self, pair: &Pair) -> Result<Vec<Price>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrevrange(self.prices_key(pair, Side::Bid), 0, -1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        members
            .into_iter()
            .map(|s| Decimal::from_str(&s).map(Price).map_err(|e| StoreError::Backend(e.to_string())))
            .collect()
    }

    async fn sorted_asks_for_pair(&self, pair: &Pair) -> Result<Vec<Price>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .zrange(self.prices_key(pair, Side::Ask), 0, -1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        members
            .into_iter()
            .map(|s| Decimal::from_str(&s).map(Price).map_err(|e| StoreError::Backend(e.to_string())))
            .collect()
    }

    async fn get_pairs(&self) -> Result<Vec<Pair>, StoreError> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}:*:bid", self.exchange);
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut pairs: Vec<Pair> = keys
            .into_iter()
            .filter_map(|k| k.split(':').nth(1).map(Pair::new))
            .collect();
        pairs.sort();
        pairs.dedup();
        Ok(pairs)
    }

    async fn get_exchange_book(&self) -> Result<Vec<(Pair, Book)>, StoreError> {
        let pairs = self.get_pairs().await?;
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let book = self.get_pair_book(&pair).await?;
            out.push((pair, book));
        }
        Ok(out)
    }
}
