//! C6 — normalized pair symbol mapping.
//!
//! A static bidirectional table per venue, e.g. bitmex's `XBTUSD` <->
//! canonical `BTC-USD`. Exhaustive symbol coverage is out of scope (§1);
//! this holds a representative table per venue plus the identity fallback
//! every adapter uses for symbols it doesn't know about.

use std::collections::HashMap;

use crate::types::Pair;

/// Bidirectional exchange-symbol <-> canonical-pair table.
pub struct PairMap {
    to_canonical: HashMap<&'static str, &'static str>,
    to_exchange: HashMap<&'static str, &'static str>,
}

impl PairMap {
    pub fn new(entries: &[(&'static str, &'static str)]) -> Self {
        let mut to_canonical = HashMap::new();
        let mut to_exchange = HashMap::new();
        for (exchange_symbol, canonical) in entries {
            to_canonical.insert(*exchange_symbol, *canonical);
            to_exchange.insert(*canonical, *exchange_symbol);
        }
        Self { to_canonical, to_exchange }
    }

    /// Maps an exchange-native symbol to the canonical pair, falling back to
    /// the symbol itself when it isn't in the table.
    pub fn to_canonical(&self, exchange_symbol: &str) -> Pair {
        Pair::new(self.to_canonical.get(exchange_symbol).copied().unwrap_or(exchange_symbol))
    }

    /// Maps a canonical pair back to its exchange-native symbol, falling
    /// back to the canonical form itself when it isn't in the table.
    pub fn to_exchange(&self, pair: &Pair) -> String {
        self.to_exchange
            .get(pair.as_str())
            .copied()
            .unwrap_or_else(|| pair.as_str())
            .to_string()
    }
}

/// bitmex normalizes `XBT` (its native BTC ticker) to the canonical `BTC`.
pub fn bitmex_pairs() -> PairMap {
    PairMap::new(&[("XBTUSD", "BTC-USD"), ("ETHUSD", "ETH-USD")])
}

/// bitfinex pairs are unslashed/uppercased on the wire (`tBTCUSD`-free here —
/// the public `book`/`ticker`/`trades` channels use bare `BTCUSD`).
pub fn bitfinex_pairs() -> PairMap {
    PairMap::new(&[("BTCUSD", "BTC-USD"), ("ETHUSD", "ETH-USD"), ("BTCUST", "BTC-USDT")])
}

/// gdax/coinbase already uses the canonical dash form natively.
pub fn coinbase_pairs() -> PairMap {
    PairMap::new(&[("BTC-USD", "BTC-USD"), ("ETH-USD", "ETH-USD")])
}

/// gemini pairs are a bare concatenation, e.g. `btcusd`.
pub fn gemini_pairs() -> PairMap {
    PairMap::new(&[("btcusd", "BTC-USD"), ("ethusd", "ETH-USD")])
}

/// poloniex pairs are `QUOTE_BASE`.
pub fn poloniex_pairs() -> PairMap {
    PairMap::new(&[("USDT_BTC", "BTC-USDT"), ("BTC_ETH", "ETH-BTC")])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_pair() {
        let map = bitmex_pairs();
        let canonical = map.to_canonical("XBTUSD");
        assert_eq!(canonical.as_str(), "BTC-USD");
        assert_eq!(map.to_exchange(&canonical), "XBTUSD");
    }

    #[test]
    fn unknown_symbol_falls_back_to_identity() {
        let map = bitmex_pairs();
        let canonical = map.to_canonical("SOMENEWPAIR");
        assert_eq!(canonical.as_str(), "SOMENEWPAIR");
    }
}
