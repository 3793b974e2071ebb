//! C5 — NBBO aggregator.
//!
//! Tracks each feed's last-seen (bid, ask) per pair and recomputes the
//! cross-feed best bid/offer on every update, invoking the sink only when
//! the aggregate actually changes (§8 scenario 6).

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::callbacks::NbboSink;
use crate::types::{Pair, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quote {
    bid: Price,
    ask: Price,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Best {
    bid: Price,
    ask: Price,
    bid_feed: String,
    ask_feed: String,
}

#[derive(Default)]
struct PairState {
    per_feed: HashMap<String, Quote>,
    best: Option<Best>,
}

/// Cross-feed best-bid/best-offer tracker. One instance serves every pair
/// registered with it; feeds call [`Nbbo::on_quote`] from their own
/// `ticker` sink.
pub struct Nbbo {
    sink: NbboSink,
    state: Mutex<HashMap<Pair, PairState>>,
}

impl Nbbo {
    pub fn new(sink: NbboSink) -> Self {
        Self {
            sink,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Feeds `ticker` bid/ask for `feed_id`/`pair`; invokes the NBBO sink
    /// iff the running best bid or best ask changed as a result.
    pub async fn on_quote(&self, feed_id: &str, pair: &Pair, bid: Price, ask: Price) {
        let mut state = self.state.lock().await;
        let pair_state = state.entry(pair.clone()).or_default();
        pair_state.per_feed.insert(feed_id.to_string(), Quote { bid, ask });

        let mut best_bid: Option<(Price, String)> = None;
        let mut best_ask: Option<(Price, String)> = None;
        for (feed, quote) in &pair_state.per_feed {
            best_bid = Some(match best_bid.take() {
                Some((p, f)) if p >= quote.bid => (p, f),
                _ => (quote.bid, feed.clone()),
            });
            best_ask = Some(match best_ask.take() {
                Some((p, f)) if p <= quote.ask => (p, f),
                _ => (quote.ask, feed.clone()),
            });
        }
        let (Some((bid, bid_feed)), Some((ask, ask_feed))) = (best_bid, best_ask) else { return };
        let candidate = Best { bid, ask, bid_feed: bid_feed.clone(), ask_feed: ask_feed.clone() };

        if pair_state.best != Some(candidate.clone()) {
            pair_state.best = Some(candidate);
            drop(state);
            (self.sink)(pair, bid, ask, &bid_feed, &ask_feed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::BoxFuture;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_sink() -> (NbboSink, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let sink: NbboSink = Arc::new(move |_pair, _bid, _ask, _bid_feed, _ask_feed| {
            let counted = counted.clone();
            let fut: BoxFuture<'static, ()> = Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            });
            fut
        });
        (sink, calls)
    }

    #[tokio::test]
    async fn best_bid_is_max_across_feeds() {
        let (sink, calls) = counting_sink();
        let nbbo = Nbbo::new(sink);
        let pair = Pair::new("BTC-USD");

        nbbo.on_quote("feed-a", &pair, Price::from_str("100").unwrap(), Price::from_str("101").unwrap()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        nbbo.on_quote("feed-b", &pair, Price::from_str("100.5").unwrap(), Price::from_str("101.2").unwrap()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let state = nbbo.state.lock().await;
        let best = state.get(&pair).unwrap().best.clone().unwrap();
        assert_eq!(best.bid, Price::from_str("100.5").unwrap());
        assert_eq!(best.ask, Price::from_str("101").unwrap());
        assert_eq!(best.bid_feed, "feed-b");
        assert_eq!(best.ask_feed, "feed-a");
    }

    #[tokio::test]
    async fn unchanged_aggregate_does_not_invoke_sink() {
        let (sink, calls) = counting_sink();
        let nbbo = Nbbo::new(sink);
        let pair = Pair::new("BTC-USD");

        nbbo.on_quote("feed-a", &pair, Price::from_str("100").unwrap(), Price::from_str("101").unwrap()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        nbbo.on_quote("feed-a", &pair, Price::from_str("100").unwrap(), Price::from_str("101").unwrap()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
