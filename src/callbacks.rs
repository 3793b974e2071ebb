//! The sink boundary to user code (§6 "Sinks").
//!
//! Each sink is a type-erased async closure. Feeds invoke only the sinks a
//! caller actually registered; an unregistered channel's events are simply
//! never dispatched.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::store::Book;
use crate::types::{Pair, Price, Side, Size};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `l3_book_update`'s `msg_type` (§6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum L3UpdateKind {
    Open,
    Done,
    Change,
    Trade,
}

impl fmt::Display for L3UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            L3UpdateKind::Open => "open",
            L3UpdateKind::Done => "done",
            L3UpdateKind::Change => "change",
            L3UpdateKind::Trade => "trade",
        };
        write!(f, "{s}")
    }
}

pub type TickerSink = Arc<dyn Fn(&str, &Pair, Price, Price) -> BoxFuture<'static, ()> + Send + Sync>;

/// The NBBO aggregator's sink (§4.5): best cross-venue bid/ask for `pair`,
/// plus which feed currently contributes each side.
pub type NbboSink =
    Arc<dyn Fn(&Pair, Price, Price, &str, &str) -> BoxFuture<'static, ()> + Send + Sync>;

pub type TradesSink = Arc<
    dyn Fn(&str, &Pair, Option<String>, Option<DateTime<Utc>>, Side, Size, Price) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

pub type L2BookSink = Arc<dyn Fn(&str, &Pair, Book) -> BoxFuture<'static, ()> + Send + Sync>;

pub type L3BookSink =
    Arc<dyn Fn(&str, &Pair, Option<DateTime<Utc>>, Option<u64>, Book) -> BoxFuture<'static, ()> + Send + Sync>;

pub type L3BookUpdateSink = Arc<
    dyn Fn(&str, &Pair, L3UpdateKind, Option<DateTime<Utc>>, u64, Side, Price, Size) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

pub type VolumeSink = Arc<dyn Fn(&str, HashMap<String, Decimal>) -> BoxFuture<'static, ()> + Send + Sync>;

/// The sinks a feed has been configured with. Every field is optional:
/// a venue adapter skips dispatch for any channel whose sink is `None`.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub ticker: Option<TickerSink>,
    pub trades: Option<TradesSink>,
    pub l2_book: Option<L2BookSink>,
    pub l3_book: Option<L3BookSink>,
    pub l3_book_update: Option<L3BookUpdateSink>,
    pub volume: Option<VolumeSink>,
}

impl Callbacks {
    /// Rewraps every registered sink behind a bounded queue drained by a
    /// background task, so a slow sink backs up at most `depth` pending
    /// invocations before applying backpressure to the adapter instead of
    /// blocking it outright (§9 "Callback isolation"). Invocations of one
    /// sink are still delivered in the order they were queued; ordering
    /// across *different* sinks (e.g. `ticker` vs `l2_book`) is not
    /// preserved, since each gets its own queue and worker task.
    pub fn queued(self, depth: usize) -> Self {
        Self {
            ticker: self.ticker.map(|sink| queue_ticker(sink, depth)),
            trades: self.trades.map(|sink| queue_trades(sink, depth)),
            l2_book: self.l2_book.map(|sink| queue_l2_book(sink, depth)),
            l3_book: self.l3_book.map(|sink| queue_l3_book(sink, depth)),
            l3_book_update: self.l3_book_update.map(|sink| queue_l3_book_update(sink, depth)),
            volume: self.volume.map(|sink| queue_volume(sink, depth)),
        }
    }
}

/// Spawns the background worker that drains a sink's queue in FIFO order,
/// awaiting each already-produced future to completion before the next.
fn spawn_drain(depth: usize) -> tokio::sync::mpsc::Sender<BoxFuture<'static, ()>> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<BoxFuture<'static, ()>>(depth.max(1));
    tokio::spawn(async move {
        while let Some(fut) = rx.recv().await {
            fut.await;
        }
    });
    tx
}

fn queue_ticker(inner: TickerSink, depth: usize) -> TickerSink {
    let tx = spawn_drain(depth);
    Arc::new(move |feed, pair, bid, ask| {
        let fut = inner(feed, pair, bid, ask);
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(fut).await;
        })
    })
}

fn queue_trades(inner: TradesSink, depth: usize) -> TradesSink {
    let tx = spawn_drain(depth);
    Arc::new(move |feed, pair, id, ts, side, amount, price| {
        let fut = inner(feed, pair, id, ts, side, amount, price);
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(fut).await;
        })
    })
}

fn queue_l2_book(inner: L2BookSink, depth: usize) -> L2BookSink {
    let tx = spawn_drain(depth);
    Arc::new(move |feed, pair, book| {
        let fut = inner(feed, pair, book);
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(fut).await;
        })
    })
}

fn queue_l3_book(inner: L3BookSink, depth: usize) -> L3BookSink {
    let tx = spawn_drain(depth);
    Arc::new(move |feed, pair, ts, sequence, book| {
        let fut = inner(feed, pair, ts, sequence, book);
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(fut).await;
        })
    })
}

fn queue_l3_book_update(inner: L3BookUpdateSink, depth: usize) -> L3BookUpdateSink {
    let tx = spawn_drain(depth);
    Arc::new(move |feed, pair, kind, ts, sequence, side, price, size| {
        let fut = inner(feed, pair, kind, ts, sequence, side, price, size);
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(fut).await;
        })
    })
}

fn queue_volume(inner: VolumeSink, depth: usize) -> VolumeSink {
    let tx = spawn_drain(depth);
    Arc::new(move |feed, volumes| {
        let fut = inner(feed, volumes);
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(fut).await;
        })
    })
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("ticker", &self.ticker.is_some())
            .field("trades", &self.trades.is_some())
            .field("l2_book", &self.l2_book.is_some())
            .field("l3_book", &self.l3_book.is_some())
            .field("l3_book_update", &self.l3_book_update.is_some())
            .field("volume", &self.volume.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn queued_ticker_still_delivers_every_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let ticker: TickerSink = Arc::new(move |_feed, _pair, _bid, _ask| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, Ordering::SeqCst);
            })
        });

        let callbacks = Callbacks { ticker: Some(ticker), ..Callbacks::default() }.queued(4);
        let sink = callbacks.ticker.unwrap();
        let pair = Pair::new("BTC-USD");
        for _ in 0..10 {
            sink("bitmex", &pair, Price::from_str("1").unwrap(), Price::from_str("2").unwrap()).await;
        }

        // The queue is drained by a background task; give it a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
