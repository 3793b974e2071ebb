//! C4 — feed handler.
//!
//! The caller-facing entry point: register feeds and an optional NBBO
//! aggregator, then `run()` everything concurrently until cancelled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::adapters::VenueAdapter;
use crate::config::HandlerConfig;
use crate::error::FeedError;
use crate::nbbo::Nbbo;
use crate::session;

struct RegisteredFeed {
    id: String,
    endpoint: String,
    adapter: Box<dyn VenueAdapter>,
}

/// Owns every registered feed and runs them concurrently (§4.4).
pub struct FeedHandler {
    config: HandlerConfig,
    feeds: Vec<RegisteredFeed>,
    nbbo: Option<Arc<Nbbo>>,
    shutdown: Arc<Notify>,
}

impl FeedHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            config,
            feeds: Vec::new(),
            nbbo: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Registers a feed's adapter and websocket endpoint. Takes effect on
    /// the next `run()`.
    pub fn add_feed(&mut self, id: impl Into<String>, endpoint: impl Into<String>, adapter: Box<dyn VenueAdapter>) {
        self.feeds.push(RegisteredFeed {
            id: id.into(),
            endpoint: endpoint.into(),
            adapter,
        });
    }

    /// Installs the NBBO aggregator (§4.5). Feeds must route their
    /// `ticker` sink through [`Nbbo::on_quote`] themselves to participate.
    pub fn add_nbbo(&mut self, nbbo: Arc<Nbbo>) {
        self.nbbo = Some(nbbo);
    }

    /// Signals every running feed to shut down cleanly; `run()` returns
    /// once all feeds have exited.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Runs every registered feed concurrently until each exhausts its
    /// retry budget, the caller calls [`FeedHandler::shutdown`], or
    /// `ctrl_c` is delivered to the process (§5 "Cancellation").
    pub async fn run(mut self) -> Result<(), FeedError> {
        let mut set = JoinSet::new();
        for feed in self.feeds.drain(..) {
            let config = self.config;
            let shutdown = self.shutdown.clone();
            set.spawn(async move {
                let wait: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
                    shutdown.notified().await;
                });
                session::run_feed(feed.id, feed.endpoint, feed.adapter, config, wait).await
            });
        }

        let mut drain_fut = Box::pin(drain(&mut set));
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                self.shutdown.notify_waiters();
            }
            first_err = &mut drain_fut => {
                return match first_err {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
        }

        match drain_fut.await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn drain(set: &mut JoinSet<Result<(), FeedError>>) -> Option<FeedError> {
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Err(err)) if first_err.is_none() => first_err = Some(err),
            Ok(_) => {}
            Err(join_err) => {
                tracing::error!(error = %join_err, "feed task panicked");
            }
        }
    }
    first_err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Channel;
    use crate::store::InProcessBook;
    use crate::types::Pair;

    #[tokio::test]
    async fn run_with_no_feeds_returns_immediately() {
        let handler = FeedHandler::new(HandlerConfig::default());
        handler.shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handler.run()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn add_feed_registers_without_connecting() {
        let mut handler = FeedHandler::new(HandlerConfig::default());
        let adapter = crate::adapters::bitmex::Bitmex::new(
            Arc::new(InProcessBook::new()),
            vec![Pair::new("BTC-USD")],
            vec![Channel::L2Book],
            crate::callbacks::Callbacks::default(),
        );
        handler.add_feed("bitmex-1", "wss://www.bitmex.com/realtime", Box::new(adapter));
        assert_eq!(handler.feeds.len(), 1);
    }
}
