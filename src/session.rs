//! C3 — session supervisor.
//!
//! Owns one feed's websocket lifecycle: connect, send subscribe frames,
//! forward every inbound text frame to the venue adapter, and watch for
//! staleness. Reconnects with exponential backoff; gives up after
//! `HandlerConfig::retries` consecutive failures, matching the original's
//! `FeedHandler._connect` retry ladder.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;

use crate::adapters::VenueAdapter;
use crate::config::HandlerConfig;
use crate::error::FeedError;

/// The 5-second poll interval the watcher task uses (§4.3).
const WATCH_INTERVAL: Duration = Duration::from_secs(5);
/// A feed with no traffic for this long is considered stalled (§4.3).
const STALENESS_BOUND: Duration = Duration::from_secs(10);
/// Initial reconnect backoff; doubles on each consecutive failure (§4.3).
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Per-feed liveness tracking. Updated on every inbound frame and read by
/// the watcher task to detect a stalled connection.
#[derive(Clone)]
pub struct FeedQos {
    last_seen: Arc<Mutex<Instant>>,
}

impl FeedQos {
    fn new() -> Self {
        Self {
            last_seen: Arc::new(Mutex::new(Instant::now())),
        }
    }

    async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    async fn is_stale(&self) -> bool {
        self.last_seen.lock().await.elapsed() > STALENESS_BOUND
    }
}

/// Drives one feed's connect/subscribe/read loop against `endpoint`,
/// reconnecting with exponential backoff until `adapter` and the
/// connection are both healthy, or until the retry budget is exhausted.
///
/// Runs until the external `shutdown` future resolves or the retry budget
/// is exhausted, whichever comes first.
pub async fn run_feed(
    feed_id: String,
    endpoint: String,
    mut adapter: Box<dyn VenueAdapter>,
    config: HandlerConfig,
    mut shutdown: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<(), FeedError> {
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0usize;

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            result = connect_and_run(&endpoint, adapter.as_mut()) => {
                match result {
                    Ok(()) => {
                        // Clean close (watcher-triggered or peer-initiated):
                        // reconnect immediately, resetting backoff.
                        backoff = INITIAL_BACKOFF;
                        attempt = 0;
                    }
                    Err(err) => {
                        attempt += 1;
                        tracing::warn!(feed = %feed_id, attempt, error = %err, "feed connection failed");
                        if attempt > config.retries {
                            return Err(err);
                        }
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(60));
                    }
                }
            }
        }
    }
}

async fn connect_and_run(endpoint: &str, adapter: &mut dyn VenueAdapter) -> Result<(), FeedError> {
    let (mut ws_stream, _) = tokio_tungstenite::connect_async(endpoint)
        .await
        .map_err(|e| FeedError::ConnectionLost(e.to_string()))?;

    for frame in adapter.subscribe_frames()? {
        ws_stream
            .send(tungstenite::Message::Text(frame))
            .await
            .map_err(|e| FeedError::ConnectionLost(e.to_string()))?;
    }

    let qos = FeedQos::new();
    let watcher_qos = qos.clone();
    let (stale_tx, mut stale_rx) = tokio::sync::oneshot::channel::<()>();
    let watcher = tokio::spawn(async move {
        let mut tx = Some(stale_tx);
        loop {
            tokio::time::sleep(WATCH_INTERVAL).await;
            if watcher_qos.is_stale().await {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
                return;
            }
        }
    });

    let result = loop {
        tokio::select! {
            _ = &mut stale_rx => {
                break Err(FeedError::ConnectionLost(format!("no frames for over {}s", STALENESS_BOUND.as_secs())));
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        qos.touch().await;
                        if let Err(err) = adapter.handle_message(&text).await {
                            match &err {
                                FeedError::ProtocolMalformed(_)
                                | FeedError::UnknownChannel(_)
                                | FeedError::UnsupportedChannel(_) => {
                                    tracing::warn!(error = %err, "dropping malformed frame");
                                }
                                FeedError::InvariantViolation(_) => {
                                    tracing::error!(error = %err, "invariant violation, dropping frame");
                                }
                                _ => break Err(err),
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(payload))) => {
                        qos.touch().await;
                        ws_stream.send(tungstenite::Message::Pong(payload)).await.ok();
                    }
                    Some(Ok(tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_) | tungstenite::Message::Binary(_))) => {
                        qos.touch().await;
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(FeedError::ConnectionLost(e.to_string())),
                }
            }
        }
    };

    watcher.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_feed_is_detected() {
        let qos = FeedQos::new();
        assert!(!qos.is_stale().await);
        *qos.last_seen.lock().await = Instant::now() - Duration::from_secs(11);
        assert!(qos.is_stale().await);
    }
}
