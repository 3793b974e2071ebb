use std::sync::Arc;

use feedhandler::adapters::bitmex::Bitmex;
use feedhandler::store::InProcessBook;
use feedhandler::{Callbacks, Channel, FeedConfig, FeedHandler, HandlerConfig, Pair};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let l2_book = Arc::new(move |feed: &str, pair: &Pair, book: feedhandler::Book| {
        let feed = feed.to_string();
        let pair = pair.clone();
        Box::pin(async move {
            let best_bid = book.bids.keys().next_back();
            let best_ask = book.asks.keys().next();
            tracing::info!(%feed, %pair, ?best_bid, ?best_ask, "book updated");
        }) as feedhandler::callbacks::BoxFuture<'static, ()>
    });

    // queue_depth decouples a slow l2_book sink from the websocket read
    // loop: up to 64 book updates may be pending before this adapter's
    // frame processing starts applying backpressure.
    let feed_config = FeedConfig {
        pairs: vec![Pair::new("BTC-USD")],
        channels: vec![Channel::L2Book],
        callbacks: Callbacks {
            l2_book: Some(l2_book),
            ..Callbacks::default()
        },
        queue_depth: Some(64),
        ..FeedConfig::default()
    };

    let store = Arc::new(InProcessBook::new());
    let adapter = Bitmex::new(store, feed_config.pairs.clone(), feed_config.channels.clone(), feed_config.resolved_callbacks());

    let mut handler = FeedHandler::new(HandlerConfig::default());
    handler.add_feed("bitmex", "wss://www.bitmex.com/realtime", Box::new(adapter));

    handler.run().await?;
    Ok(())
}
