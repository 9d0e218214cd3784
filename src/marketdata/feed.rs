//! WebSocket top-of-book feed adapter.
//!
//! Sole writer of the `TobCache`. Maintains one connection to the market
//! data endpoint, subscribes to tokens on demand, and reconnects with
//! exponential backoff. Strategies call `ensure_subscribed` for tokens they
//! care about; the write loop flushes pending subscriptions each pass.

use anyhow::Result;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::TobCache;
use crate::models::TopOfBook;

#[derive(Debug, Clone)]
pub struct TobFeedConfig {
    pub ws_url: String,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for TobFeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://md.example.com/ws/tob".to_string(),
            reconnect_base_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Incoming top-of-book frame.
#[derive(Debug, Deserialize)]
struct TobFrame {
    token_id: String,
    bid: f64,
    ask: f64,
    bid_size: f64,
    ask_size: f64,
}

pub struct TobFeed {
    config: TobFeedConfig,
    cache: Arc<TobCache>,
    subscribed: Mutex<HashSet<String>>,
    pending: Mutex<Vec<String>>,
    connected: AtomicBool,
}

impl TobFeed {
    pub fn new(config: TobFeedConfig, cache: Arc<TobCache>) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache,
            subscribed: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Request a subscription for a token. Idempotent; the connection loop
    /// flushes new tokens on its next pass (and on reconnect).
    pub fn ensure_subscribed(&self, token_id: &str) {
        let mut subscribed = self.subscribed.lock();
        if subscribed.insert(token_id.to_string()) {
            self.pending.lock().push(token_id.to_string());
        }
    }

    /// Run the connection loop until the stop token flips.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut delay = self.config.reconnect_base_delay;
        loop {
            if *stop.borrow() {
                break;
            }
            match self.connect_once(&mut stop).await {
                Ok(()) => {
                    // Clean shutdown.
                    break;
                }
                Err(e) => {
                    self.connected.store(false, Ordering::Relaxed);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "feed disconnected, reconnecting");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = stop.changed() => break,
                    }
                    delay = (delay * 2).min(self.config.reconnect_max_delay);
                }
            }
        }
        info!("top-of-book feed stopped");
    }

    async fn connect_once(&self, stop: &mut watch::Receiver<bool>) -> Result<()> {
        let (stream, _) = connect_async(self.config.ws_url.as_str()).await?;
        let (mut write, mut read) = stream.split();
        self.connected.store(true, Ordering::Relaxed);
        info!(url = %self.config.ws_url, "top-of-book feed connected");

        // Fresh connection: resubscribe everything we ever asked for.
        {
            let all: Vec<String> = self.subscribed.lock().iter().cloned().collect();
            self.pending.lock().clear();
            if !all.is_empty() {
                let msg = serde_json::json!({ "op": "subscribe", "token_ids": all });
                write.send(Message::Text(msg.to_string())).await?;
            }
        }

        let mut flush = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = flush.tick() => {
                    let new_tokens: Vec<String> = std::mem::take(&mut *self.pending.lock());
                    if !new_tokens.is_empty() {
                        debug!(count = new_tokens.len(), "subscribing new tokens");
                        let msg = serde_json::json!({ "op": "subscribe", "token_ids": new_tokens });
                        write.send(Message::Text(msg.to_string())).await?;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            anyhow::bail!("feed closed by remote");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<TobFrame>(text) {
            Ok(frame) => {
                self.cache.apply(TopOfBook {
                    token_id: frame.token_id,
                    bid: frame.bid,
                    ask: frame.ask,
                    bid_size: frame.bid_size,
                    ask_size: frame.ask_size,
                    updated_at: Utc::now(),
                });
            }
            Err(e) => debug!(error = %e, "ignoring unparseable feed frame"),
        }
    }
}
