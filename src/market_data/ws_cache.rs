//! Polymarket CLOB WebSocket (market channel) book cache.
//!
//! Grounded on this codebase's `PolymarketMarketWsCache`: single connection,
//! on-demand subscribe, reconnect with doubling backoff, 5s PING frames.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::rest::{RawBook, RawLevel};

const MARKET_WSS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

#[derive(Debug)]
enum WsCommand {
    Subscribe(String),
}

#[derive(Clone)]
pub struct WsBookCache {
    cmd_tx: mpsc::Sender<WsCommand>,
    books: Arc<RwLock<HashMap<String, CachedBook>>>,
}

#[derive(Clone)]
struct CachedBook {
    book: Arc<RawBook>,
    updated_at_ms: i64,
}

#[derive(Debug, Deserialize)]
struct WsBookMsg {
    pub event_type: String,
    #[serde(rename = "asset_id")]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl WsBookCache {
    pub fn spawn() -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(1024);
        let cache = Arc::new(Self { cmd_tx, books: Arc::new(RwLock::new(HashMap::with_capacity(256))) });

        let worker_cache = cache.clone();
        tokio::spawn(async move {
            if let Err(e) = worker_cache.run(cmd_rx).await {
                warn!(error = %e, "WS book cache worker exited");
            }
        });

        cache
    }

    pub fn request_subscribe(&self, token_id: &str) {
        if token_id.trim().is_empty() {
            return;
        }
        let _ = self.cmd_tx.try_send(WsCommand::Subscribe(token_id.trim().to_string()));
    }

    pub fn get_book(&self, token_id: &str, max_age_ms: i64) -> Option<(Arc<RawBook>, i64)> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let books = self.books.read();
        let cached = books.get(token_id)?;
        let age_ms = now_ms - cached.updated_at_ms;
        if max_age_ms > 0 && age_ms > max_age_ms {
            return None;
        }
        Some((cached.book.clone(), age_ms))
    }

    async fn run(self: Arc<Self>, mut cmd_rx: mpsc::Receiver<WsCommand>) -> Result<()> {
        let mut desired_assets: HashSet<String> = HashSet::with_capacity(256);
        let mut reconnect_delay = Duration::from_secs(1);
        let max_reconnect_delay = Duration::from_secs(30);

        loop {
            while desired_assets.is_empty() {
                match cmd_rx.recv().await {
                    Some(WsCommand::Subscribe(token)) => {
                        desired_assets.insert(token);
                    }
                    None => return Ok(()),
                }
            }

            match self.connect_and_stream(&mut cmd_rx, &mut desired_assets).await {
                Ok(_) => {
                    reconnect_delay = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(error = %e, "market WS disconnected; reconnecting");
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        cmd_rx: &mut mpsc::Receiver<WsCommand>,
        desired_assets: &mut HashSet<String>,
    ) -> Result<()> {
        info!("connecting to Polymarket market WS");
        let (ws_stream, resp) = connect_async(MARKET_WSS_URL).await.context("connect_async market ws")?;
        info!(status = %resp.status(), "market WS connected");

        let (mut write, mut read) = ws_stream.split();

        let initial_assets: Vec<String> = desired_assets.iter().cloned().collect();
        let sub_msg = serde_json::json!({ "type": "market", "assets_ids": initial_assets });
        write.send(Message::Text(sub_msg.to_string())).await.context("send initial market subscription")?;

        let mut ping = interval(Duration::from_secs(5));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let _ = write.send(Message::Text("PING".to_string())).await;
                }
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return Ok(()); };
                    match cmd {
                        WsCommand::Subscribe(token) => {
                            if desired_assets.insert(token.clone()) {
                                let msg = serde_json::json!({ "assets_ids": [token], "operation": "subscribe" });
                                let _ = write.send(Message::Text(msg.to_string())).await;
                            }
                        }
                    }
                }
                ws_msg = read.next() => {
                    let Some(ws_msg) = ws_msg else {
                        return Err(anyhow::anyhow!("market ws stream ended"));
                    };
                    match ws_msg {
                        Ok(Message::Text(text)) => self.handle_text_message(&text),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "market ws close");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(anyhow::anyhow!("market ws error: {e}")),
                    }
                }
            }
        }
    }

    fn handle_text_message(&self, text: &str) {
        if text.eq_ignore_ascii_case("PONG") {
            return;
        }

        let json: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return,
        };

        let event_type = json.get("event_type").and_then(|v| v.as_str()).unwrap_or("");
        if event_type != "book" {
            return;
        }

        let msg: WsBookMsg = match serde_json::from_value(json) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "failed to parse market ws book msg");
                return;
            }
        };

        let updated_at_ms =
            msg.timestamp.as_deref().and_then(|s| s.parse::<i64>().ok()).unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let mut book = RawBook { bids: msg.bids, asks: msg.asks };
        sort_book(&mut book);

        self.books.write().insert(msg.asset_id, CachedBook { book: Arc::new(book), updated_at_ms });
    }
}

fn sort_book(book: &mut RawBook) {
    book.bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    book.asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
}
