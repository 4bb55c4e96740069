//! Dome API wallet-trade polling client.
//!
//! Grounded directly on this codebase's `DomeClient`: 1 req/sec rate limit,
//! exponential retry backoff capped at 16s, a 60s backoff on HTTP 429, BUY
//! orders only, up to 3 pages per wallet per poll.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::WhaleTrade;

const DOME_API_BASE: &str = "https://api.domeapi.io/v1/polymarket";
const MAX_RETRIES: u32 = 5;
const RATE_LIMIT_DELAY_MS: u64 = 1000;
const MAX_PAGES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomeOrder {
    pub token_id: String,
    #[serde(default)]
    pub token_label: Option<String>,
    pub side: String,
    pub shares_normalized: f64,
    pub price: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub market_slug: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
    pub orders: Vec<DomeOrder>,
    pub count: usize,
}

impl DomeOrder {
    pub fn into_whale_trade(self) -> WhaleTrade {
        WhaleTrade {
            token_id: self.token_id,
            market_id: self.market_slug,
            wallet: self.user,
            size_usd: self.shares_normalized * self.price,
            price: Some(self.price),
            timestamp_ms: self.timestamp,
        }
    }
}

pub struct DomeClient {
    client: Client,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl DomeClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                let auth_value = format!("Bearer {}", api_key);
                headers.insert(reqwest::header::AUTHORIZATION, auth_value.parse().context("invalid API key format")?);
                headers
            })
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, last_request: Arc::new(Mutex::new(None)) })
    }

    async fn rate_limited_request(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            let min_delay = Duration::from_millis(RATE_LIMIT_DELAY_MS);
            if elapsed < min_delay {
                sleep(min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn get_orders(&self, user: &str, start_time: Option<i64>, limit: u32, offset: u32) -> Result<OrdersResponse> {
        self.rate_limited_request().await;

        let url = format!("{}/orders", DOME_API_BASE);
        let limit = limit.min(1000);

        let mut query_params = vec![("user", user.to_string()), ("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(ts) = start_time {
            query_params.push(("start_time", ts.to_string()));
        }

        let response = self.retry_request(&url, &query_params).await?;
        let orders: Vec<DomeOrder> = response.json().await.context("failed to parse orders response")?;
        let raw_count = orders.len();

        let buy_orders: Vec<DomeOrder> = orders.into_iter().filter(|o| o.side.eq_ignore_ascii_case("buy")).collect();

        info!(user, raw_count, count = buy_orders.len(), "fetched BUY orders from Dome");

        Ok(OrdersResponse { count: raw_count, orders: buy_orders })
    }

    async fn retry_request(&self, url: &str, query_params: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut backoff = Duration::from_millis(100);

        for attempt in 1..=MAX_RETRIES {
            match self.client.get(url).query(query_params).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    } else if status.as_u16() == 429 {
                        warn!(attempt, "rate limited (429), backing off 60s");
                        sleep(Duration::from_secs(60)).await;
                    } else if status.is_server_error() {
                        warn!(attempt, backoff_ms = backoff.as_millis() as u64, "server error, backing off");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(16));
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        bail!("Dome API error {}: {}", status, body);
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Dome request failed");
                    if attempt < MAX_RETRIES {
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(16));
                    } else {
                        return Err(e.into());
                    }
                }
            }
        }

        bail!("max retries exceeded for {}", url)
    }

    pub async fn get_orders_paginated(&self, user: &str, start_time: Option<i64>, limit_per_page: u32) -> Result<Vec<DomeOrder>> {
        let mut all_orders = Vec::new();

        for page in 0..MAX_PAGES {
            let offset = page * limit_per_page;
            let response = self.get_orders(user, start_time, limit_per_page, offset).await?;
            let raw_count = response.count;
            all_orders.extend(response.orders);

            if raw_count < limit_per_page as usize {
                break;
            }
        }

        debug!(user, total = all_orders.len(), "paginated Dome fetch complete");
        Ok(all_orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_construction_succeeds() {
        let client = DomeClient::new("test-api-key".to_string());
        assert!(client.is_ok());
    }

    #[test]
    fn dome_order_converts_to_whale_trade() {
        let order = DomeOrder {
            token_id: "tok1".into(),
            token_label: Some("Yes".into()),
            side: "BUY".into(),
            shares_normalized: 100.0,
            price: 0.45,
            timestamp: 1_700_000_000_000,
            market_slug: Some("will-x-happen".into()),
            user: "0xwhale".into(),
        };
        let trade = order.into_whale_trade();
        assert_eq!(trade.token_id, "tok1");
        assert!((trade.size_usd - 45.0).abs() < 1e-9);
    }
}
