//! Hashdive API client: whale trade polling and diagnostics-only wallet
//! classification.
//!
//! Grounded directly on this codebase's `HashdiveScraper`. Classification
//! tags (Elite/Insider/Whale/Regular) are diagnostics only — they never gate
//! bias eligibility, which is governed solely by the Bias Accumulator.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::models::WhaleTrade;

const HASHDIVE_API_BASE: &str = "https://hashdive.com/api";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

struct RateLimiter {
    last_request: std::time::Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new() -> Self {
        Self { last_request: std::time::Instant::now() - Duration::from_secs(2), min_interval: Duration::from_secs(2) }
    }

    async fn acquire(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = std::time::Instant::now();
    }
}

pub struct HashdiveClient {
    client: reqwest::Client,
    api_key: String,
    rate_limiter: RateLimiter,
    credits_used: u32,
}

impl HashdiveClient {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("whalecopy-daemon/1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, api_key, rate_limiter: RateLimiter::new(), credits_used: 0 }
    }

    pub async fn get_trades(&mut self, user_address: &str, page: Option<u32>, page_size: Option<u32>) -> Result<TradesResponse> {
        self.rate_limiter.acquire().await;

        let mut params = HashMap::new();
        params.insert("user_address", user_address.to_string());
        params.insert("format", "json".to_string());
        if let Some(p) = page {
            params.insert("page", p.to_string());
        }
        if let Some(ps) = page_size {
            params.insert("page_size", ps.min(1000).to_string());
        }

        let url = format!("{}/get_trades", HASHDIVE_API_BASE);
        let response = self.execute_with_retry(&url, &params).await?;
        let trades: TradesResponse = response.json().await.context("failed to parse trades response")?;

        self.credits_used += 1;
        info!(user_address, count = trades.data.len(), credits_used = self.credits_used, "fetched Hashdive trades");

        Ok(trades)
    }

    async fn execute_with_retry(&self, url: &str, params: &HashMap<&str, String>) -> Result<reqwest::Response> {
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            let request = self.client.get(url).header("x-api-key", &self.api_key).query(params);

            match timeout(Duration::from_secs(10), request.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        return Ok(response);
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt = attempt + 1, "rate limited, backing off 60s");
                        sleep(Duration::from_secs(60)).await;
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        if text.contains("Credit limit exceeded") {
                            error!("Hashdive API credit limit exceeded");
                            bail!("Hashdive credit limit exceeded");
                        }
                        bail!("Hashdive API error {}: {}", status, text);
                    }
                }
                Ok(Err(e)) => warn!(attempt = attempt + 1, error = %e, "request failed"),
                Err(_) => warn!(attempt = attempt + 1, "request timeout"),
            }

            if attempt < MAX_RETRIES - 1 {
                debug!(backoff_ms = backoff, "retrying");
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }

        bail!("max retries exceeded for {}", url)
    }

    pub fn to_whale_trades(&self, trades: &[HashdiveTrade]) -> Vec<WhaleTrade> {
        trades
            .iter()
            .filter(|t| t.side.eq_ignore_ascii_case("buy"))
            .map(|t| WhaleTrade {
                token_id: t.asset_id.clone(),
                market_id: Some(t.market_slug.clone()),
                wallet: t.user_address.clone(),
                size_usd: t.size * t.price,
                price: Some(t.price),
                timestamp_ms: t.timestamp,
            })
            .collect()
    }

    /// Diagnostics-only classification; never consulted for entry eligibility.
    pub fn classify_wallet(&self, trades: &[HashdiveTrade]) -> WalletClassification {
        if trades.is_empty() {
            return WalletClassification::Regular;
        }

        let total_volume: f64 = trades.iter().map(|t| t.size * t.price).sum();

        let profitable_trades = trades.iter().filter(|t| t.pnl_usd.is_some_and(|p| p > 0.0)).count();
        let win_rate = profitable_trades as f64 / trades.len() as f64;

        let timestamps: Vec<i64> = trades.iter().map(|t| t.timestamp).collect();
        let earliest_ts = *timestamps.iter().min().unwrap_or(&0);
        let latest_ts = *timestamps.iter().max().unwrap_or(&0);
        let time_range = (latest_ts - earliest_ts) as f64;

        let early_entry_score = if time_range > 0.0 {
            let avg_entry_time = timestamps.iter().sum::<i64>() as f64 / timestamps.len() as f64;
            1.0 - ((avg_entry_time - earliest_ts as f64) / time_range).min(1.0)
        } else {
            0.5
        };

        const ELITE_VOLUME_THRESHOLD: f64 = 100_000.0;
        const ELITE_WIN_RATE_THRESHOLD: f64 = 0.65;
        const INSIDER_WIN_RATE_THRESHOLD: f64 = 0.70;
        const INSIDER_EARLY_THRESHOLD: f64 = 0.75;

        if total_volume >= ELITE_VOLUME_THRESHOLD && win_rate >= ELITE_WIN_RATE_THRESHOLD {
            return WalletClassification::Elite { win_rate, total_volume };
        }
        if win_rate >= INSIDER_WIN_RATE_THRESHOLD && early_entry_score >= INSIDER_EARLY_THRESHOLD {
            return WalletClassification::Insider { win_rate, early_entry_score };
        }
        if total_volume >= 50_000.0 {
            return WalletClassification::Whale { total_volume, win_rate };
        }

        WalletClassification::Regular
    }
}

#[derive(Debug, Clone)]
pub enum WalletClassification {
    Elite { win_rate: f64, total_volume: f64 },
    Insider { win_rate: f64, early_entry_score: f64 },
    Whale { total_volume: f64, win_rate: f64 },
    Regular,
}

impl WalletClassification {
    /// Short tag surfaced in the status summary; carries no eligibility weight.
    pub fn label(&self) -> &'static str {
        match self {
            WalletClassification::Elite { .. } => "ELITE",
            WalletClassification::Insider { .. } => "INSIDER",
            WalletClassification::Whale { .. } => "WHALE",
            WalletClassification::Regular => "REGULAR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradesResponse {
    pub data: Vec<HashdiveTrade>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashdiveTrade {
    pub user_address: String,
    pub asset_id: String,
    pub market_slug: String,
    pub side: String,
    pub size: f64,
    pub price: f64,
    pub pnl_usd: Option<f64>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(size: f64, price: f64, pnl: Option<f64>, ts: i64) -> HashdiveTrade {
        HashdiveTrade {
            user_address: "0xw".into(),
            asset_id: "tok".into(),
            market_slug: "mkt".into(),
            side: "BUY".into(),
            size,
            price,
            pnl_usd: pnl,
            timestamp: ts,
        }
    }

    #[test]
    fn empty_trades_classify_regular() {
        let client = HashdiveClient::new("k".into());
        assert!(matches!(client.classify_wallet(&[]), WalletClassification::Regular));
    }

    #[test]
    fn high_volume_high_winrate_is_elite() {
        let client = HashdiveClient::new("k".into());
        let trades: Vec<HashdiveTrade> =
            (0..10).map(|i| trade(20_000.0, 0.6, Some(if i < 7 { 10.0 } else { -5.0 }), 1_000_000 + i)).collect();
        assert!(matches!(client.classify_wallet(&trades), WalletClassification::Elite { .. }));
    }

    #[test]
    fn to_whale_trades_computes_size_usd() {
        let client = HashdiveClient::new("k".into());
        let trades = vec![trade(100.0, 0.5, None, 1_700_000_000_000)];
        let whale_trades = client.to_whale_trades(&trades);
        assert_eq!(whale_trades.len(), 1);
        assert!((whale_trades[0].size_usd - 50.0).abs() < 1e-9);
    }

    #[test]
    fn to_whale_trades_drops_sells() {
        let client = HashdiveClient::new("k".into());
        let mut sell = trade(100.0, 0.5, None, 1_700_000_000_000);
        sell.side = "SELL".into();
        let buy = trade(100.0, 0.5, None, 1_700_000_000_001);
        let whale_trades = client.to_whale_trades(&[sell, buy]);
        assert_eq!(whale_trades.len(), 1);
        assert_eq!(whale_trades[0].timestamp_ms, 1_700_000_000_001);
    }
}
