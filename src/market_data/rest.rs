//! REST orderbook fetch, grounded on this codebase's `PolymarketScraper`.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

const CLOB_HOST: &str = "https://clob.polymarket.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBook {
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLevel {
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub size: f64,
}

fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(deserializer)?;
    match v {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| serde::de::Error::custom("invalid number")),
        serde_json::Value::String(s) => s.parse::<f64>().map_err(|_| serde::de::Error::custom("invalid float string")),
        _ => Err(serde::de::Error::custom("expected string or number")),
    }
}

#[derive(Clone)]
pub struct RestBookClient {
    client: Client,
    host: String,
}

impl Default for RestBookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RestBookClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("failed to build HTTP client");
        Self { client, host: CLOB_HOST.to_string() }
    }

    pub async fn fetch_book(&self, token_id: &str) -> Result<RawBook> {
        let url = format!("{}/book", self.host);
        let response = self
            .client
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .context("REST orderbook request failed")?;
        let book: RawBook = response.json().await.context("failed to parse REST orderbook")?;
        Ok(book)
    }
}
