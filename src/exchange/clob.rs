//! Live Polymarket CLOB execution adapter.
//!
//! HMAC-signed L2 authentication, grounded directly on this codebase's
//! `PolymarketClobAdapter`: `timestamp + method + path + body` message,
//! URL-safe base64 secret, signature sent via `POLY_*` headers.

use anyhow::{anyhow, Context, Result};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExecutionAdapter, OrderAck, OrderRequest, OrderSide, TimeInForce};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct PolymarketClobCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
    pub wallet_address: String,
}

impl PolymarketClobCredentials {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("POLYMARKET_CLOB_API_KEY").ok()?;
        let secret = std::env::var("POLYMARKET_CLOB_SECRET").ok()?;
        let passphrase = std::env::var("POLYMARKET_CLOB_PASSPHRASE").ok()?;
        let wallet_address = std::env::var("POLYMARKET_WALLET_ADDRESS").ok()?;

        if api_key.is_empty() || secret.is_empty() || passphrase.is_empty() {
            return None;
        }
        Some(Self { api_key, secret, passphrase, wallet_address })
    }
}

#[derive(Clone)]
pub struct PolymarketClobAdapter {
    client: Client,
    creds: PolymarketClobCredentials,
    host: String,
}

impl std::fmt::Debug for PolymarketClobAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolymarketClobAdapter").field("host", &self.host).field("api_key", &"[REDACTED]").finish()
    }
}

#[derive(Debug, Serialize)]
struct ClobOrderPayload {
    #[serde(rename = "tokenID")]
    token_id: String,
    price: String,
    size: String,
    side: String,
    #[serde(rename = "orderType")]
    order_type: String,
    #[serde(rename = "timeInForce")]
    time_in_force: String,
}

#[derive(Debug, Deserialize)]
struct ClobOrderResponse {
    #[serde(rename = "orderID", alias = "orderId", alias = "order_id")]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", alias = "error", default)]
    error_msg: Option<String>,
    #[serde(rename = "filledSize", alias = "filled_size", default)]
    filled_size: Option<String>,
    #[serde(rename = "avgPrice", alias = "avg_price", default)]
    avg_price: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketBalance {
    #[serde(default)]
    pub balance: f64,
}

impl PolymarketClobAdapter {
    pub const CLOB_HOST: &'static str = "https://clob.polymarket.com";
    pub const DATA_API_HOST: &'static str = "https://data-api.polymarket.com";

    pub fn new(creds: PolymarketClobCredentials) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { client, creds, host: Self::CLOB_HOST.to_string() }
    }

    pub fn from_env() -> Option<Self> {
        let creds = PolymarketClobCredentials::from_env()?;
        info!("PolymarketClobAdapter initialized from env credentials");
        Some(Self::new(creds))
    }

    pub async fn get_balance(&self) -> Result<f64> {
        let path = "/balance-allowance?signature_type=2";
        let headers = self.auth_headers("GET", path, "")?;
        let url = format!("{}{}", self.host, path);

        let mut request = self.client.get(&url);
        for (key, value) in headers {
            request = request.header(&key, &value);
        }

        let response = request.send().await.context("balance request failed")?;
        let status = response.status();
        let resp_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(anyhow!("balance request failed ({}): {}", status, resp_text));
        }

        if let Ok(map) = serde_json::from_str::<std::collections::HashMap<String, serde_json::Value>>(&resp_text) {
            if let Some(bal_val) = map.get("balance") {
                if let Some(bal) = bal_val.as_f64() {
                    return Ok(bal);
                }
                if let Some(bal_str) = bal_val.as_str() {
                    if let Ok(bal) = bal_str.parse::<f64>() {
                        return Ok(bal / 1_000_000.0);
                    }
                }
            }
        }

        if let Ok(bal) = serde_json::from_str::<PolymarketBalance>(&resp_text) {
            return Ok(bal.balance);
        }

        warn!(response = %resp_text, "could not parse balance response");
        Ok(0.0)
    }

    fn sign_request(&self, method: &str, path: &str, body: &str, timestamp: i64) -> Result<String> {
        let message = format!("{}{}{}{}", timestamp, method, path, body);
        let secret_bytes = URL_SAFE
            .decode(&self.creds.secret)
            .or_else(|_| URL_SAFE_NO_PAD.decode(&self.creds.secret))
            .or_else(|_| BASE64.decode(&self.creds.secret))
            .context("failed to decode CLOB secret")?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes).map_err(|e| anyhow!("HMAC key error: {}", e))?;
        mac.update(message.as_bytes());
        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(String, String)>> {
        let timestamp = Utc::now().timestamp();
        let signature = self.sign_request(method, path, body, timestamp)?;
        Ok(vec![
            ("POLY_ADDRESS".to_string(), self.creds.wallet_address.clone()),
            ("POLY_API_KEY".to_string(), self.creds.api_key.clone()),
            ("POLY_SIGNATURE".to_string(), signature),
            ("POLY_TIMESTAMP".to_string(), timestamp.to_string()),
            ("POLY_PASSPHRASE".to_string(), self.creds.passphrase.clone()),
        ])
    }
}

#[async_trait::async_trait]
impl ExecutionAdapter for PolymarketClobAdapter {
    async fn place_order(&self, req: OrderRequest) -> Result<OrderAck> {
        let start = std::time::Instant::now();

        if !(req.price.is_finite() && req.price > 0.0 && req.price < 1.0) {
            return Err(anyhow!("invalid price: {}", req.price));
        }
        if !(req.notional_usdc.is_finite() && req.notional_usdc > 0.0) {
            return Err(anyhow!("invalid notional: {}", req.notional_usdc));
        }

        let size = req.notional_usdc / req.price;
        let side_str = match req.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let tif_str = match req.tif {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        };

        let payload = ClobOrderPayload {
            token_id: req.token_id.clone(),
            price: format!("{:.4}", req.price),
            size: format!("{:.6}", size),
            side: side_str.to_string(),
            order_type: "LIMIT".to_string(),
            time_in_force: tif_str.to_string(),
        };

        let body = serde_json::to_string(&payload).context("failed to serialize order")?;
        let path = "/order";
        let headers = self.auth_headers("POST", path, &body)?;

        debug!(token_id = %req.token_id, side = %side_str, price = %req.price, notional = %req.notional_usdc, "CLOB order submission");

        let url = format!("{}{}", self.host, path);
        let mut request = self.client.post(&url).header("Content-Type", "application/json");
        for (key, value) in headers {
            request = request.header(&key, &value);
        }

        let response = request.body(body).send().await.context("CLOB request failed")?;
        let status = response.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, latency_ms, "CLOB order rejected");
            return Err(anyhow!("CLOB order rejected ({}): {}", status, error_text));
        }

        let resp_text = response.text().await.context("failed to read response")?;
        let resp: ClobOrderResponse = serde_json::from_str(&resp_text).context("failed to parse CLOB response")?;

        if let Some(err) = resp.error_msg {
            if !err.is_empty() {
                return Err(anyhow!("CLOB error: {}", err));
            }
        }

        let order_id = resp.order_id.unwrap_or_else(|| format!("clob:{}", req.client_order_id));
        let filled_size: f64 = resp.filled_size.and_then(|s| s.parse().ok()).unwrap_or(size);
        let filled_price: f64 = resp.avg_price.and_then(|s| s.parse().ok()).unwrap_or(req.price);
        let filled_notional = filled_size * filled_price;
        let fees_usdc = filled_notional * 0.005;

        info!(order_id = %order_id, filled_size, filled_price, latency_ms, "CLOB order filled");

        Ok(OrderAck {
            order_id,
            filled_notional_usdc: filled_notional,
            filled_price,
            filled_at: Utc::now().timestamp(),
            fees_usdc,
            slippage_bps: 0.0,
        })
    }

    async fn get_balance(&self) -> Result<f64> {
        self.get_balance().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic_for_fixed_timestamp() {
        let creds = PolymarketClobCredentials {
            api_key: "k".into(),
            secret: URL_SAFE.encode(b"supersecretkeybytes"),
            passphrase: "p".into(),
            wallet_address: "0xabc".into(),
        };
        let adapter = PolymarketClobAdapter::new(creds);
        let sig1 = adapter.sign_request("GET", "/balance-allowance", "", 1_700_000_000).unwrap();
        let sig2 = adapter.sign_request("GET", "/balance-allowance", "", 1_700_000_000).unwrap();
        assert_eq!(sig1, sig2);
    }
}
