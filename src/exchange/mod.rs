//! Exchange client abstraction.
//!
//! `ExecutionAdapter` is the trait the Execution Engine talks to; it is
//! implemented by a paper/simulated adapter (default) and a live Polymarket
//! CLOB adapter. Both adapters share the same order request/ack shapes so
//! the Execution Engine never branches on which one is active.

pub mod clob;
pub mod paper;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub token_id: String,
    pub side: OrderSide,
    /// Limit price in `[0,1]`.
    pub price: f64,
    /// Notional USDC to spend (BUY) or target proceeds (SELL).
    pub notional_usdc: f64,
    pub tif: TimeInForce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_notional_usdc: f64,
    pub filled_price: f64,
    pub filled_at: i64,
    pub fees_usdc: f64,
    pub slippage_bps: f64,
}

/// Outcome of a smart-sell: an exit helper that adapts slippage tolerance to
/// urgency and signals when the caller should retry with a wider tolerance.
#[derive(Debug, Clone)]
pub struct SmartSellResult {
    pub success: bool,
    pub avg_price: Option<f64>,
    pub filled_usd: Option<f64>,
    pub reason: Option<String>,
}

pub const FOK_NOT_FILLED: &str = "FOK_NOT_FILLED";

#[derive(Debug, Clone, Copy)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub struct RawOrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[async_trait::async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn place_order(&self, req: OrderRequest) -> Result<OrderAck>;

    /// Tradeable USDC balance. The paper adapter returns a fixed simulated
    /// balance; the live CLOB adapter overrides this with a real query.
    async fn get_balance(&self) -> Result<f64> {
        Ok(std::env::var("PAPER_BALANCE_USD").ok().and_then(|v| v.parse().ok()).unwrap_or(1000.0))
    }

    /// Adapts slippage tolerance to urgency and retries once on
    /// `FOK_NOT_FILLED` with a wider tolerance when `force_sell` is set by
    /// the caller on the retry.
    async fn smart_sell(
        &self,
        token_id: &str,
        notional_usdc: f64,
        reference_price: f64,
        max_slippage_pct: f64,
        force_sell: bool,
    ) -> Result<SmartSellResult> {
        let worst_acceptable_price = reference_price * (1.0 - max_slippage_pct);
        let req = OrderRequest {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            token_id: token_id.to_string(),
            side: OrderSide::Sell,
            price: worst_acceptable_price.max(0.01),
            notional_usdc,
            tif: if force_sell { TimeInForce::Ioc } else { TimeInForce::Fok },
        };

        match self.place_order(req).await {
            Ok(ack) => Ok(SmartSellResult {
                success: true,
                avg_price: Some(ack.filled_price),
                filled_usd: Some(ack.filled_notional_usdc),
                reason: None,
            }),
            Err(e) => Ok(SmartSellResult {
                success: false,
                avg_price: None,
                filled_usd: None,
                reason: Some(if force_sell { e.to_string() } else { FOK_NOT_FILLED.to_string() }),
            }),
        }
    }
}
