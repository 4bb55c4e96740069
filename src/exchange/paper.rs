//! Paper/simulated execution adapter.
//!
//! Grounded directly on this codebase's `PaperExecutionAdapter`: adds
//! realistic latency jitter, size-scaled slippage, occasional partial fills
//! and random rejection, so simulation-mode behavior exercises the same
//! failure paths live trading would.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Duration};

use super::{ExecutionAdapter, OrderAck, OrderRequest, OrderSide, TimeInForce};

#[derive(Debug, Clone)]
pub struct PaperExecutionConfig {
    pub base_latency_ms: u64,
    pub latency_jitter_ms: u64,
    pub slippage_bps_per_1k: f64,
    pub base_slippage_bps: f64,
    pub fee_rate: f64,
    pub partial_fill_prob: f64,
    pub min_fill_ratio: f64,
    pub reject_prob: f64,
}

impl Default for PaperExecutionConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 150,
            latency_jitter_ms: 200,
            slippage_bps_per_1k: 15.0,
            base_slippage_bps: 10.0,
            fee_rate: 0.005,
            partial_fill_prob: 0.15,
            min_fill_ratio: 0.4,
            reject_prob: 0.02,
        }
    }
}

impl PaperExecutionConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("PAPER_BASE_LATENCY_MS") {
            if let Ok(ms) = v.parse() {
                config.base_latency_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PAPER_LATENCY_JITTER_MS") {
            if let Ok(ms) = v.parse() {
                config.latency_jitter_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PAPER_SLIPPAGE_BPS_PER_1K") {
            if let Ok(bps) = v.parse() {
                config.slippage_bps_per_1k = bps;
            }
        }
        if let Ok(v) = std::env::var("PAPER_REJECT_PROB") {
            if let Ok(prob) = v.parse() {
                config.reject_prob = prob;
            }
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct PaperExecutionAdapter {
    pub config: PaperExecutionConfig,
}

impl Default for PaperExecutionAdapter {
    fn default() -> Self {
        Self { config: PaperExecutionConfig::from_env() }
    }
}

impl PaperExecutionAdapter {
    pub fn new(config: PaperExecutionConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ExecutionAdapter for PaperExecutionAdapter {
    async fn place_order(&self, req: OrderRequest) -> Result<OrderAck> {
        let mut rng = StdRng::from_entropy();

        if !(req.price.is_finite() && req.price > 0.0 && req.price < 1.0) {
            return Err(anyhow!("invalid price"));
        }
        if !(req.notional_usdc.is_finite() && req.notional_usdc > 0.0) {
            return Err(anyhow!("invalid notional"));
        }

        let jitter: u64 = rng.gen_range(0..=self.config.latency_jitter_ms);
        sleep(Duration::from_millis(self.config.base_latency_ms + jitter)).await;

        if rng.gen::<f64>() < self.config.reject_prob {
            return Err(anyhow!("order rejected (simulated)"));
        }

        let size_factor = req.notional_usdc / 1000.0;
        let total_slippage_bps = self.config.base_slippage_bps + (self.config.slippage_bps_per_1k * size_factor);
        let slippage_multiplier = total_slippage_bps / 10_000.0;
        let filled_price = match req.side {
            OrderSide::Buy => (req.price * (1.0 + slippage_multiplier)).min(0.99),
            OrderSide::Sell => (req.price * (1.0 - slippage_multiplier)).max(0.01),
        };

        let fill_ratio = if rng.gen::<f64>() < self.config.partial_fill_prob {
            rng.gen_range(self.config.min_fill_ratio..1.0)
        } else {
            1.0
        };

        if req.tif == TimeInForce::Fok && fill_ratio < 1.0 {
            return Err(anyhow!("FOK order could not be fully filled"));
        }

        let filled_notional = req.notional_usdc * fill_ratio;
        let fees_usdc = filled_notional * self.config.fee_rate;

        Ok(OrderAck {
            order_id: format!("paper:{}", req.client_order_id),
            filled_notional_usdc: filled_notional,
            filled_price,
            filled_at: chrono::Utc::now().timestamp(),
            fees_usdc,
            slippage_bps: total_slippage_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_price() {
        let adapter = PaperExecutionAdapter::new(PaperExecutionConfig { reject_prob: 0.0, ..Default::default() });
        let req = OrderRequest {
            client_order_id: "1".into(),
            token_id: "tok".into(),
            side: OrderSide::Buy,
            price: 1.5,
            notional_usdc: 10.0,
            tif: TimeInForce::Fok,
        };
        assert!(adapter.place_order(req).await.is_err());
    }

    #[tokio::test]
    async fn buy_fills_above_limit_price_due_to_slippage() {
        let adapter = PaperExecutionAdapter::new(PaperExecutionConfig {
            reject_prob: 0.0,
            partial_fill_prob: 0.0,
            base_latency_ms: 0,
            latency_jitter_ms: 0,
            ..Default::default()
        });
        let req = OrderRequest {
            client_order_id: "1".into(),
            token_id: "tok".into(),
            side: OrderSide::Buy,
            price: 0.5,
            notional_usdc: 10.0,
            tif: TimeInForce::Gtc,
        };
        let ack = adapter.place_order(req).await.unwrap();
        assert!(ack.filled_price >= 0.5);
    }
}
