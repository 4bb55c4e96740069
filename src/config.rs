//! Typed, validated configuration for the whale-copy daemon.
//!
//! Loaded once at startup via [`Config::from_env`]; never mutated afterwards.
//! Follows the `dotenv` + `std::env::var` + typed-fallback pattern used
//! throughout this codebase.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationMode {
    Off,
    Losing,
    All,
}

impl LiquidationMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "losing" => LiquidationMode::Losing,
            "all" => LiquidationMode::All,
            _ => LiquidationMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasMode {
    /// Copy any single whale BUY, regardless of flow size.
    CopyAnyWhaleBuy,
    /// Require a minimum trade count and net flow before a token is eligible.
    Conservative,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Sizing / bankroll
    pub max_trade_usd: f64,
    pub trade_fraction: f64,
    pub reserve_floor_usd: f64,
    pub base_reserve_fraction: f64,
    pub max_reserve_fraction: f64,
    pub reserve_adaptation_rate: f64,

    // Exposure caps
    pub max_open_positions_total: usize,
    pub max_open_positions_per_market: usize,
    pub max_deployed_fraction_total: f64,

    // Cooldowns
    pub cooldown_seconds_per_token: u64,

    // Position target prices (cents)
    pub entry_band_cents: i32,
    pub tp_cents: i32,
    pub hedge_trigger_cents: i32,
    pub max_adverse_cents: i32,
    pub max_hold_seconds: i64,
    pub hedge_ratio: f64,
    pub max_hedge_ratio: f64,

    // Entry price bounds (cents)
    pub min_entry_price_cents: i32,
    pub max_entry_price_cents: i32,

    // Liquidity gates
    pub min_spread_cents: i32,
    pub min_depth_usd_at_exit: f64,
    pub min_trades_in_window: u32,
    pub min_book_updates_in_window: u32,

    // EV tracker
    pub ev_window_size: usize,
    pub pause_seconds: i64,
    pub min_ev_cents: f64,
    pub min_profit_factor: f64,
    pub churn_cost_cents: f64,

    // Bias accumulator
    pub bias_mode: BiasMode,
    pub min_bias_flow_usd: f64,
    pub min_bias_trades: u32,
    pub bias_window_seconds: i64,
    pub bias_stale_seconds: i64,
    pub whale_price_min: Option<f64>,
    pub whale_price_max: Option<f64>,
    pub whale_batch_size: usize,

    // Polling cadence
    pub poll_interval_ms: u64,
    pub position_poll_interval_ms: u64,
    pub liquidation_poll_interval_ms: u64,
    pub balance_refresh_interval_ms: u64,

    // Liquidation mode / scanner
    pub liquidation_mode: LiquidationMode,
    pub scanner_enabled: bool,

    // External services
    pub dome_api_key: Option<String>,
    pub hashdive_api_key: Option<String>,
    pub simulation_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = Self {
            max_trade_usd: env_f64("MAX_TRADE_USD", 25.0),
            trade_fraction: env_f64("TRADE_FRACTION", 0.01),
            reserve_floor_usd: env_f64("RESERVE_FLOOR_USD", 50.0),
            base_reserve_fraction: env_f64("BASE_RESERVE_FRACTION", 0.2),
            max_reserve_fraction: env_f64("MAX_RESERVE_FRACTION", 0.5),
            reserve_adaptation_rate: env_f64("RESERVE_ADAPTATION_RATE", 0.1),

            max_open_positions_total: env_usize("MAX_OPEN_POSITIONS_TOTAL", 20),
            max_open_positions_per_market: env_usize("MAX_OPEN_POSITIONS_PER_MARKET", 2),
            max_deployed_fraction_total: env_f64("MAX_DEPLOYED_FRACTION_TOTAL", 0.8),

            cooldown_seconds_per_token: env_u64("COOLDOWN_SECONDS_PER_TOKEN", 180),

            entry_band_cents: env_i32("ENTRY_BAND_CENTS", 4),
            tp_cents: env_i32("TP_CENTS", 14),
            hedge_trigger_cents: env_i32("HEDGE_TRIGGER_CENTS", 16),
            max_adverse_cents: env_i32("MAX_ADVERSE_CENTS", 30),
            max_hold_seconds: env_i64("MAX_HOLD_SECONDS", 3600),
            hedge_ratio: env_f64("HEDGE_RATIO", 0.4),
            max_hedge_ratio: env_f64("MAX_HEDGE_RATIO", 0.6),

            min_entry_price_cents: env_i32("MIN_ENTRY_PRICE_CENTS", 30),
            max_entry_price_cents: env_i32("MAX_ENTRY_PRICE_CENTS", 82),

            min_spread_cents: env_i32("MIN_SPREAD_CENTS", 3),
            min_depth_usd_at_exit: env_f64("MIN_DEPTH_USD_AT_EXIT", 50.0),
            min_trades_in_window: env_u32("MIN_TRADES_IN_WINDOW", 1),
            min_book_updates_in_window: env_u32("MIN_BOOK_UPDATES_IN_WINDOW", 3),

            ev_window_size: env_usize("EV_WINDOW_SIZE", 200),
            pause_seconds: env_i64("EV_PAUSE_SECONDS", 1800),
            min_ev_cents: env_f64("MIN_EV_CENTS", 0.5),
            min_profit_factor: env_f64("MIN_PROFIT_FACTOR", 1.05),
            churn_cost_cents: env_f64("CHURN_COST_CENTS", 2.0),

            bias_mode: if env_bool("COPY_ANY_WHALE_BUY", true) {
                BiasMode::CopyAnyWhaleBuy
            } else {
                BiasMode::Conservative
            },
            min_bias_flow_usd: env_f64("MIN_BIAS_FLOW_USD", 500.0),
            min_bias_trades: env_u32("MIN_BIAS_TRADES", 2),
            bias_window_seconds: env_i64("BIAS_WINDOW_SECONDS", 3600),
            bias_stale_seconds: env_i64("BIAS_STALE_SECONDS", 900),
            whale_price_min: std::env::var("WHALE_PRICE_MIN").ok().and_then(|v| v.parse().ok()),
            whale_price_max: std::env::var("WHALE_PRICE_MAX").ok().and_then(|v| v.parse().ok()),
            whale_batch_size: env_usize("WHALE_BATCH_SIZE", 10),

            poll_interval_ms: env_u64("POLL_INTERVAL_MS", 200),
            position_poll_interval_ms: env_u64("POSITION_POLL_INTERVAL_MS", 100),
            liquidation_poll_interval_ms: env_u64("LIQUIDATION_POLL_INTERVAL_MS", 500),
            balance_refresh_interval_ms: env_u64("BALANCE_REFRESH_INTERVAL_MS", 5000),

            liquidation_mode: LiquidationMode::parse(
                &std::env::var("LIQUIDATION_MODE").unwrap_or_else(|_| "off".to_string()),
            ),
            scanner_enabled: env_bool("SCANNER_ENABLED", false),

            dome_api_key: std::env::var("DOME_API_KEY").ok(),
            hashdive_api_key: std::env::var("HASHDIVE_API_KEY").ok(),
            simulation_mode: env_bool("SIMULATION_MODE", true),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.reserve_floor_usd < 0.0 {
            bail!("RESERVE_FLOOR_USD must be >= 0");
        }
        if self.hedge_ratio > self.max_hedge_ratio {
            bail!("HEDGE_RATIO must be <= MAX_HEDGE_RATIO");
        }
        if self.min_entry_price_cents >= self.max_entry_price_cents {
            bail!("MIN_ENTRY_PRICE_CENTS must be < MAX_ENTRY_PRICE_CENTS");
        }
        if let (Some(min), Some(max)) = (self.whale_price_min, self.whale_price_max) {
            if min > max {
                tracing::warn!(
                    min, max,
                    "whale price filter disabled: WHALE_PRICE_MIN > WHALE_PRICE_MAX"
                );
            }
        }
        if self.max_trade_usd <= 0.0 {
            bail!("MAX_TRADE_USD must be > 0");
        }
        Ok(())
    }

    /// Whale price filter is disabled when min > max, per the bias accumulator contract.
    pub fn whale_price_filter(&self) -> Option<(f64, f64)> {
        match (self.whale_price_min, self.whale_price_max) {
            (Some(min), Some(max)) if min <= max => Some((min, max)),
            _ => None,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        std::env::remove_var("MIN_ENTRY_PRICE_CENTS");
        std::env::remove_var("MAX_ENTRY_PRICE_CENTS");
        let cfg = Config::from_env().expect("defaults must validate");
        assert!(cfg.min_entry_price_cents < cfg.max_entry_price_cents);
        assert!(cfg.hedge_ratio <= cfg.max_hedge_ratio);
    }

    #[test]
    fn whale_price_filter_disabled_when_inverted() {
        std::env::set_var("WHALE_PRICE_MIN", "0.9");
        std::env::set_var("WHALE_PRICE_MAX", "0.1");
        let cfg = Config::from_env().expect("should still validate, just warn");
        assert_eq!(cfg.whale_price_filter(), None);
        std::env::remove_var("WHALE_PRICE_MIN");
        std::env::remove_var("WHALE_PRICE_MAX");
    }
}
