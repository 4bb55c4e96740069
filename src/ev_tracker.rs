//! Rolling expected-value tracker.
//!
//! Keeps the last N trade results as a FIFO and derives win rate / EV /
//! profit factor from them. Crosses the configured EV or profit-factor
//! floor and the tracker self-pauses for a cooldown window.

use std::collections::VecDeque;

use crate::config::Config;
use crate::models::{now_ms, EvMetrics, TradeResult};

pub struct TradingAllowed {
    pub allowed: bool,
    pub reason: Option<String>,
}

pub struct EvTracker {
    window_size: usize,
    pause_seconds: i64,
    min_ev_cents: f64,
    min_profit_factor: f64,
    churn_cost_cents: f64,

    results: VecDeque<TradeResult>,
    paused_until_ms: Option<i64>,
    metrics: EvMetrics,
}

impl EvTracker {
    pub fn new(cfg: &Config) -> Self {
        Self {
            window_size: cfg.ev_window_size,
            pause_seconds: cfg.pause_seconds,
            min_ev_cents: cfg.min_ev_cents,
            min_profit_factor: cfg.min_profit_factor,
            churn_cost_cents: cfg.churn_cost_cents,
            results: VecDeque::with_capacity(cfg.ev_window_size),
            paused_until_ms: None,
            metrics: EvMetrics::default(),
        }
    }

    pub fn record_trade(&mut self, result: TradeResult) {
        if self.results.len() == self.window_size {
            self.results.pop_front();
        }
        self.results.push_back(result);
        self.recompute();
    }

    fn recompute(&mut self) {
        let total_trades = self.results.len() as u64;
        let wins: Vec<&TradeResult> = self.results.iter().filter(|r| r.is_win).collect();
        let losses: Vec<&TradeResult> = self.results.iter().filter(|r| !r.is_win).collect();

        let win_count = wins.len() as u64;
        let loss_count = losses.len() as u64;

        let avg_win_cents = if !wins.is_empty() {
            wins.iter().map(|r| r.pnl_cents).sum::<f64>() / wins.len() as f64
        } else {
            0.0
        };
        let avg_loss_cents = if !losses.is_empty() {
            losses.iter().map(|r| r.pnl_cents.abs()).sum::<f64>() / losses.len() as f64
        } else {
            0.0
        };

        let win_rate = if total_trades > 0 {
            win_count as f64 / total_trades as f64
        } else {
            0.0
        };
        let loss_rate = 1.0 - win_rate;

        let ev_cents = win_rate * avg_win_cents - loss_rate * avg_loss_cents - self.churn_cost_cents;
        let profit_factor = if avg_loss_cents > 0.0 {
            avg_win_cents / avg_loss_cents
        } else {
            f64::INFINITY
        };

        let total_pnl_usd: f64 = self.results.iter().map(|r| r.pnl_usd).sum();

        self.metrics = EvMetrics {
            total_trades,
            wins: win_count,
            losses: loss_count,
            win_rate,
            avg_win_cents,
            avg_loss_cents,
            ev_cents,
            profit_factor,
            total_pnl_usd,
        };

        if total_trades >= 10 && (ev_cents < self.min_ev_cents || profit_factor < self.min_profit_factor) {
            self.paused_until_ms = Some(now_ms() + self.pause_seconds * 1000);
        }
    }

    pub fn get_metrics(&self) -> EvMetrics {
        self.metrics.clone()
    }

    pub fn is_paused(&self) -> bool {
        match self.paused_until_ms {
            Some(until) => now_ms() < until,
            None => false,
        }
    }

    pub fn unpause(&mut self) {
        self.paused_until_ms = None;
    }

    pub fn is_trading_allowed(&self) -> TradingAllowed {
        if let Some(until) = self.paused_until_ms {
            let now = now_ms();
            if now < until {
                let remaining_s = (until - now) / 1000;
                return TradingAllowed {
                    allowed: false,
                    reason: Some(format!("paused, {}s remaining", remaining_s)),
                };
            }
        }

        if self.metrics.total_trades < 10 {
            return TradingAllowed { allowed: true, reason: None };
        }

        if self.metrics.ev_cents < self.min_ev_cents {
            return TradingAllowed {
                allowed: false,
                reason: Some(format!("ev_cents {:.2} below floor {:.2}", self.metrics.ev_cents, self.min_ev_cents)),
            };
        }
        if self.metrics.profit_factor < self.min_profit_factor {
            return TradingAllowed {
                allowed: false,
                reason: Some(format!(
                    "profit_factor {:.2} below floor {:.2}",
                    self.metrics.profit_factor, self.min_profit_factor
                )),
            };
        }

        TradingAllowed { allowed: true, reason: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn cfg() -> Config {
        std::env::set_var("MIN_ENTRY_PRICE_CENTS", "30");
        std::env::set_var("MAX_ENTRY_PRICE_CENTS", "82");
        Config::from_env().unwrap()
    }

    fn result(pnl_cents: f64) -> TradeResult {
        TradeResult {
            token_id: "tok1".into(),
            side: Side::Long,
            entry_cents: 46,
            exit_cents: (46.0 + pnl_cents) as i32,
            size_usd: 10.0,
            pnl_cents,
            pnl_usd: pnl_cents / 100.0 * 10.0,
            is_win: pnl_cents > 0.0,
            timestamp_ms: now_ms(),
        }
    }

    #[test]
    fn ev_pause_scenario() {
        let mut cfg = cfg();
        cfg.churn_cost_cents = 2.0;
        cfg.min_ev_cents = 0.5;
        cfg.min_profit_factor = 1.05;
        cfg.pause_seconds = 5;
        let mut tracker = EvTracker::new(&cfg);

        for i in 0..10 {
            let pnl = if i % 2 == 0 { 10.0 } else { -10.0 };
            tracker.record_trade(result(pnl));
        }

        let metrics = tracker.get_metrics();
        assert!((metrics.ev_cents - (-2.0)).abs() < 1e-9);
        assert!((metrics.profit_factor - 1.0).abs() < 1e-9);
        assert!(tracker.is_paused());
        assert!(!tracker.is_trading_allowed().allowed);
    }

    #[test]
    fn warmup_allows_trading_before_ten_results() {
        let cfg = cfg();
        let mut tracker = EvTracker::new(&cfg);
        for _ in 0..5 {
            tracker.record_trade(result(-50.0));
        }
        assert!(tracker.is_trading_allowed().allowed);
    }

    #[test]
    fn rolling_window_law_depends_only_on_last_n() {
        let mut cfg = cfg();
        cfg.ev_window_size = 5;
        let mut tracker = EvTracker::new(&cfg);
        for _ in 0..20 {
            tracker.record_trade(result(-10.0));
        }
        for _ in 0..5 {
            tracker.record_trade(result(10.0));
        }
        let metrics = tracker.get_metrics();
        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.wins, 5);
        assert_eq!(metrics.losses, 0);
    }
}
