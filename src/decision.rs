//! Decision engine: pure entry/exit/hedge-sizing rules over in-memory state.
//!
//! No I/O happens here — every input is already resolved (bias, book state,
//! activity, EV metrics) by the caller. Each evaluation returns a tagged
//! result so the caller can distinguish transient from permanent rejections.

use crate::config::Config;
use crate::models::{
    BiasDirection, ExitReason, ManagedPosition, MarketActivity, OrderbookState, Side,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCheck {
    Bias,
    Liquidity,
    PriceDeviation,
    PriceBounds,
    RiskLimits,
    EvAllowed,
}

#[derive(Debug, Clone)]
pub struct EntryCheckResult {
    pub check: EntryCheck,
    pub passed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntryDecision {
    pub allowed: bool,
    pub side: Option<Side>,
    pub price_cents: Option<i32>,
    pub size_usd: Option<f64>,
    pub checks: Vec<EntryCheckResult>,
    pub score: Option<u32>,
}

pub struct EntryInputs<'a> {
    pub bias_direction: BiasDirection,
    pub book: &'a OrderbookState,
    pub activity: &'a MarketActivity,
    pub reference_price_cents: i32,
    pub ev_allowed: bool,
    pub open_positions_total: usize,
    pub open_positions_for_token: usize,
    pub effective_bankroll: f64,
    pub total_deployed_usd: f64,
}

pub struct DecisionEngine {
    min_spread_cents: i32,
    min_depth_usd_at_exit: f64,
    min_trades_in_window: u32,
    min_book_updates_in_window: u32,
    entry_band_cents: i32,
    min_entry_price_cents: i32,
    max_entry_price_cents: i32,
    max_open_positions_total: usize,
    max_open_positions_per_market: usize,
    max_deployed_fraction_total: f64,
    trade_fraction: f64,
    max_trade_usd: f64,
    tp_cents: i32,
    max_adverse_cents: i32,
    max_hold_seconds: i64,
    hedge_trigger_cents: i32,
    hedge_ratio: f64,
    max_hedge_ratio: f64,
}

impl DecisionEngine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            min_spread_cents: cfg.min_spread_cents,
            min_depth_usd_at_exit: cfg.min_depth_usd_at_exit,
            min_trades_in_window: cfg.min_trades_in_window,
            min_book_updates_in_window: cfg.min_book_updates_in_window,
            entry_band_cents: cfg.entry_band_cents,
            min_entry_price_cents: cfg.min_entry_price_cents,
            max_entry_price_cents: cfg.max_entry_price_cents,
            max_open_positions_total: cfg.max_open_positions_total,
            max_open_positions_per_market: cfg.max_open_positions_per_market,
            max_deployed_fraction_total: cfg.max_deployed_fraction_total,
            trade_fraction: cfg.trade_fraction,
            max_trade_usd: cfg.max_trade_usd,
            tp_cents: cfg.tp_cents,
            max_adverse_cents: cfg.max_adverse_cents,
            max_hold_seconds: cfg.max_hold_seconds,
            hedge_trigger_cents: cfg.hedge_trigger_cents,
            hedge_ratio: cfg.hedge_ratio,
            max_hedge_ratio: cfg.max_hedge_ratio,
        }
    }

    pub fn evaluate_entry(&self, inputs: EntryInputs) -> EntryDecision {
        let mut checks = Vec::with_capacity(6);

        let bias_ok = inputs.bias_direction == BiasDirection::Long;
        checks.push(EntryCheckResult {
            check: EntryCheck::Bias,
            passed: bias_ok,
            reason: (!bias_ok).then(|| "bias is not LONG".to_string()),
        });

        let spread_ok = inputs.book.spread_cents <= self.min_spread_cents;
        let min_depth = inputs.book.bid_depth_usd.min(inputs.book.ask_depth_usd);
        let depth_ok = min_depth >= self.min_depth_usd_at_exit;
        let activity_ok = inputs.activity.trades_in_window >= self.min_trades_in_window
            || inputs.activity.book_updates_in_window >= self.min_book_updates_in_window;
        let liquidity_ok = spread_ok && depth_ok && activity_ok;
        checks.push(EntryCheckResult {
            check: EntryCheck::Liquidity,
            passed: liquidity_ok,
            reason: (!liquidity_ok).then(|| {
                format!(
                    "spread_ok={spread_ok} depth_ok={depth_ok} (min_depth={min_depth:.2}) activity_ok={activity_ok}"
                )
            }),
        });

        let deviation = (inputs.book.mid_price_cents - inputs.reference_price_cents).abs();
        let deviation_ok = deviation >= self.entry_band_cents;
        checks.push(EntryCheckResult {
            check: EntryCheck::PriceDeviation,
            passed: deviation_ok,
            reason: (!deviation_ok).then(|| format!("deviation {deviation} < band {}", self.entry_band_cents)),
        });

        let prospective_price_cents = inputs.book.best_ask_cents;
        let bounds_ok = prospective_price_cents >= self.min_entry_price_cents
            && prospective_price_cents <= self.max_entry_price_cents;
        checks.push(EntryCheckResult {
            check: EntryCheck::PriceBounds,
            passed: bounds_ok,
            reason: (!bounds_ok).then(|| format!("price {prospective_price_cents} outside bounds")),
        });

        let under_total_cap = inputs.open_positions_total < self.max_open_positions_total;
        let under_market_cap = inputs.open_positions_for_token < self.max_open_positions_per_market;
        let under_deployed_cap =
            inputs.total_deployed_usd < inputs.effective_bankroll * self.max_deployed_fraction_total;
        let bankroll_positive = inputs.effective_bankroll > 0.0;
        let risk_ok = under_total_cap && under_market_cap && under_deployed_cap && bankroll_positive;
        checks.push(EntryCheckResult {
            check: EntryCheck::RiskLimits,
            passed: risk_ok,
            reason: (!risk_ok).then(|| {
                format!(
                    "total_cap={under_total_cap} market_cap={under_market_cap} deployed_cap={under_deployed_cap} bankroll_positive={bankroll_positive}"
                )
            }),
        });

        checks.push(EntryCheckResult {
            check: EntryCheck::EvAllowed,
            passed: inputs.ev_allowed,
            reason: (!inputs.ev_allowed).then(|| "EV tracker disallows trading".to_string()),
        });

        let allowed = checks.iter().all(|c| c.passed);

        if !allowed {
            return EntryDecision { allowed: false, side: None, price_cents: None, size_usd: None, checks, score: None };
        }

        let size_usd = (inputs.effective_bankroll * self.trade_fraction).min(self.max_trade_usd);
        let score = self.entry_score(inputs.book, inputs.activity, deviation);

        EntryDecision {
            allowed: true,
            side: Some(Side::Long),
            price_cents: Some(inputs.book.best_ask_cents),
            size_usd: Some(size_usd),
            checks,
            score: Some(score),
        }
    }

    /// Advisory score in [0,100] for ranking multiple eligible candidates.
    fn entry_score(&self, book: &OrderbookState, activity: &MarketActivity, deviation: i32) -> u32 {
        let zone_center = (self.min_entry_price_cents + self.max_entry_price_cents) / 2;
        let zone_half_width = ((self.max_entry_price_cents - self.min_entry_price_cents) / 2).max(1);
        let closeness = 1.0 - ((book.mid_price_cents - zone_center).abs() as f64 / zone_half_width as f64).min(1.0);
        let closeness_pts = (closeness * 30.0).max(0.0);

        let tightness = if self.min_spread_cents > 0 {
            1.0 - (book.spread_cents as f64 / self.min_spread_cents as f64).min(1.0)
        } else {
            1.0
        };
        let tightness_pts = (tightness * 25.0).max(0.0);

        let min_depth = book.bid_depth_usd.min(book.ask_depth_usd);
        let depth_ratio = if self.min_depth_usd_at_exit > 0.0 {
            (min_depth / self.min_depth_usd_at_exit).min(2.0) / 2.0
        } else {
            1.0
        };
        let depth_pts = (depth_ratio * 25.0).max(0.0);

        let activity_norm = (activity.trades_in_window as f64 / (self.min_trades_in_window.max(1) as f64)).min(1.0);
        let activity_pts = (activity_norm * 20.0).max(0.0);

        let _ = deviation;
        (closeness_pts + tightness_pts + depth_pts + activity_pts).round() as u32
    }

    /// Returns the first matching exit reason, in spec-mandated priority order.
    pub fn evaluate_exit(
        &self,
        position: &ManagedPosition,
        current_price_cents: i32,
        bias_direction: BiasDirection,
        ev_allowed: bool,
    ) -> Option<(ExitReason, Urgency)> {
        let pnl_cents = match position.side {
            Side::Long => (current_price_cents - position.entry_price_cents) as f64,
            Side::Short => (position.entry_price_cents - current_price_cents) as f64,
        };

        if pnl_cents >= self.tp_cents as f64 {
            return Some((ExitReason::TakeProfit, Urgency::Medium));
        }
        if pnl_cents <= -(self.max_adverse_cents as f64) {
            return Some((ExitReason::HardExit, Urgency::Critical));
        }

        let hold_seconds = (crate::models::now_ms() - position.entry_time_ms) / 1000;
        if hold_seconds >= self.max_hold_seconds {
            let urgency = if pnl_cents > 0.0 { Urgency::Low } else { Urgency::Medium };
            return Some((ExitReason::TimeStop, urgency));
        }

        let position_is_long = matches!(position.side, Side::Long);
        let bias_opposes = match (position_is_long, bias_direction) {
            (true, BiasDirection::None) => true,
            _ => false,
        };
        if bias_opposes && pnl_cents > -(self.hedge_trigger_cents as f64) {
            return Some((ExitReason::BiasFlip, Urgency::Low));
        }

        if !ev_allowed && pnl_cents > 0.0 {
            return Some((ExitReason::EvDegraded, Urgency::Low));
        }

        None
    }

    pub fn hedge_size_usd(&self, entry_size_usd: f64, total_hedge_ratio: f64) -> f64 {
        let hedge_room = self.max_hedge_ratio - total_hedge_ratio;
        if hedge_room <= 0.0 {
            return 0.0;
        }
        let effective = self.hedge_ratio.min(hedge_room);
        entry_size_usd * effective
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Medium,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookSource;

    fn cfg() -> Config {
        std::env::set_var("MIN_ENTRY_PRICE_CENTS", "30");
        std::env::set_var("MAX_ENTRY_PRICE_CENTS", "82");
        std::env::set_var("ENTRY_BAND_CENTS", "4");
        std::env::set_var("TRADE_FRACTION", "0.01");
        std::env::set_var("MAX_TRADE_USD", "25");
        std::env::set_var("MIN_SPREAD_CENTS", "3");
        std::env::set_var("MIN_DEPTH_USD_AT_EXIT", "50");
        let c = Config::from_env().unwrap();
        c
    }

    fn book(bid: i32, ask: i32) -> OrderbookState {
        OrderbookState {
            best_bid_cents: bid,
            best_ask_cents: ask,
            bid_depth_usd: 100.0,
            ask_depth_usd: 100.0,
            spread_cents: ask - bid,
            mid_price_cents: (bid + ask) / 2,
            source: BookSource::Ws,
        }
    }

    #[test]
    fn happy_entry_scenario() {
        let cfg = cfg();
        let de = DecisionEngine::new(&cfg);
        let activity = MarketActivity { trades_in_window: 1, book_updates_in_window: 5, last_trade_time_ms: 0, last_update_time_ms: 0 };
        let b = book(45, 46);

        let decision = de.evaluate_entry(EntryInputs {
            bias_direction: BiasDirection::Long,
            book: &b,
            activity: &activity,
            reference_price_cents: 50,
            ev_allowed: true,
            open_positions_total: 0,
            open_positions_for_token: 0,
            effective_bankroll: 1000.0,
            total_deployed_usd: 0.0,
        });

        assert!(decision.allowed);
        assert_eq!(decision.side, Some(Side::Long));
        assert_eq!(decision.price_cents, Some(46));
        assert_eq!(decision.size_usd, Some(10.0));
    }

    #[test]
    fn any_failed_check_blocks_entry() {
        let cfg = cfg();
        let de = DecisionEngine::new(&cfg);
        let activity = MarketActivity { trades_in_window: 1, book_updates_in_window: 5, last_trade_time_ms: 0, last_update_time_ms: 0 };
        let b = book(45, 46);

        let decision = de.evaluate_entry(EntryInputs {
            bias_direction: BiasDirection::None,
            book: &b,
            activity: &activity,
            reference_price_cents: 50,
            ev_allowed: true,
            open_positions_total: 0,
            open_positions_for_token: 0,
            effective_bankroll: 1000.0,
            total_deployed_usd: 0.0,
        });
        assert!(!decision.allowed);
    }

    #[test]
    fn hedge_room_caps_size() {
        let cfg = cfg();
        let de = DecisionEngine::new(&cfg);
        assert!((de.hedge_size_usd(10.0, 0.0) - 4.0).abs() < 1e-9);
        assert_eq!(de.hedge_size_usd(10.0, 0.6), 0.0);
    }
}
