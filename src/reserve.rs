//! Dynamic reserve / bankroll manager.
//!
//! Smooths an adapted reserve fraction toward a target derived from recent
//! missed-opportunity and missed-hedge counts, then exposes the effective
//! tradeable bankroll for a given balance.

use std::collections::VecDeque;

use crate::config::Config;
use crate::models::now_ms;

const MISSED_WINDOW_MS: i64 = 30 * 60 * 1000;

pub struct DynamicReserveManager {
    adapted: f64,
    base_reserve_fraction: f64,
    max_reserve_fraction: f64,
    adaptation_rate: f64,
    reserve_floor_usd: f64,

    missed_opportunities_ms: VecDeque<i64>,
    missed_hedges_ms: VecDeque<i64>,
}

impl DynamicReserveManager {
    pub fn new(cfg: &Config) -> Self {
        Self {
            adapted: cfg.base_reserve_fraction,
            base_reserve_fraction: cfg.base_reserve_fraction,
            max_reserve_fraction: cfg.max_reserve_fraction,
            adaptation_rate: cfg.reserve_adaptation_rate,
            reserve_floor_usd: cfg.reserve_floor_usd,
            missed_opportunities_ms: VecDeque::new(),
            missed_hedges_ms: VecDeque::new(),
        }
    }

    pub fn record_missed_opportunity(&mut self) {
        self.missed_opportunities_ms.push_back(now_ms());
    }

    pub fn record_missed_hedge(&mut self) {
        self.missed_hedges_ms.push_back(now_ms());
    }

    fn prune(queue: &mut VecDeque<i64>, now: i64) {
        while let Some(&front) = queue.front() {
            if now - front > MISSED_WINDOW_MS {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    /// Recomputes the adapted fraction, smoothed toward the target.
    pub fn update(&mut self) {
        let now = now_ms();
        Self::prune(&mut self.missed_opportunities_ms, now);
        Self::prune(&mut self.missed_hedges_ms, now);

        let missed_factor = (0.02 * self.missed_opportunities_ms.len() as f64).min(0.15);
        let hedge_factor = (0.03 * self.missed_hedges_ms.len() as f64).min(0.10);

        let target = (self.base_reserve_fraction - missed_factor + hedge_factor)
            .clamp(0.1, self.max_reserve_fraction);

        self.adapted += (target - self.adapted) * self.adaptation_rate;
        self.adapted = self.adapted.clamp(0.1, self.max_reserve_fraction);
    }

    pub fn adapted_fraction(&self) -> f64 {
        self.adapted
    }

    /// Returns `(effective_bankroll, reserve_usd)` for the given balance.
    pub fn get_effective_bankroll(&self, balance: f64) -> (f64, f64) {
        let reserve_usd = (balance * self.adapted).max(self.reserve_floor_usd);
        ((balance - reserve_usd).max(0.0), reserve_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        std::env::set_var("MIN_ENTRY_PRICE_CENTS", "30");
        std::env::set_var("MAX_ENTRY_PRICE_CENTS", "82");
        std::env::set_var("BASE_RESERVE_FRACTION", "0.2");
        std::env::set_var("MAX_RESERVE_FRACTION", "0.5");
        std::env::set_var("RESERVE_ADAPTATION_RATE", "1.0");
        std::env::set_var("RESERVE_FLOOR_USD", "50");
        Config::from_env().unwrap()
    }

    #[test]
    fn effective_bankroll_respects_floor() {
        let cfg = cfg();
        let mgr = DynamicReserveManager::new(&cfg);
        let (effective, reserve) = mgr.get_effective_bankroll(100.0);
        assert_eq!(reserve, 50.0);
        assert_eq!(effective, 50.0);
    }

    #[test]
    fn missed_opportunities_push_reserve_down() {
        let cfg = cfg();
        let mut mgr = DynamicReserveManager::new(&cfg);
        for _ in 0..10 {
            mgr.record_missed_opportunity();
        }
        mgr.update();
        assert!(mgr.adapted_fraction() < cfg.base_reserve_fraction);
    }

    #[test]
    fn missed_hedges_push_reserve_up() {
        let cfg = cfg();
        let mut mgr = DynamicReserveManager::new(&cfg);
        for _ in 0..5 {
            mgr.record_missed_hedge();
        }
        mgr.update();
        assert!(mgr.adapted_fraction() > cfg.base_reserve_fraction);
    }

    #[test]
    fn adapted_fraction_stays_bounded() {
        let cfg = cfg();
        let mut mgr = DynamicReserveManager::new(&cfg);
        for _ in 0..100 {
            mgr.record_missed_opportunity();
        }
        mgr.update();
        assert!(mgr.adapted_fraction() >= 0.1);
        assert!(mgr.adapted_fraction() <= cfg.max_reserve_fraction);
    }
}
