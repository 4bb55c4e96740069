//! Per-token cooldown manager.
//!
//! Long exponential backoff (`[10m, 30m, 2h, 24h]`) for market-inactive
//! failures (`NO_ORDERBOOK`, `NOT_FOUND`); a fixed short cooldown (30s) for
//! transient I/O failures that does not advance the long-schedule strike
//! count.

use std::collections::HashMap;

use crate::models::{now_ms, CooldownEntry};

const LONG_SCHEDULE_MS: [i64; 4] = [
    10 * 60 * 1000,
    30 * 60 * 1000,
    2 * 60 * 60 * 1000,
    24 * 60 * 60 * 1000,
];
const SHORT_COOLDOWN_MS: i64 = 30_000;
const GRACE_PERIOD_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NoOrderbook,
    NotFound,
    RateLimit,
    NetworkError,
    ParseError,
}

impl FailureReason {
    fn is_long_schedule(self) -> bool {
        matches!(self, FailureReason::NoOrderbook | FailureReason::NotFound)
    }

    fn label(self) -> &'static str {
        match self {
            FailureReason::NoOrderbook => "NO_ORDERBOOK",
            FailureReason::NotFound => "NOT_FOUND",
            FailureReason::RateLimit => "RATE_LIMIT",
            FailureReason::NetworkError => "NETWORK_ERROR",
            FailureReason::ParseError => "PARSE_ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CooldownStats {
    pub active: usize,
    pub resolved_later: u64,
}

pub struct CooldownManager {
    entries: HashMap<String, CooldownEntry>,
    /// Whether the previous recorded failure for a token was long-schedule,
    /// used by the strike-accumulation rule.
    prev_was_long: HashMap<String, bool>,
    resolved_later: u64,
}

impl CooldownManager {
    pub fn new() -> Self {
        Self { entries: HashMap::new(), prev_was_long: HashMap::new(), resolved_later: 0 }
    }

    pub fn is_on_cooldown(&self, token: &str) -> bool {
        match self.entries.get(token) {
            Some(entry) => now_ms() < entry.next_eligible_time_ms,
            None => false,
        }
    }

    /// Records a failure and returns the ms until the token is retry-eligible.
    pub fn record_failure(&mut self, token: &str, reason: FailureReason) -> i64 {
        let now = now_ms();

        if !reason.is_long_schedule() {
            self.entries.insert(
                token.to_string(),
                CooldownEntry {
                    strikes: 1,
                    next_eligible_time_ms: now + SHORT_COOLDOWN_MS,
                    last_reason: reason.label().to_string(),
                },
            );
            self.prev_was_long.insert(token.to_string(), false);
            return SHORT_COOLDOWN_MS;
        }

        let prev_was_long = *self.prev_was_long.get(token).unwrap_or(&false);
        let prev_strikes = self.entries.get(token).map(|e| e.strikes).unwrap_or(0);

        let new_strikes = if prev_strikes == 0 {
            1
        } else if prev_was_long || prev_strikes > 1 {
            prev_strikes + 1
        } else {
            prev_strikes
        };

        let idx = (new_strikes as usize - 1).min(LONG_SCHEDULE_MS.len() - 1);
        let cooldown_ms = LONG_SCHEDULE_MS[idx];

        self.entries.insert(
            token.to_string(),
            CooldownEntry {
                strikes: new_strikes,
                next_eligible_time_ms: now + cooldown_ms,
                last_reason: reason.label().to_string(),
            },
        );
        self.prev_was_long.insert(token.to_string(), true);
        cooldown_ms
    }

    pub fn record_success(&mut self, token: &str) {
        if self.entries.remove(token).is_some() {
            self.resolved_later += 1;
        }
        self.prev_was_long.remove(token);
    }

    pub fn get_stats(&self) -> CooldownStats {
        CooldownStats { active: self.entries.len(), resolved_later: self.resolved_later }
    }

    pub fn cleanup(&mut self) {
        let now = now_ms();
        self.entries.retain(|_, e| now - e.next_eligible_time_ms < GRACE_PERIOD_MS);
    }
}

impl Default for CooldownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_escalation_matches_schedule() {
        let mut mgr = CooldownManager::new();
        let expected = [10 * 60 * 1000, 30 * 60 * 1000, 2 * 60 * 60 * 1000, 24 * 60 * 60 * 1000];
        for exp in expected {
            let ms = mgr.record_failure("tokA", FailureReason::NoOrderbook);
            assert_eq!(ms, exp);
            assert!(mgr.is_on_cooldown("tokA"));
        }
        // A fifth consecutive failure stays capped at the 24h tier.
        let ms = mgr.record_failure("tokA", FailureReason::NoOrderbook);
        assert_eq!(ms, 24 * 60 * 60 * 1000);
    }

    #[test]
    fn success_clears_entry_and_counts_resolved() {
        let mut mgr = CooldownManager::new();
        mgr.record_failure("tokA", FailureReason::NoOrderbook);
        assert!(mgr.is_on_cooldown("tokA"));
        mgr.record_success("tokA");
        assert!(!mgr.is_on_cooldown("tokA"));
        assert_eq!(mgr.get_stats().resolved_later, 1);
    }

    #[test]
    fn transient_failures_use_fixed_short_cooldown() {
        let mut mgr = CooldownManager::new();
        let ms = mgr.record_failure("tokB", FailureReason::RateLimit);
        assert_eq!(ms, SHORT_COOLDOWN_MS);
        let ms2 = mgr.record_failure("tokB", FailureReason::NetworkError);
        assert_eq!(ms2, SHORT_COOLDOWN_MS);
    }
}
