//! Whale bias accumulator.
//!
//! Maintains a sliding window of whale BUY trades per token and derives a
//! directional bias from them. Ingestion-time filtering (sells, malformed
//! token ids, price band, dedup) keeps the retained set small and clean;
//! derivation is a pure read over that set.

use std::collections::HashMap;

use tracing::warn;

use crate::config::{BiasMode, Config};
use crate::models::{now_ms, BiasDirection, TokenBias, TokenId, WhaleTrade};

#[derive(Debug, Clone, Copy, Default)]
pub struct BiasFunnelCounters {
    pub trades_ingested: u64,
    pub trades_filtered_by_price: u64,
    pub trades_rejected_sell: u64,
    pub trades_rejected_invalid_token: u64,
    pub trades_deduped: u64,
}

pub struct CanEnter {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

/// One retained whale BUY, keyed for dedup against (wallet, size, timestamp).
#[derive(Debug, Clone)]
struct RetainedTrade {
    wallet: String,
    size_usd: f64,
    timestamp_ms: i64,
}

pub struct BiasAccumulator {
    window_ms: i64,
    stale_ms: i64,
    mode: BiasMode,
    min_trades: u32,
    min_net_usd: f64,
    price_filter: Option<(f64, f64)>,

    /// token_id -> retained trades, newest last.
    trades: HashMap<TokenId, Vec<RetainedTrade>>,
    /// lowercase address -> whether it is a known whale (leaderboard set).
    whale_accounts: Vec<String>,
    last_leaderboard_refresh_ms: i64,
    leaderboard_refresh_throttle_ms: i64,
    fetch_count: u64,
    /// lowercase address -> diagnostics-only classification tag, surfaced in
    /// the status summary. Never consulted for bias or entry eligibility.
    wallet_tags: HashMap<String, &'static str>,

    pub funnel: BiasFunnelCounters,
}

impl BiasAccumulator {
    pub fn new(cfg: &Config) -> Self {
        Self {
            window_ms: cfg.bias_window_seconds * 1000,
            stale_ms: cfg.bias_stale_seconds * 1000,
            mode: cfg.bias_mode,
            min_trades: cfg.min_bias_trades,
            min_net_usd: cfg.min_bias_flow_usd,
            price_filter: cfg.whale_price_filter(),
            trades: HashMap::new(),
            whale_accounts: Vec::new(),
            last_leaderboard_refresh_ms: 0,
            leaderboard_refresh_throttle_ms: 3_600_000,
            fetch_count: 0,
            wallet_tags: HashMap::new(),
            funnel: BiasFunnelCounters::default(),
        }
    }

    /// Records a wallet's diagnostics-only classification tag (e.g.
    /// "ELITE"/"INSIDER"/"WHALE"/"REGULAR").
    pub fn set_wallet_tag(&mut self, wallet: &str, label: &'static str) {
        self.wallet_tags.insert(wallet.to_lowercase(), label);
    }

    /// Tag -> count of currently-known wallets carrying it, for the status summary.
    pub fn wallet_tag_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for label in self.wallet_tags.values() {
            *counts.entry(*label).or_insert(0) += 1;
        }
        counts
    }

    /// Replace the known whale set (throttled to roughly hourly by the caller
    /// checking `should_refresh_leaderboard`).
    pub fn set_whale_accounts(&mut self, accounts: Vec<String>) {
        self.whale_accounts = accounts.into_iter().map(|a| a.to_lowercase()).collect();
        self.last_leaderboard_refresh_ms = now_ms();
    }

    pub fn should_refresh_leaderboard(&self) -> bool {
        now_ms() - self.last_leaderboard_refresh_ms >= self.leaderboard_refresh_throttle_ms
    }

    /// Returns the next rotating batch of whale accounts to poll this tick,
    /// guaranteeing full coverage every `ceil(N/batch_size)` ticks.
    pub fn next_poll_batch(&mut self, batch_size: usize) -> Vec<String> {
        if self.whale_accounts.is_empty() || batch_size == 0 {
            return Vec::new();
        }
        let n = self.whale_accounts.len();
        let start = (self.fetch_count as usize * batch_size) % n;
        self.fetch_count += 1;

        let mut batch = Vec::with_capacity(batch_size.min(n));
        for i in 0..batch_size.min(n) {
            batch.push(self.whale_accounts[(start + i) % n].clone());
        }
        batch
    }

    pub fn ingest_trades(&mut self, batch: Vec<WhaleTrade>) {
        let now = now_ms();
        for trade in batch {
            self.funnel.trades_ingested += 1;

            if trade.token_id.trim().is_empty() {
                self.funnel.trades_rejected_invalid_token += 1;
                continue;
            }

            if let Some((min, max)) = self.price_filter {
                if let Some(price) = trade.price {
                    if price < min || price > max {
                        self.funnel.trades_filtered_by_price += 1;
                        continue;
                    }
                }
            }

            let entry = self.trades.entry(trade.token_id.clone()).or_default();
            let is_dup = entry.iter().any(|r| {
                r.wallet == trade.wallet
                    && (r.size_usd - trade.size_usd).abs() <= 0.01
                    && (r.timestamp_ms - trade.timestamp_ms).abs() <= 60_000
            });
            if is_dup {
                self.funnel.trades_deduped += 1;
                continue;
            }

            entry.push(RetainedTrade {
                wallet: trade.wallet,
                size_usd: trade.size_usd,
                timestamp_ms: trade.timestamp_ms,
            });
        }

        self.prune(now);
    }

    fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        self.trades.retain(|_, v| {
            v.retain(|t| t.timestamp_ms >= cutoff);
            !v.is_empty()
        });
    }

    pub fn get_bias(&self, token_id: &str) -> TokenBias {
        let now = now_ms();
        let retained = self.trades.get(token_id);

        let (net_usd, trade_count, last_activity_ms) = match retained {
            Some(v) => {
                let net_usd: f64 = v.iter().map(|t| t.size_usd).sum();
                let last = v.iter().map(|t| t.timestamp_ms).max().unwrap_or(0);
                (net_usd, v.len() as u32, last)
            }
            None => (0.0, 0, 0),
        };

        let is_stale = trade_count == 0 || now - last_activity_ms >= self.stale_ms;

        let direction = if trade_count == 0 {
            BiasDirection::None
        } else {
            match self.mode {
                BiasMode::CopyAnyWhaleBuy => {
                    if trade_count >= 1 && !is_stale {
                        BiasDirection::Long
                    } else {
                        BiasDirection::None
                    }
                }
                BiasMode::Conservative => {
                    if !is_stale && trade_count >= self.min_trades && net_usd >= self.min_net_usd {
                        BiasDirection::Long
                    } else {
                        BiasDirection::None
                    }
                }
            }
        };

        TokenBias {
            token_id: token_id.to_string(),
            direction,
            net_usd,
            trade_count,
            last_activity_ms,
            is_stale,
        }
    }

    pub fn get_active_biases(&self) -> Vec<TokenBias> {
        self.trades
            .keys()
            .map(|token_id| self.get_bias(token_id))
            .filter(|b| b.direction == BiasDirection::Long)
            .collect()
    }

    pub fn can_enter(&self, token_id: &str) -> CanEnter {
        let bias = self.get_bias(token_id);
        if bias.trade_count == 0 {
            return CanEnter { allowed: false, reason: Some("NO_WHALE_BUY_SEEN") };
        }
        if bias.is_stale {
            return CanEnter { allowed: false, reason: Some("BIAS_STALE") };
        }
        match self.mode {
            BiasMode::CopyAnyWhaleBuy => CanEnter { allowed: true, reason: None },
            BiasMode::Conservative => {
                if bias.trade_count < self.min_trades {
                    return CanEnter { allowed: false, reason: Some("BIAS_BELOW_MIN_TRADES") };
                }
                if bias.net_usd < self.min_net_usd {
                    return CanEnter { allowed: false, reason: Some("BIAS_BELOW_MIN_FLOW") };
                }
                CanEnter { allowed: true, reason: None }
            }
        }
    }
}

pub fn log_leaderboard_warning_if_inverted(min: f64, max: f64) {
    if min > max {
        warn!(min, max, "whale price filter disabled: min > max");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_copy_any() -> Config {
        let mut cfg = test_config();
        cfg.bias_mode = BiasMode::CopyAnyWhaleBuy;
        cfg
    }

    fn test_config() -> Config {
        std::env::set_var("MIN_ENTRY_PRICE_CENTS", "30");
        std::env::set_var("MAX_ENTRY_PRICE_CENTS", "82");
        Config::from_env().unwrap()
    }

    fn trade(token: &str, wallet: &str, usd: f64, ts: i64) -> WhaleTrade {
        WhaleTrade {
            token_id: token.to_string(),
            market_id: None,
            wallet: wallet.to_string(),
            size_usd: usd,
            price: Some(0.5),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn dedup_is_idempotent() {
        let cfg = cfg_copy_any();
        let mut acc = BiasAccumulator::new(&cfg);
        let now = now_ms();
        let batch = vec![trade("tok1", "0xabc", 1000.0, now)];

        acc.ingest_trades(batch.clone());
        let bias1 = acc.get_bias("tok1");
        acc.ingest_trades(batch);
        let bias2 = acc.get_bias("tok1");

        assert_eq!(bias1.net_usd, bias2.net_usd);
        assert_eq!(bias1.trade_count, bias2.trade_count);
    }

    #[test]
    fn copy_any_whale_buy_flags_long_on_one_trade() {
        let cfg = cfg_copy_any();
        let mut acc = BiasAccumulator::new(&cfg);
        acc.ingest_trades(vec![trade("tok1", "0xabc", 50.0, now_ms())]);
        let bias = acc.get_bias("tok1");
        assert_eq!(bias.direction, BiasDirection::Long);
        assert!(acc.can_enter("tok1").allowed);
    }

    #[test]
    fn conservative_mode_requires_min_trades_and_flow() {
        let mut cfg = test_config();
        cfg.bias_mode = BiasMode::Conservative;
        cfg.min_bias_trades = 2;
        cfg.min_bias_flow_usd = 500.0;
        let mut acc = BiasAccumulator::new(&cfg);

        acc.ingest_trades(vec![trade("tok1", "0xabc", 50.0, now_ms())]);
        assert!(!acc.can_enter("tok1").allowed);

        acc.ingest_trades(vec![trade("tok1", "0xdef", 600.0, now_ms())]);
        assert!(acc.can_enter("tok1").allowed);
    }

    #[test]
    fn rejects_sells_and_invalid_tokens_upstream() {
        // Bias accumulator's ingest_trades only ever receives BUYs by contract;
        // empty token ids must still be rejected defensively.
        let cfg = cfg_copy_any();
        let mut acc = BiasAccumulator::new(&cfg);
        acc.ingest_trades(vec![trade("", "0xabc", 50.0, now_ms())]);
        assert_eq!(acc.funnel.trades_rejected_invalid_token, 1);
        assert_eq!(acc.get_active_biases().len(), 0);
    }

    #[test]
    fn rotating_batch_covers_all_accounts() {
        let cfg = cfg_copy_any();
        let mut acc = BiasAccumulator::new(&cfg);
        acc.set_whale_accounts(vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            for addr in acc.next_poll_batch(2) {
                seen.insert(addr);
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn pruning_drops_entries_outside_window() {
        let mut cfg = cfg_copy_any();
        cfg.bias_window_seconds = 10;
        let mut acc = BiasAccumulator::new(&cfg);
        let old = now_ms() - 20_000;
        acc.ingest_trades(vec![trade("tok1", "0xabc", 50.0, old)]);
        let bias = acc.get_bias("tok1");
        assert_eq!(bias.trade_count, 0);
    }
}
