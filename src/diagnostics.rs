//! Diagnostics / funnel counters.
//!
//! Every cycle accumulates counters here so the periodic status line can
//! summarize ingestion, eligibility, rejections, and cooldown state without
//! any component needing its own ad-hoc logging of the same facts.

use std::collections::HashMap;

use tracing::info;

use crate::bias::BiasFunnelCounters;
use crate::cooldown::CooldownStats;
use crate::models::EvMetrics;

#[derive(Debug, Clone, Default)]
pub struct Funnel {
    pub ticks: u64,
    pub eligible_biases: u64,
    pub entries_attempted: u64,
    pub entries_placed: u64,
    pub exits_attempted: u64,
    pub exits_placed: u64,
    pub hedges_placed: u64,
    pub rejections_by_reason: HashMap<String, u64>,
}

impl Funnel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rejection(&mut self, reason: &str) {
        *self.rejections_by_reason.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn log_status_summary(
        &self,
        bias: &BiasFunnelCounters,
        ev: &EvMetrics,
        cooldowns: &CooldownStats,
        wallet_tags: &HashMap<&'static str, usize>,
    ) {
        info!(
            ticks = self.ticks,
            trades_ingested = bias.trades_ingested,
            trades_filtered_by_price = bias.trades_filtered_by_price,
            trades_deduped = bias.trades_deduped,
            eligible_biases = self.eligible_biases,
            entries_attempted = self.entries_attempted,
            entries_placed = self.entries_placed,
            exits_attempted = self.exits_attempted,
            exits_placed = self.exits_placed,
            hedges_placed = self.hedges_placed,
            ev_total_trades = ev.total_trades,
            ev_cents = ev.ev_cents,
            profit_factor = ev.profit_factor,
            cooldowns_active = cooldowns.active,
            cooldowns_resolved_later = cooldowns.resolved_later,
            rejections = ?self.rejections_by_reason,
            classified_wallets = ?wallet_tags,
            "status summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_accumulate_by_reason() {
        let mut funnel = Funnel::new();
        funnel.record_rejection("DUST_BOOK");
        funnel.record_rejection("DUST_BOOK");
        funnel.record_rejection("COOLDOWN");
        assert_eq!(funnel.rejections_by_reason["DUST_BOOK"], 2);
        assert_eq!(funnel.rejections_by_reason["COOLDOWN"], 1);
    }
}
