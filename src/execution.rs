//! Execution Engine: places entries, hedges, and exits against an
//! `ExecutionAdapter`, and classifies outcomes for the cooldown manager.
//!
//! Mirrors this codebase's paper-ledger/adapter pairing: the engine never
//! branches on which adapter is active, and every outbound call funnels
//! through `smart_sell` for exits so slippage tolerance always matches exit
//! urgency.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::cooldown::{CooldownManager, FailureReason};
use crate::decision::EntryDecision;
use crate::exchange::{ExecutionAdapter, OrderRequest, OrderSide, TimeInForce};
use crate::market_data::BookFailure;
use crate::models::{
    now_ms, DecisionSnapshot, ExitReason, HedgeLeg, ManagedPosition, MarketId, Side, TokenId,
    TradeResult,
};
use crate::position::{OpenParams, PositionManager, PriceAction};

#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Placed(ManagedPosition),
    Rejected(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum ExitOutcome {
    Closed(TradeResult),
    Hedged,
    NoAction,
    /// A hedge order was attempted (room existed, size was positive) and the
    /// adapter rejected or errored on it — distinct from `ExitFailed` so the
    /// caller can feed the dynamic reserve manager's missed-hedge signal.
    HedgeFailed(String),
    ExitFailed(String),
}

pub struct ExecutionEngine {
    adapter: Arc<dyn ExecutionAdapter>,
    cooldown_seconds_per_token: i64,
    entry_cooldowns: HashMap<TokenId, i64>,
}

impl ExecutionEngine {
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, cfg: &Config) -> Self {
        Self {
            adapter,
            cooldown_seconds_per_token: cfg.cooldown_seconds_per_token as i64,
            entry_cooldowns: HashMap::new(),
        }
    }

    pub fn is_on_entry_cooldown(&self, token_id: &str) -> bool {
        self.entry_cooldowns.get(token_id).is_some_and(|&until| now_ms() < until)
    }

    /// Places an already-approved entry decision and opens the resulting
    /// position. Failures are returned uncategorized for market-data
    /// failures (those are classified upstream by the Facade) but any I/O
    /// failure here is reported so the caller can record a short cooldown.
    pub async fn process_entry(
        &mut self,
        token_id: &TokenId,
        market_id: Option<MarketId>,
        decision: EntryDecision,
        position_mgr: &mut PositionManager,
    ) -> EntryOutcome {
        if !decision.allowed {
            let reason = decision
                .checks
                .iter()
                .find(|c| !c.passed)
                .and_then(|c| c.reason.clone())
                .unwrap_or_else(|| "entry checks failed".to_string());
            return EntryOutcome::Rejected(reason);
        }

        let (Some(side), Some(price_cents), Some(size_usd)) =
            (decision.side, decision.price_cents, decision.size_usd)
        else {
            return EntryOutcome::Rejected("incomplete entry decision".to_string());
        };

        let req = OrderRequest {
            client_order_id: uuid::Uuid::new_v4().to_string(),
            token_id: token_id.clone(),
            side: OrderSide::Buy,
            price: price_cents as f64 / 100.0,
            notional_usdc: size_usd,
            tif: TimeInForce::Fok,
        };

        match self.adapter.place_order(req).await {
            Ok(ack) => {
                let fill_cents = (ack.filled_price * 100.0).round() as i32;
                let position = position_mgr.open_position(OpenParams {
                    token_id: token_id.clone(),
                    market_id,
                    side,
                    entry_price_cents: fill_cents,
                    entry_size_usd: ack.filled_notional_usdc,
                    reference_price_cents: price_cents,
                });

                self.entry_cooldowns.insert(token_id.clone(), now_ms() + self.cooldown_seconds_per_token * 1000);
                info!(token_id, order_id = %ack.order_id, size_usd, "entry placed");
                EntryOutcome::Placed(position)
            }
            Err(e) => {
                warn!(token_id, error = %e, "entry order failed");
                EntryOutcome::Failed(e.to_string())
            }
        }
    }

    /// Advances a single open position: hedges, exits with urgency-scaled
    /// slippage tolerance, or does nothing.
    pub async fn process_position(
        &self,
        position_id: &str,
        current_price_cents: i32,
        hedge_size_usd: f64,
        opposite_token_id: &str,
        opposite_price_cents: i32,
        exit_reason_override: Option<ExitReason>,
        position_mgr: &mut PositionManager,
        snapshot: DecisionSnapshot,
    ) -> ExitOutcome {
        let action = match position_mgr.update_price(position_id, current_price_cents) {
            Some(a) => a,
            None => return ExitOutcome::ExitFailed("position not found".to_string()),
        };

        let action = match exit_reason_override {
            Some(reason) => PriceAction::Exit(reason),
            None => action,
        };

        match action {
            PriceAction::None => ExitOutcome::NoAction,
            PriceAction::Hedge => {
                if hedge_size_usd <= 0.0 {
                    return ExitOutcome::NoAction;
                }
                let req = OrderRequest {
                    client_order_id: uuid::Uuid::new_v4().to_string(),
                    token_id: opposite_token_id.to_string(),
                    side: OrderSide::Buy,
                    price: opposite_price_cents as f64 / 100.0,
                    notional_usdc: hedge_size_usd,
                    tif: TimeInForce::Fok,
                };
                match self.adapter.place_order(req).await {
                    Ok(ack) => {
                        let leg = HedgeLeg {
                            opposite_token_id: opposite_token_id.to_string(),
                            size_usd: ack.filled_notional_usdc,
                            entry_cents: (ack.filled_price * 100.0).round() as i32,
                            entry_ts_ms: now_ms(),
                            pnl_cents: 0.0,
                        };
                        position_mgr.record_hedge(position_id, leg, snapshot);
                        ExitOutcome::Hedged
                    }
                    Err(e) => {
                        warn!(position_id, error = %e, "hedge order failed");
                        ExitOutcome::HedgeFailed(e.to_string())
                    }
                }
            }
            PriceAction::Exit(reason) => {
                self.execute_exit(position_id, reason, current_price_cents, position_mgr, snapshot).await
            }
        }
    }

    async fn execute_exit(
        &self,
        position_id: &str,
        reason: ExitReason,
        current_price_cents: i32,
        position_mgr: &mut PositionManager,
        snapshot: DecisionSnapshot,
    ) -> ExitOutcome {
        let Some(position) = position_mgr.get(position_id).cloned() else {
            return ExitOutcome::ExitFailed("position not found".to_string());
        };

        position_mgr.begin_exit(position_id, reason, snapshot.clone());

        let reference_price = current_price_cents as f64 / 100.0;
        let initial_tolerance = urgency_slippage_tolerance(reason, false);

        let mut result = self
            .adapter
            .smart_sell(&position.token_id, position.entry_size_usd, reference_price, initial_tolerance, false)
            .await;

        if let Ok(sell) = &result {
            if !sell.success && matches!(reason, ExitReason::HardExit) {
                let forced_tolerance = urgency_slippage_tolerance(reason, true);
                result = self
                    .adapter
                    .smart_sell(&position.token_id, position.entry_size_usd, reference_price, forced_tolerance, true)
                    .await;
            }
        }

        match result {
            Ok(sell) if sell.success => {
                let exit_cents = sell.avg_price.map(|p| (p * 100.0).round() as i32).unwrap_or(current_price_cents);
                let closed = position_mgr.close_position(position_id, exit_cents, snapshot).expect("position exists");
                let pnl_cents = closed.unrealized_pnl_cents;
                let trade_result = TradeResult {
                    token_id: closed.token_id.clone(),
                    side: closed.side,
                    entry_cents: closed.entry_price_cents,
                    exit_cents,
                    size_usd: closed.entry_size_usd,
                    pnl_cents,
                    pnl_usd: closed.unrealized_pnl_usd,
                    is_win: pnl_cents > 0.0,
                    timestamp_ms: now_ms(),
                };
                info!(position_id, reason = ?reason, pnl_cents, "position closed");
                ExitOutcome::Closed(trade_result)
            }
            Ok(sell) => {
                warn!(position_id, reason = ?sell.reason, "smart sell did not fill");
                ExitOutcome::ExitFailed(sell.reason.unwrap_or_else(|| "sell not filled".to_string()))
            }
            Err(e) => {
                warn!(position_id, error = %e, "smart sell errored");
                ExitOutcome::ExitFailed(e.to_string())
            }
        }
    }
}

fn urgency_slippage_tolerance(reason: ExitReason, forced: bool) -> f64 {
    match reason {
        ExitReason::TakeProfit => 0.04,
        ExitReason::HardExit if forced => 0.25,
        ExitReason::HardExit => 0.15,
        ExitReason::TimeStop | ExitReason::BiasFlip | ExitReason::EvDegraded => 0.08,
    }
}

/// Maps a sanity-gate book failure into the appropriate `CooldownManager`
/// treatment: long-schedule for market-inactive conditions, short for
/// transient I/O, or no cooldown at all for permanent market conditions.
pub fn classify_book_failure(failure: &BookFailure, token_id: &str, cooldown_mgr: &mut CooldownManager) {
    match failure {
        BookFailure::NoOrderbook => {
            cooldown_mgr.record_failure(token_id, FailureReason::NoOrderbook);
        }
        BookFailure::NotFound => {
            cooldown_mgr.record_failure(token_id, FailureReason::NotFound);
        }
        BookFailure::RateLimit => {
            cooldown_mgr.record_failure(token_id, FailureReason::RateLimit);
        }
        BookFailure::NetworkError => {
            cooldown_mgr.record_failure(token_id, FailureReason::NetworkError);
        }
        BookFailure::ParseError => {
            cooldown_mgr.record_failure(token_id, FailureReason::ParseError);
        }
        // Permanent market conditions: no cooldown, the candidate is simply skipped.
        BookFailure::InvalidPrices | BookFailure::DustBook | BookFailure::InvalidLiquidity => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::paper::{PaperExecutionAdapter, PaperExecutionConfig};
    use crate::models::BiasDirection;

    fn cfg() -> Config {
        std::env::set_var("MIN_ENTRY_PRICE_CENTS", "30");
        std::env::set_var("MAX_ENTRY_PRICE_CENTS", "82");
        Config::from_env().unwrap()
    }

    fn snap() -> DecisionSnapshot {
        DecisionSnapshot { ev_cents: 1.0, profit_factor: 1.2, bias_direction: BiasDirection::Long }
    }

    fn deterministic_adapter() -> Arc<dyn ExecutionAdapter> {
        Arc::new(PaperExecutionAdapter::new(PaperExecutionConfig {
            reject_prob: 0.0,
            partial_fill_prob: 0.0,
            base_latency_ms: 0,
            latency_jitter_ms: 0,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn rejected_decision_never_hits_the_adapter() {
        let cfg = cfg();
        let mut engine = ExecutionEngine::new(deterministic_adapter(), &cfg);
        let mut pm = PositionManager::new(&cfg);

        let decision = EntryDecision { allowed: false, side: None, price_cents: None, size_usd: None, checks: vec![], score: None };
        let outcome = engine.process_entry(&"tok1".to_string(), None, decision, &mut pm).await;
        assert!(matches!(outcome, EntryOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn placed_entry_opens_a_position_and_sets_cooldown() {
        let cfg = cfg();
        let mut engine = ExecutionEngine::new(deterministic_adapter(), &cfg);
        let mut pm = PositionManager::new(&cfg);

        let decision = EntryDecision {
            allowed: true,
            side: Some(Side::Long),
            price_cents: Some(46),
            size_usd: Some(10.0),
            checks: vec![],
            score: Some(80),
        };
        let outcome = engine.process_entry(&"tok1".to_string(), None, decision, &mut pm).await;
        assert!(matches!(outcome, EntryOutcome::Placed(_)));
        assert!(engine.is_on_entry_cooldown("tok1"));
        assert_eq!(pm.open_positions().len(), 1);
    }

    #[test]
    fn slippage_tolerance_scales_with_urgency() {
        assert_eq!(urgency_slippage_tolerance(ExitReason::TakeProfit, false), 0.04);
        assert_eq!(urgency_slippage_tolerance(ExitReason::TimeStop, false), 0.08);
        assert_eq!(urgency_slippage_tolerance(ExitReason::HardExit, false), 0.15);
        assert_eq!(urgency_slippage_tolerance(ExitReason::HardExit, true), 0.25);
    }

    #[test]
    fn book_failure_classification_only_cooldowns_market_inactive_and_transient() {
        let mut mgr = CooldownManager::new();
        classify_book_failure(&BookFailure::DustBook, "tok1", &mut mgr);
        assert!(!mgr.is_on_cooldown("tok1"));

        classify_book_failure(&BookFailure::NoOrderbook, "tok2", &mut mgr);
        assert!(mgr.is_on_cooldown("tok2"));
    }
}
