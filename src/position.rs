//! Position state machine.
//!
//! Mirrors the shape of the position/exit-reason/transition-log pattern used
//! throughout this codebase's strategy position structs: a position struct
//! carrying entry terms and target prices, an ordered transition log, and a
//! small set of pure state-transition methods with no I/O inside them.

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::Config;
use crate::models::{
    now_ms, BiasDirection, DecisionSnapshot, ExitReason, HedgeLeg, ManagedPosition, MarketId,
    PositionState, Side, TokenId, TransitionRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceAction {
    None,
    Hedge,
    Exit(ExitReason),
}

pub struct OpenParams {
    pub token_id: TokenId,
    pub market_id: Option<MarketId>,
    pub side: Side,
    pub entry_price_cents: i32,
    pub entry_size_usd: f64,
    pub reference_price_cents: i32,
}

pub struct PositionManager {
    tp_cents: i32,
    hedge_trigger_cents: i32,
    max_adverse_cents: i32,
    max_hold_seconds: i64,
    hedge_ratio: f64,
    max_hedge_ratio: f64,

    positions: HashMap<String, ManagedPosition>,
}

impl PositionManager {
    pub fn new(cfg: &Config) -> Self {
        Self {
            tp_cents: cfg.tp_cents,
            hedge_trigger_cents: cfg.hedge_trigger_cents,
            max_adverse_cents: cfg.max_adverse_cents,
            max_hold_seconds: cfg.max_hold_seconds,
            hedge_ratio: cfg.hedge_ratio,
            max_hedge_ratio: cfg.max_hedge_ratio,
            positions: HashMap::new(),
        }
    }

    pub fn open_position(&mut self, params: OpenParams) -> ManagedPosition {
        let (tp, hedge_trigger, hard_exit) = match params.side {
            Side::Long => (
                params.entry_price_cents + self.tp_cents,
                params.entry_price_cents - self.hedge_trigger_cents,
                params.entry_price_cents - self.max_adverse_cents,
            ),
            Side::Short => (
                params.entry_price_cents - self.tp_cents,
                params.entry_price_cents + self.hedge_trigger_cents,
                params.entry_price_cents + self.max_adverse_cents,
            ),
        };

        let position = ManagedPosition {
            id: Uuid::new_v4().to_string(),
            token_id: params.token_id,
            market_id: params.market_id,
            side: params.side,
            state: PositionState::Open,
            entry_price_cents: params.entry_price_cents,
            entry_size_usd: params.entry_size_usd,
            entry_time_ms: now_ms(),
            current_price_cents: params.entry_price_cents,
            unrealized_pnl_cents: 0.0,
            unrealized_pnl_usd: 0.0,
            tp_cents: tp,
            hedge_trigger_cents: hedge_trigger,
            hard_exit_cents: hard_exit,
            hedges: Vec::new(),
            total_hedge_ratio: 0.0,
            reference_price_cents: params.reference_price_cents,
            transitions: Vec::new(),
        };

        self.positions.insert(position.id.clone(), position.clone());
        position
    }

    fn unrealized_pnl_cents(pos: &ManagedPosition, current_cents: i32) -> f64 {
        match pos.side {
            Side::Long => (current_cents - pos.entry_price_cents) as f64,
            Side::Short => (pos.entry_price_cents - current_cents) as f64,
        }
    }

    /// Updates the position's live price and returns the action the caller
    /// (Execution Engine) should take, in priority order: TAKE_PROFIT, then
    /// HARD_EXIT, then TIME_STOP, then HEDGE, else NONE.
    pub fn update_price(&mut self, id: &str, price_cents: i32) -> Option<PriceAction> {
        let pos = self.positions.get_mut(id)?;
        if pos.state == PositionState::Closed {
            return Some(PriceAction::None);
        }

        pos.current_price_cents = price_cents;
        let pnl_cents = Self::unrealized_pnl_cents(pos, price_cents);
        pos.unrealized_pnl_cents = pnl_cents;
        pos.unrealized_pnl_usd = pnl_cents / 100.0 * pos.shares();

        let hit_tp = match pos.side {
            Side::Long => price_cents >= pos.tp_cents,
            Side::Short => price_cents <= pos.tp_cents,
        };
        if hit_tp {
            return Some(PriceAction::Exit(ExitReason::TakeProfit));
        }

        let hit_hard_exit = match pos.side {
            Side::Long => price_cents <= pos.hard_exit_cents,
            Side::Short => price_cents >= pos.hard_exit_cents,
        };
        if hit_hard_exit {
            return Some(PriceAction::Exit(ExitReason::HardExit));
        }

        if now_ms() - pos.entry_time_ms >= self.max_hold_seconds * 1000 {
            return Some(PriceAction::Exit(ExitReason::TimeStop));
        }

        let adverse = -pnl_cents;
        let hedge_room = self.max_hedge_ratio - pos.total_hedge_ratio;
        if pos.state == PositionState::Open && hedge_room > 0.0 && adverse >= self.hedge_trigger_cents as f64 {
            return Some(PriceAction::Hedge);
        }

        Some(PriceAction::None)
    }

    pub fn record_hedge(&mut self, id: &str, leg: HedgeLeg, snapshot: DecisionSnapshot) {
        let Some(pos) = self.positions.get_mut(id) else { return };
        pos.total_hedge_ratio = (pos.total_hedge_ratio + self.hedge_ratio).min(self.max_hedge_ratio);
        pos.hedges.push(leg);

        if pos.state == PositionState::Open {
            let from = pos.state;
            pos.state = PositionState::Hedged;
            pos.transitions.push(TransitionRecord {
                from,
                to: PositionState::Hedged,
                reason: "HEDGE".to_string(),
                ts_ms: now_ms(),
                pnl_cents: pos.unrealized_pnl_cents,
                snapshot,
            });
        }
    }

    pub fn begin_exit(&mut self, id: &str, reason: ExitReason, snapshot: DecisionSnapshot) {
        let Some(pos) = self.positions.get_mut(id) else { return };
        if pos.state == PositionState::Exiting || pos.state == PositionState::Closed {
            return;
        }
        let from = pos.state;
        pos.state = PositionState::Exiting;
        pos.transitions.push(TransitionRecord {
            from,
            to: PositionState::Exiting,
            reason: format!("{:?}", reason),
            ts_ms: now_ms(),
            pnl_cents: pos.unrealized_pnl_cents,
            snapshot,
        });
    }

    pub fn close_position(
        &mut self,
        id: &str,
        exit_cents: i32,
        snapshot: DecisionSnapshot,
    ) -> Option<ManagedPosition> {
        let pos = self.positions.get_mut(id)?;
        let from = pos.state;
        pos.current_price_cents = exit_cents;
        let pnl_cents = Self::unrealized_pnl_cents(pos, exit_cents);
        pos.unrealized_pnl_cents = pnl_cents;
        pos.unrealized_pnl_usd = pnl_cents / 100.0 * pos.shares();
        pos.state = PositionState::Closed;
        pos.transitions.push(TransitionRecord {
            from,
            to: PositionState::Closed,
            reason: "CLOSE".to_string(),
            ts_ms: now_ms(),
            pnl_cents,
            snapshot,
        });
        Some(pos.clone())
    }

    pub fn get(&self, id: &str) -> Option<&ManagedPosition> {
        self.positions.get(id)
    }

    pub fn open_positions(&self) -> Vec<&ManagedPosition> {
        self.positions.values().filter(|p| p.state != PositionState::Closed).collect()
    }

    pub fn open_positions_for_token(&self, token_id: &str) -> usize {
        self.positions
            .values()
            .filter(|p| p.state != PositionState::Closed && p.token_id == token_id)
            .count()
    }

    pub fn total_deployed_usd(&self) -> f64 {
        self.open_positions().iter().map(|p| p.entry_size_usd).sum()
    }

    pub fn prune_closed_positions(&mut self, max_age_ms: i64) {
        let now = now_ms();
        self.positions.retain(|_, p| {
            if p.state != PositionState::Closed {
                return true;
            }
            let closed_at = p.transitions.last().map(|t| t.ts_ms).unwrap_or(p.entry_time_ms);
            now - closed_at < max_age_ms
        });
    }
}

pub fn snapshot(ev_cents: f64, profit_factor: f64, bias_direction: BiasDirection) -> DecisionSnapshot {
    DecisionSnapshot { ev_cents, profit_factor, bias_direction }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        std::env::set_var("MIN_ENTRY_PRICE_CENTS", "30");
        std::env::set_var("MAX_ENTRY_PRICE_CENTS", "82");
        std::env::set_var("TP_CENTS", "14");
        std::env::set_var("HEDGE_TRIGGER_CENTS", "16");
        std::env::set_var("MAX_ADVERSE_CENTS", "30");
        let c = Config::from_env().unwrap();
        std::env::remove_var("TP_CENTS");
        std::env::remove_var("HEDGE_TRIGGER_CENTS");
        std::env::remove_var("MAX_ADVERSE_CENTS");
        c
    }

    fn snap() -> DecisionSnapshot {
        snapshot(1.0, 1.2, BiasDirection::Long)
    }

    #[test]
    fn open_position_has_zero_pnl_at_entry() {
        let cfg = cfg();
        let mut pm = PositionManager::new(&cfg);
        let pos = pm.open_position(OpenParams {
            token_id: "tok1".into(),
            market_id: None,
            side: Side::Long,
            entry_price_cents: 46,
            entry_size_usd: 10.0,
            reference_price_cents: 50,
        });
        assert_eq!(pos.tp_cents, 60);
        assert_eq!(pos.hedge_trigger_cents, 30);
        assert_eq!(pos.hard_exit_cents, 16);

        let action = pm.update_price(&pos.id, 46).unwrap();
        assert_eq!(action, PriceAction::None);
        assert_eq!(pm.get(&pos.id).unwrap().unrealized_pnl_cents, 0.0);
    }

    #[test]
    fn take_profit_boundary() {
        let cfg = cfg();
        let mut pm = PositionManager::new(&cfg);
        let pos = pm.open_position(OpenParams {
            token_id: "tok1".into(),
            market_id: None,
            side: Side::Long,
            entry_price_cents: 46,
            entry_size_usd: 10.0,
            reference_price_cents: 50,
        });

        assert_eq!(pm.update_price(&pos.id, 59).unwrap(), PriceAction::None);
        assert_eq!(
            pm.update_price(&pos.id, 60).unwrap(),
            PriceAction::Exit(ExitReason::TakeProfit)
        );
    }

    #[test]
    fn hard_exit_at_max_adverse() {
        let cfg = cfg();
        let mut pm = PositionManager::new(&cfg);
        let pos = pm.open_position(OpenParams {
            token_id: "tok1".into(),
            market_id: None,
            side: Side::Long,
            entry_price_cents: 46,
            entry_size_usd: 10.0,
            reference_price_cents: 50,
        });
        assert_eq!(
            pm.update_price(&pos.id, 16).unwrap(),
            PriceAction::Exit(ExitReason::HardExit)
        );
    }

    #[test]
    fn hedge_then_hard_exit_scenario() {
        let cfg = cfg();
        let mut pm = PositionManager::new(&cfg);
        let pos = pm.open_position(OpenParams {
            token_id: "tok1".into(),
            market_id: None,
            side: Side::Long,
            entry_price_cents: 46,
            entry_size_usd: 10.0,
            reference_price_cents: 50,
        });

        let action = pm.update_price(&pos.id, 30).unwrap();
        assert_eq!(action, PriceAction::Hedge);

        pm.record_hedge(
            &pos.id,
            HedgeLeg {
                opposite_token_id: "tok1-no".into(),
                size_usd: 4.0,
                entry_cents: 70,
                entry_ts_ms: now_ms(),
                pnl_cents: 0.0,
            },
            snap(),
        );
        assert_eq!(pm.get(&pos.id).unwrap().state, PositionState::Hedged);
        assert!((pm.get(&pos.id).unwrap().total_hedge_ratio - 0.4).abs() < 1e-9);

        let action2 = pm.update_price(&pos.id, 16).unwrap();
        assert_eq!(action2, PriceAction::Exit(ExitReason::HardExit));

        pm.begin_exit(&pos.id, ExitReason::HardExit, snap());
        let closed = pm.close_position(&pos.id, 16, snap()).unwrap();
        assert_eq!(closed.state, PositionState::Closed);
        assert_eq!(closed.unrealized_pnl_cents, -30.0);
    }

    #[test]
    fn no_new_hedge_once_ratio_saturated() {
        let mut cfg = cfg();
        cfg.hedge_ratio = 0.6;
        cfg.max_hedge_ratio = 0.6;
        let mut pm = PositionManager::new(&cfg);
        let pos = pm.open_position(OpenParams {
            token_id: "tok1".into(),
            market_id: None,
            side: Side::Long,
            entry_price_cents: 46,
            entry_size_usd: 10.0,
            reference_price_cents: 50,
        });
        pm.update_price(&pos.id, 30);
        pm.record_hedge(
            &pos.id,
            HedgeLeg {
                opposite_token_id: "tok1-no".into(),
                size_usd: 6.0,
                entry_cents: 70,
                entry_ts_ms: now_ms(),
                pnl_cents: 0.0,
            },
            snap(),
        );
        assert_eq!(pm.get(&pos.id).unwrap().total_hedge_ratio, 0.6);
        let action = pm.update_price(&pos.id, 25).unwrap();
        assert_eq!(action, PriceAction::None);
    }

    #[test]
    fn transition_log_is_monotonic_and_ends_closed() {
        let cfg = cfg();
        let mut pm = PositionManager::new(&cfg);
        let pos = pm.open_position(OpenParams {
            token_id: "tok1".into(),
            market_id: None,
            side: Side::Long,
            entry_price_cents: 46,
            entry_size_usd: 10.0,
            reference_price_cents: 50,
        });
        pm.begin_exit(&pos.id, ExitReason::TakeProfit, snap());
        let closed = pm.close_position(&pos.id, 60, snap()).unwrap();

        assert_eq!(closed.transitions.first().unwrap().from, PositionState::Open);
        assert_eq!(closed.transitions.last().unwrap().to, PositionState::Closed);
        for t in &closed.transitions {
            assert_ne!(t.from, t.to);
        }
    }
}
