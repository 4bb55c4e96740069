//! Shared domain types for the whale-copy daemon.
//!
//! Money is USD decimal (2dp display); prices are decimal in `[0,1]` and
//! also carried as integer cents (`0..=100`) wherever a component needs to
//! reason about discrete tick thresholds (TP/hedge/hard-stop).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TokenId = String;
pub type MarketId = String;

/// A single observed whale buy, as retained by the bias accumulator.
///
/// Only BUY rows ever reach this type — sells are filtered upstream by the
/// whale-trade collaborators (Dome, Hashdive) before `ingest_trades` sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTrade {
    pub token_id: TokenId,
    pub market_id: Option<MarketId>,
    pub wallet: String,
    pub size_usd: f64,
    pub price: Option<f64>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasDirection {
    Long,
    None,
}

/// Derived view over a token's whale flow window. Never stored directly;
/// recomputed from the retained trade window on each call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBias {
    pub token_id: TokenId,
    pub direction: BiasDirection,
    pub net_usd: f64,
    pub trade_count: u32,
    pub last_activity_ms: i64,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Hedged,
    Exiting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    HardExit,
    TimeStop,
    BiasFlip,
    EvDegraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeLeg {
    pub opposite_token_id: TokenId,
    pub size_usd: f64,
    pub entry_cents: i32,
    pub entry_ts_ms: i64,
    pub pnl_cents: f64,
}

/// A snapshot of EV/bias state captured at the moment of a position transition,
/// so the transition log is self-contained for later analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub ev_cents: f64,
    pub profit_factor: f64,
    pub bias_direction: BiasDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PositionState,
    pub to: PositionState,
    pub reason: String,
    pub ts_ms: i64,
    pub pnl_cents: f64,
    pub snapshot: DecisionSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub id: String,
    pub token_id: TokenId,
    pub market_id: Option<MarketId>,
    pub side: Side,
    pub state: PositionState,

    pub entry_price_cents: i32,
    pub entry_size_usd: f64,
    pub entry_time_ms: i64,

    pub current_price_cents: i32,
    pub unrealized_pnl_cents: f64,
    pub unrealized_pnl_usd: f64,

    pub tp_cents: i32,
    pub hedge_trigger_cents: i32,
    pub hard_exit_cents: i32,

    pub hedges: Vec<HedgeLeg>,
    pub total_hedge_ratio: f64,
    pub reference_price_cents: i32,

    pub transitions: Vec<TransitionRecord>,
}

impl ManagedPosition {
    /// Shares implied by the entry fill, used to convert per-share cent P&L
    /// into a USD amount at close.
    pub fn shares(&self) -> f64 {
        if self.entry_price_cents <= 0 {
            return 0.0;
        }
        self.entry_size_usd / (self.entry_price_cents as f64 / 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub token_id: TokenId,
    pub side: Side,
    pub entry_cents: i32,
    pub exit_cents: i32,
    pub size_usd: f64,
    pub pnl_cents: f64,
    pub pnl_usd: f64,
    pub is_win: bool,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvMetrics {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub avg_win_cents: f64,
    pub avg_loss_cents: f64,
    pub ev_cents: f64,
    pub profit_factor: f64,
    pub total_pnl_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookSource {
    Ws,
    Cache,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookState {
    pub best_bid_cents: i32,
    pub best_ask_cents: i32,
    pub bid_depth_usd: f64,
    pub ask_depth_usd: f64,
    pub spread_cents: i32,
    pub mid_price_cents: i32,
    pub source: BookSource,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MarketActivity {
    pub trades_in_window: u32,
    pub book_updates_in_window: u32,
    pub last_trade_time_ms: i64,
    pub last_update_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub strikes: u32,
    pub next_eligible_time_ms: i64,
    pub last_reason: String,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn now_dt() -> DateTime<Utc> {
    Utc::now()
}
