//! Cycle Scheduler: owns every component and drives the outer tick loop.
//!
//! Each tick: parallel refreshes (balance, whale trades), exits before
//! entries (to free exposure first), housekeeping (cooldown cleanup,
//! position pruning, status summary). Liquidation mode overrides the normal
//! entry path and sells down the book instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};

use crate::bias::BiasAccumulator;
use crate::config::{Config, LiquidationMode};
use crate::cooldown::CooldownManager;
use crate::decision::{DecisionEngine, EntryInputs};
use crate::diagnostics::Funnel;
use crate::ev_tracker::EvTracker;
use crate::exchange::ExecutionAdapter;
use crate::execution::{classify_book_failure, EntryOutcome, ExecutionEngine, ExitOutcome};
use crate::market_data::{BookFailure, MarketDataFacade, StalenessConfig};
use crate::models::{now_ms, BiasDirection, MarketActivity, OrderbookState, PositionState};
use crate::position::{snapshot, PositionManager};
use crate::reserve::DynamicReserveManager;
use crate::whale::WhaleSource;

const TOP_K_BIAS_CANDIDATES: usize = 3;
const MAX_SCANNED_CANDIDATES: usize = 2;
/// Cap on concurrent in-flight book fetches per tick, so a tick with many
/// open positions doesn't open unbounded concurrent REST/WS requests.
const MAX_CONCURRENT_BOOK_FETCHES: usize = 8;
const RECENTLY_SOLD_COOLDOWN_MS: i64 = 30_000;
const REDEMPTION_SWEEP_NORMAL_MS: i64 = 10 * 60 * 1000;
const REDEMPTION_SWEEP_LIQUIDATION_MS: i64 = 60 * 1000;
const ACTIVITY_WINDOW_MS: i64 = 60_000;
const CLOSED_POSITION_MAX_AGE_MS: i64 = 60 * 60 * 1000;

/// Per-token book-update/trade counters reset on a rolling window, since this
/// crate has no standalone activity-tracking collaborator of its own.
#[derive(Default)]
struct ActivityTracker {
    entries: HashMap<String, (MarketActivity, i64)>,
}

impl ActivityTracker {
    fn record_book_update(&mut self, token: &str) {
        let now = now_ms();
        let (activity, window_start) = self.entries.entry(token.to_string()).or_insert((MarketActivity::default(), now));
        if now - *window_start > ACTIVITY_WINDOW_MS {
            *activity = MarketActivity::default();
            *window_start = now;
        }
        activity.book_updates_in_window += 1;
        activity.last_update_time_ms = now;
    }

    fn record_trade(&mut self, token: &str) {
        let now = now_ms();
        let (activity, window_start) = self.entries.entry(token.to_string()).or_insert((MarketActivity::default(), now));
        if now - *window_start > ACTIVITY_WINDOW_MS {
            *activity = MarketActivity::default();
            *window_start = now;
        }
        activity.trades_in_window += 1;
        activity.last_trade_time_ms = now;
    }

    fn get(&self, token: &str) -> MarketActivity {
        self.entries.get(token).map(|(a, _)| *a).unwrap_or_default()
    }
}

/// Market-token-pair discovery is outside this crate's module scope (spec
/// never defines a market-registry component), so the hedge leg's opposite
/// price is approximated from the binary-outcome complement
/// (`opposite_price ~= 1 - price`) rather than fetched from a real book.
fn opposite_token_id(token_id: &str) -> String {
    format!("{token_id}#opposite")
}

pub struct Scheduler {
    cfg: Config,
    adapter: Arc<dyn ExecutionAdapter>,
    market_data: Arc<MarketDataFacade>,

    execution: ExecutionEngine,
    position_mgr: PositionManager,
    decision: DecisionEngine,
    cooldown: CooldownManager,
    bias: BiasAccumulator,
    ev_tracker: EvTracker,
    reserve: DynamicReserveManager,
    whale_source: WhaleSource,
    funnel: Funnel,
    activity: ActivityTracker,

    balance_usd: f64,
    last_balance_refresh_ms: i64,
    last_redemption_sweep_ms: i64,
    recently_sold: HashMap<String, i64>,
    shutdown: Arc<AtomicBool>,

    /// Runtime liquidation-mode state. Starts at `cfg.liquidation_mode` but,
    /// unlike `cfg` (immutable after load), this flips back to `Off` once
    /// the scheduler observes the mode's own exit condition, since the spec
    /// requires liquidation mode to auto-exit at runtime rather than stay
    /// pinned to whatever was configured at startup.
    liquidation_active: LiquidationMode,
}

impl Scheduler {
    pub fn new(cfg: Config, adapter: Arc<dyn ExecutionAdapter>, market_data: Arc<MarketDataFacade>, whale_wallets: Vec<String>) -> Self {
        let mut bias = BiasAccumulator::new(&cfg);
        bias.set_whale_accounts(whale_wallets);

        let execution = ExecutionEngine::new(adapter.clone(), &cfg);
        let position_mgr = PositionManager::new(&cfg);
        let decision = DecisionEngine::new(&cfg);
        let ev_tracker = EvTracker::new(&cfg);
        let reserve = DynamicReserveManager::new(&cfg);
        let whale_source = WhaleSource::new(cfg.dome_api_key.clone(), cfg.hashdive_api_key.clone());
        let liquidation_active = cfg.liquidation_mode;

        Self {
            cfg,
            adapter,
            market_data,
            execution,
            position_mgr,
            decision,
            cooldown: CooldownManager::new(),
            bias,
            ev_tracker,
            reserve,
            whale_source,
            funnel: Funnel::new(),
            activity: ActivityTracker::default(),
            balance_usd: 0.0,
            last_balance_refresh_ms: 0,
            last_redemption_sweep_ms: 0,
            recently_sold: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            liquidation_active,
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Drives the outer loop until the shutdown flag is set.
    pub async fn run(&mut self) {
        info!("scheduler starting");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.tick().await;

            let holding = !self.position_mgr.open_positions().is_empty();
            let interval_ms = if self.liquidation_active != LiquidationMode::Off {
                self.cfg.liquidation_poll_interval_ms
            } else if holding {
                self.cfg.position_poll_interval_ms
            } else {
                self.cfg.poll_interval_ms
            };
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        info!("scheduler shut down cleanly");
    }

    async fn tick(&mut self) {
        self.funnel.ticks += 1;
        self.refresh_balance_and_whale_trades().await;

        if self.liquidation_active != LiquidationMode::Off {
            self.run_liquidation_tick().await;
        } else {
            self.process_exits().await;
        }

        self.cooldown.cleanup();

        if self.liquidation_active == LiquidationMode::Off {
            self.process_entries().await;
        }

        self.housekeeping();
    }

    /// Balance refresh and whale-trade polling are independent I/O reads
    /// (spec §4.8 step 1, §5 "independent I/O ... runs in parallel"); they
    /// only ever touch disjoint fields (`adapter`/`last_balance_refresh_ms`
    /// vs. `whale_source`) so they can be awaited together instead of one
    /// after the other.
    async fn refresh_balance_and_whale_trades(&mut self) {
        let now = now_ms();
        let need_balance = now - self.last_balance_refresh_ms >= self.cfg.balance_refresh_interval_ms as i64;
        let adapter = self.adapter.clone();
        let balance_fut = async move {
            if need_balance {
                Some(adapter.get_balance().await)
            } else {
                None
            }
        };

        let batch = self.bias.next_poll_batch(self.cfg.whale_batch_size);
        let whale_fut = self.whale_source.poll_wallets(&batch);

        let (balance_result, poll) = tokio::join!(balance_fut, whale_fut);

        if let Some(result) = balance_result {
            match result {
                Ok(balance) => {
                    self.balance_usd = balance;
                    self.last_balance_refresh_ms = now;
                }
                Err(e) => warn!(error = %e, "balance refresh failed"),
            }
        }

        for t in &poll.trades {
            self.activity.record_trade(&t.token_id);
        }
        for (wallet, classification) in &poll.classifications {
            self.bias.set_wallet_tag(wallet, classification.label());
        }
        self.bias.ingest_trades(poll.trades);
    }

    /// Fetches order books for every given token concurrently (bounded to
    /// `MAX_CONCURRENT_BOOK_FETCHES` in flight at once), matching spec §5's
    /// "independent I/O ... runs in parallel" contract for book reads across
    /// several positions/candidates in the same tick.
    async fn fetch_books_concurrently(&self, tokens: &[String]) -> HashMap<String, Result<OrderbookState, BookFailure>> {
        let mut pending: std::collections::VecDeque<String> = tokens.iter().cloned().collect();
        let mut out = HashMap::with_capacity(tokens.len());

        // One closure invoked from both fill sites below so every pushed
        // future shares the same concrete (anonymous) type; `FuturesUnordered`
        // cannot hold futures from two textually distinct `async move` blocks.
        let fetch_one = |token: String| {
            let market_data = self.market_data.clone();
            async move {
                let result = market_data.get_orderbook_state(&token, StalenessConfig::fast15m()).await;
                (token, result)
            }
        };

        let mut in_flight = FuturesUnordered::new();
        for _ in 0..MAX_CONCURRENT_BOOK_FETCHES {
            let Some(token) = pending.pop_front() else { break };
            in_flight.push(fetch_one(token));
        }

        while let Some((token, result)) = in_flight.next().await {
            out.insert(token, result);
            if let Some(next_token) = pending.pop_front() {
                in_flight.push(fetch_one(next_token));
            }
        }

        out
    }

    fn current_snapshot(&self, bias_direction: BiasDirection) -> crate::models::DecisionSnapshot {
        let ev = self.ev_tracker.get_metrics();
        snapshot(ev.ev_cents, ev.profit_factor, bias_direction)
    }

    async fn process_exits(&mut self) {
        let positions: Vec<_> = self.position_mgr.open_positions().into_iter().cloned().collect();
        if positions.is_empty() {
            return;
        }

        let mut tokens: Vec<String> = positions.iter().map(|p| p.token_id.clone()).collect();
        tokens.sort();
        tokens.dedup();
        let books = self.fetch_books_concurrently(&tokens).await;

        for position in positions {
            let id = position.id.clone();
            self.funnel.exits_attempted += 1;

            let book = match books.get(&position.token_id) {
                Some(Ok(b)) => {
                    self.activity.record_book_update(&position.token_id);
                    b.clone()
                }
                Some(Err(failure)) => {
                    classify_book_failure(failure, &position.token_id, &mut self.cooldown);
                    self.funnel.record_rejection(failure.label());
                    continue;
                }
                None => continue,
            };

            let bias_direction = self.bias.get_bias(&position.token_id).direction;
            let ev_allowed = self.ev_tracker.is_trading_allowed().allowed;
            let exit_reason = self
                .decision
                .evaluate_exit(&position, book.mid_price_cents, bias_direction, ev_allowed)
                .map(|(reason, _urgency)| reason);

            let hedge_size = self.decision.hedge_size_usd(position.entry_size_usd, position.total_hedge_ratio);
            let opposite = opposite_token_id(&position.token_id);
            let opposite_price_cents = 100 - book.mid_price_cents;
            let snap = self.current_snapshot(bias_direction);

            let outcome = self
                .execution
                .process_position(&id, book.mid_price_cents, hedge_size, &opposite, opposite_price_cents, exit_reason, &mut self.position_mgr, snap)
                .await;

            match outcome {
                ExitOutcome::Closed(trade) => {
                    self.funnel.exits_placed += 1;
                    self.ev_tracker.record_trade(trade);
                    self.cooldown.record_success(&position.token_id);
                }
                ExitOutcome::Hedged => {
                    self.funnel.hedges_placed += 1;
                }
                ExitOutcome::NoAction => {}
                ExitOutcome::HedgeFailed(reason) => {
                    self.funnel.record_rejection(&reason);
                    self.reserve.record_missed_hedge();
                }
                ExitOutcome::ExitFailed(reason) => {
                    self.funnel.record_rejection(&reason);
                }
            }
        }
    }

    async fn process_entries(&mut self) {
        let (effective_bankroll, _reserve_usd) = self.reserve.get_effective_bankroll(self.balance_usd);

        let mut eligible: Vec<String> = self
            .bias
            .get_active_biases()
            .into_iter()
            .map(|b| b.token_id)
            .filter(|token| self.bias.can_enter(token).allowed)
            .filter(|token| !self.cooldown.is_on_cooldown(token))
            .filter(|token| !self.execution.is_on_entry_cooldown(token))
            .collect();

        self.funnel.eligible_biases += eligible.len() as u64;
        eligible.truncate(TOP_K_BIAS_CANDIDATES);

        // Candidate book fetches are independent I/O (spec §4.8 step 5 /
        // §5); fan them out together instead of one `try_enter` at a time.
        let mut candidate_books = self.fetch_books_concurrently(&eligible).await;

        let mut placed_any = false;
        for token in &eligible {
            if self.try_enter(token, &mut candidate_books, None).await {
                placed_any = true;
            }
        }

        if !placed_any && self.cfg.scanner_enabled {
            // No standalone market-discovery source is wired up yet; scanner
            // candidates are always empty until one exists.
            let scanned: Vec<String> = Vec::new();
            let mut scanned_books = self.fetch_books_concurrently(&scanned).await;
            for token in scanned.into_iter().take(MAX_SCANNED_CANDIDATES) {
                self.try_enter(&token, &mut scanned_books, None).await;
            }
        }
    }

    /// Attempts one entry using a book prefetched by `fetch_books_concurrently`.
    /// `reference_override` lets liquidation-mode callers reuse this path if
    /// ever needed (currently unused, always `None`).
    async fn try_enter(&mut self, token: &str, books: &mut HashMap<String, Result<OrderbookState, BookFailure>>, reference_override: Option<i32>) -> bool {
        self.funnel.entries_attempted += 1;

        let state = match books.remove(token) {
            Some(s) => s,
            None => self.market_data.get_orderbook_state(token, StalenessConfig::fast15m()).await,
        };
        let book = match state {
            Ok(b) => {
                self.activity.record_book_update(token);
                b
            }
            Err(failure) => {
                classify_book_failure(&failure, token, &mut self.cooldown);
                self.funnel.record_rejection(failure.label());
                return false;
            }
        };

        let bias_direction = self.bias.get_bias(token).direction;
        let ev_allowed = self.ev_tracker.is_trading_allowed().allowed;
        let reference_price_cents = reference_override.unwrap_or(book.mid_price_cents);
        let activity = self.activity.get(token);

        let decision = self.decision.evaluate_entry(EntryInputs {
            bias_direction,
            book: &book,
            activity: &activity,
            reference_price_cents,
            ev_allowed,
            open_positions_total: self.position_mgr.open_positions().len(),
            open_positions_for_token: self.position_mgr.open_positions_for_token(token),
            effective_bankroll: self.reserve.get_effective_bankroll(self.balance_usd).0,
            total_deployed_usd: self.position_mgr.total_deployed_usd(),
        });

        if !decision.allowed {
            if let Some(check) = decision.checks.iter().find(|c| !c.passed) {
                self.funnel.record_rejection(&format!("{:?}", check.check));
                if check.check == crate::decision::EntryCheck::RiskLimits {
                    self.reserve.record_missed_opportunity();
                }
            }
            return false;
        }

        let outcome = self.execution.process_entry(token, None, decision, &mut self.position_mgr).await;
        match outcome {
            EntryOutcome::Placed(_) => {
                self.funnel.entries_placed += 1;
                true
            }
            EntryOutcome::Rejected(reason) => {
                self.funnel.record_rejection(&reason);
                false
            }
            EntryOutcome::Failed(reason) => {
                self.funnel.record_rejection(&reason);
                self.reserve.record_missed_opportunity();
                false
            }
        }
    }

    /// Sells one position per tick, largest value first, respecting a
    /// post-sale cooldown so API state can catch up before re-selling.
    async fn run_liquidation_tick(&mut self) {
        let mode = self.liquidation_active;
        let now = now_ms();
        self.recently_sold.retain(|_, &mut sold_at| now - sold_at < RECENTLY_SOLD_COOLDOWN_MS);

        let mut candidates: Vec<_> = self
            .position_mgr
            .open_positions()
            .into_iter()
            .filter(|p| p.state != PositionState::Closed)
            .filter(|p| !self.recently_sold.contains_key(&p.id))
            .filter(|p| mode == LiquidationMode::All || p.unrealized_pnl_cents < 0.0)
            .map(|p| (p.id.clone(), p.token_id.clone(), p.entry_size_usd))
            .collect();

        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((id, token_id, _)) = candidates.into_iter().next() {
            let state = self.market_data.get_orderbook_state(&token_id, StalenessConfig::fast15m()).await;
            if let Ok(book) = state {
                let bias_direction = self.bias.get_bias(&token_id).direction;
                let snap = self.current_snapshot(bias_direction);
                let outcome = self
                    .execution
                    .process_position(&id, book.mid_price_cents, 0.0, &opposite_token_id(&token_id), 100 - book.mid_price_cents, Some(crate::models::ExitReason::HardExit), &mut self.position_mgr, snap)
                    .await;
                if matches!(outcome, ExitOutcome::Closed(_)) {
                    self.recently_sold.insert(id, now);
                }
            }
        }

        let bankroll_positive = self.reserve.get_effective_bankroll(self.balance_usd).0 > 0.0;
        let only_non_losing = self.position_mgr.open_positions().iter().all(|p| p.unrealized_pnl_cents >= 0.0);
        let should_exit_mode = match mode {
            LiquidationMode::All => bankroll_positive,
            LiquidationMode::Losing => only_non_losing,
            LiquidationMode::Off => true,
        };
        if should_exit_mode && self.liquidation_active != LiquidationMode::Off {
            info!(mode = ?mode, "liquidation mode condition cleared, resuming normal scheduling");
            self.liquidation_active = LiquidationMode::Off;
        }
    }

    fn housekeeping(&mut self) {
        self.position_mgr.prune_closed_positions(CLOSED_POSITION_MAX_AGE_MS);

        let now = now_ms();
        let sweep_interval = if self.liquidation_active != LiquidationMode::Off {
            REDEMPTION_SWEEP_LIQUIDATION_MS
        } else {
            REDEMPTION_SWEEP_NORMAL_MS
        };
        if now - self.last_redemption_sweep_ms >= sweep_interval {
            self.last_redemption_sweep_ms = now;
            // Settlement redemption and POL gas top-up are on-chain
            // operations outside this exchange client's contract; only the
            // scheduling cadence is implemented here.
            info!("redemption/gas sweep window elapsed");
        }

        self.reserve.update();
        self.funnel.log_status_summary(&self.bias.funnel, &self.ev_tracker.get_metrics(), &self.cooldown.get_stats(), &self.bias.wallet_tag_counts());
    }
}
