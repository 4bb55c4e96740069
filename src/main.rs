//! whalecopy - autonomous whale-copy trading daemon for Polymarket binary
//! outcome tokens.
//!
//! Wires the Bias Accumulator, EV Tracker, Position Manager, Decision
//! Engine, Execution Engine, Market Data Facade, Cooldown Manager, and
//! Dynamic Reserve Manager together behind the Cycle Scheduler, then drives
//! the scheduler until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use whalecopy_daemon::config::Config;
use whalecopy_daemon::exchange::{clob::PolymarketClobAdapter, paper::PaperExecutionAdapter, ExecutionAdapter};
use whalecopy_daemon::market_data::{MarketDataFacade, WsBookCache};
use whalecopy_daemon::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum CliLiquidationMode {
    Off,
    Losing,
    All,
}

/// Copy the buy flow of a curated set of whale accounts under a fixed EV
/// model, strict risk limits, and dynamic market-health gates.
///
/// All numeric behavior beyond what's listed here is governed by the EV
/// model's environment-configured constants (see `.env.example`); this
/// surface only exposes the knobs a trader tunes per run.
#[derive(Parser, Debug)]
#[command(name = "whalecopy", version, about)]
struct Cli {
    /// Max USD notional per entry (overrides MAX_TRADE_USD).
    #[arg(long)]
    bet_size_usd: Option<f64>,

    /// Lower bound of the whale-trade price filter, e.g. 0.05.
    #[arg(long)]
    whale_price_min: Option<f64>,

    /// Upper bound of the whale-trade price filter, e.g. 0.95.
    #[arg(long)]
    whale_price_max: Option<f64>,

    /// Minimum cumulative whale BUY flow (USD) for conservative bias mode.
    #[arg(long)]
    whale_trade_threshold_usd: Option<f64>,

    /// Sell down open positions instead of entering new ones.
    #[arg(long, value_enum)]
    liquidation_mode: Option<CliLiquidationMode>,

    /// Enable the market scanner fallback when no whale signal is eligible.
    #[arg(long)]
    scanner: bool,

    /// Disable the dynamic reserve manager; bankroll always uses the base reserve fraction.
    #[arg(long)]
    no_dynamic_reserves: bool,

    /// Comma-separated whale wallet addresses to copy. Leaderboard discovery
    /// itself is an external collaborator (out of scope for this crate); this
    /// flag is the seed list the daemon starts polling from.
    #[arg(long, value_delimiter = ',')]
    whale_wallets: Vec<String>,

    /// Place real orders against the Polymarket CLOB instead of paper trading.
    #[arg(long)]
    live: bool,

    /// These surfaces are acknowledged for operator parity but implemented
    /// by external collaborators out of this crate's scope (see spec §1).
    #[arg(long)]
    telegram: bool,
    #[arg(long)]
    vpn: bool,
    #[arg(long)]
    github_reporter: bool,

    /// Run one startup health check (exchange + market-data reachability),
    /// print the result, then halt indefinitely without trading.
    #[arg(long)]
    diagnose: bool,
}

fn apply_cli_overrides(cli: &Cli) {
    if let Some(v) = cli.bet_size_usd {
        std::env::set_var("MAX_TRADE_USD", v.to_string());
    }
    if let Some(v) = cli.whale_price_min {
        std::env::set_var("WHALE_PRICE_MIN", v.to_string());
    }
    if let Some(v) = cli.whale_price_max {
        std::env::set_var("WHALE_PRICE_MAX", v.to_string());
    }
    if let Some(v) = cli.whale_trade_threshold_usd {
        std::env::set_var("MIN_BIAS_FLOW_USD", v.to_string());
    }
    if let Some(mode) = cli.liquidation_mode {
        let raw = match mode {
            CliLiquidationMode::Off => "off",
            CliLiquidationMode::Losing => "losing",
            CliLiquidationMode::All => "all",
        };
        std::env::set_var("LIQUIDATION_MODE", raw);
    }
    if cli.scanner {
        std::env::set_var("SCANNER_ENABLED", "true");
    }
    if cli.no_dynamic_reserves {
        std::env::set_var("RESERVE_ADAPTATION_RATE", "0");
    }
    if cli.live {
        std::env::set_var("SIMULATION_MODE", "false");
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Resolves the execution adapter: paper by default, or the live CLOB
/// adapter when `--live` / `SIMULATION_MODE=false` and credentials are
/// present. Missing live credentials is a config/auth failure per spec §7
/// (fatal at startup).
fn build_adapter(cfg: &Config) -> Result<Arc<dyn ExecutionAdapter>> {
    if cfg.simulation_mode {
        info!("starting in simulation mode (paper execution adapter)");
        return Ok(Arc::new(PaperExecutionAdapter::default()));
    }

    match PolymarketClobAdapter::from_env() {
        Some(adapter) => {
            warn!("starting in LIVE mode: orders will be placed against the real Polymarket CLOB");
            Ok(Arc::new(adapter))
        }
        None => anyhow::bail!(
            "SIMULATION_MODE=false but POLYMARKET_CLOB_API_KEY/SECRET/PASSPHRASE/WALLET_ADDRESS are not fully set"
        ),
    }
}

async fn run_diagnostics(cfg: &Config, adapter: &Arc<dyn ExecutionAdapter>) -> Result<()> {
    info!("running startup diagnostics");
    match adapter.get_balance().await {
        Ok(balance) => info!(balance_usd = balance, "exchange balance check OK"),
        Err(e) => error!(error = %e, "exchange balance check FAILED"),
    }

    info!(
        max_trade_usd = cfg.max_trade_usd,
        liquidation_mode = ?cfg.liquidation_mode,
        bias_mode = ?cfg.bias_mode,
        simulation_mode = cfg.simulation_mode,
        "config snapshot"
    );

    info!("diagnostics complete; holding process open (exit code reserved for `halt` workflows)");
    std::future::pending::<()>().await;
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();
    apply_cli_overrides(&cli);

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration failed to validate; exiting");
            return std::process::ExitCode::FAILURE;
        }
    };

    let adapter = match build_adapter(&cfg) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "fatal: could not construct execution adapter");
            return std::process::ExitCode::FAILURE;
        }
    };

    if cli.diagnose {
        if let Err(e) = run_diagnostics(&cfg, &adapter).await {
            error!(error = %e, "diagnostics failed");
            return std::process::ExitCode::FAILURE;
        }
        return std::process::ExitCode::SUCCESS;
    }

    let ws = WsBookCache::spawn();
    let market_data = Arc::new(MarketDataFacade::new(ws, cfg.min_spread_cents));

    let whale_wallets: Vec<String> = if !cli.whale_wallets.is_empty() {
        cli.whale_wallets.clone()
    } else {
        std::env::var("WHALE_WALLETS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    if whale_wallets.is_empty() {
        warn!("no whale wallets configured (--whale-wallets / WHALE_WALLETS); bias accumulator will stay empty until wallets are provided");
    } else {
        info!(count = whale_wallets.len(), "whale wallet seed list loaded");
    }

    let mut scheduler = Scheduler::new(cfg, adapter, market_data, whale_wallets);
    let shutdown = scheduler.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    info!("whalecopy daemon starting");
    scheduler.run().await;
    info!("whalecopy daemon exited cleanly");
    std::process::ExitCode::SUCCESS
}
