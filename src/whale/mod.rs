//! Whale/leaderboard wallet tracking: polls curated wallets via Dome and
//! Hashdive and normalizes their BUY flow into `WhaleTrade`s for the Bias
//! Accumulator.

pub mod dome;
pub mod hashdive;

use std::collections::HashMap;

use anyhow::Result;
use tracing::warn;

use crate::models::WhaleTrade;
use dome::DomeClient;
use hashdive::HashdiveClient;

pub use hashdive::WalletClassification;

/// Result of a single poll tick: normalized trades plus a diagnostics-only
/// classification tag per wallet that had fresh Hashdive history this tick.
pub struct PollOutcome {
    pub trades: Vec<WhaleTrade>,
    pub classifications: HashMap<String, WalletClassification>,
}

/// Polls a rotating batch of whale wallets per tick via whichever backend is
/// configured, returning normalized `WhaleTrade`s. A backend outage degrades
/// to an empty batch rather than aborting the cycle.
pub struct WhaleSource {
    dome: Option<DomeClient>,
    hashdive: Option<HashdiveClient>,
}

impl WhaleSource {
    pub fn new(dome_api_key: Option<String>, hashdive_api_key: Option<String>) -> Self {
        let dome = dome_api_key.and_then(|k| match DomeClient::new(k) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "failed to construct Dome client");
                None
            }
        });
        let hashdive = hashdive_api_key.map(HashdiveClient::new);
        Self { dome, hashdive }
    }

    pub async fn poll_wallets(&mut self, wallets: &[String]) -> PollOutcome {
        let mut trades = Vec::new();
        let mut classifications = HashMap::new();

        if let Some(dome) = &self.dome {
            for wallet in wallets {
                match dome.get_orders_paginated(wallet, None, 100).await {
                    Ok(orders) => trades.extend(orders.into_iter().map(|o| o.into_whale_trade())),
                    Err(e) => warn!(wallet, error = %e, "Dome poll failed for wallet"),
                }
            }
        }

        if let Some(hashdive) = &mut self.hashdive {
            for wallet in wallets {
                match hashdive.get_trades(wallet, None, None).await {
                    Ok(resp) => {
                        classifications.insert(wallet.to_lowercase(), hashdive.classify_wallet(&resp.data));
                        trades.extend(hashdive.to_whale_trades(&resp.data));
                    }
                    Err(e) => warn!(wallet, error = %e, "Hashdive poll failed for wallet"),
                }
            }
        }

        PollOutcome { trades, classifications }
    }
}

pub type WhaleResult<T> = Result<T>;
