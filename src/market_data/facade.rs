//! Market Data Facade: unified orderbook reads.
//!
//! Consults the WS-backed store first; falls back to REST when missing or
//! stale. Validates sanity gates (`INVALID_PRICES`, `DUST_BOOK`,
//! `INVALID_LIQUIDITY`). When the cached source suggests a dust book, a
//! throttled REST re-fetch (at most once per 5 minutes per token) either
//! confirms the dust book or recovers a valid one, grounded on the
//! staleness-config pattern from this codebase's book-access helpers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::models::{now_ms, BookSource, OrderbookState};

use super::rest::{RawBook, RestBookClient};
use super::ws_cache::WsBookCache;

const DUST_REVERIFY_THROTTLE_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessConfig {
    pub max_age_ms: i64,
    pub hard_stale_ms: i64,
}

impl StalenessConfig {
    pub const fn fast15m() -> Self {
        Self { max_age_ms: 1500, hard_stale_ms: 5000 }
    }
    pub const fn long_strategy() -> Self {
        Self { max_age_ms: 5000, hard_stale_ms: 30_000 }
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self::fast15m()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookFailure {
    InvalidPrices,
    DustBook,
    InvalidLiquidity,
    NoOrderbook,
    NotFound,
    RateLimit,
    NetworkError,
    ParseError,
}

impl BookFailure {
    pub fn label(&self) -> &'static str {
        match self {
            BookFailure::InvalidPrices => "INVALID_PRICES",
            BookFailure::DustBook => "DUST_BOOK",
            BookFailure::InvalidLiquidity => "INVALID_LIQUIDITY",
            BookFailure::NoOrderbook => "NO_ORDERBOOK",
            BookFailure::NotFound => "NOT_FOUND",
            BookFailure::RateLimit => "RATE_LIMIT",
            BookFailure::NetworkError => "NETWORK_ERROR",
            BookFailure::ParseError => "PARSE_ERROR",
        }
    }

    pub fn is_long_schedule(&self) -> bool {
        matches!(self, BookFailure::NoOrderbook | BookFailure::NotFound)
    }
}

pub struct MarketDataFacade {
    ws: Arc<WsBookCache>,
    rest: RestBookClient,
    min_spread_cents: i32,
    last_dust_reverify_ms: Mutex<HashMap<String, i64>>,
}

impl MarketDataFacade {
    pub fn new(ws: Arc<WsBookCache>, min_spread_cents: i32) -> Self {
        Self { ws, rest: RestBookClient::new(), min_spread_cents, last_dust_reverify_ms: Mutex::new(HashMap::new()) }
    }

    pub fn subscribe(&self, token_id: &str) {
        self.ws.request_subscribe(token_id);
    }

    pub async fn get_orderbook_state(
        &self,
        token_id: &str,
        staleness: StalenessConfig,
    ) -> Result<OrderbookState, BookFailure> {
        let cached = self.ws.get_book(token_id, staleness.max_age_ms);

        let (raw, source) = match cached {
            Some((book, _age_ms)) => (book, BookSource::Ws),
            None => {
                // Not cached yet: request a WS subscription for next time and
                // fall back to REST for this read.
                self.ws.request_subscribe(token_id);
                let book = self.rest.fetch_book(token_id).await.map_err(|_| BookFailure::NetworkError)?;
                (Arc::new(book), BookSource::Rest)
            }
        };

        match self.validate(&raw, source) {
            Ok(state) => Ok(state),
            Err(BookFailure::DustBook) => self.reverify_dust(token_id).await,
            Err(e) => Err(e),
        }
    }

    async fn reverify_dust(&self, token_id: &str) -> Result<OrderbookState, BookFailure> {
        let now = now_ms();
        let mut throttle = self.last_dust_reverify_ms.lock();
        if let Some(&last) = throttle.get(token_id) {
            if now - last < DUST_REVERIFY_THROTTLE_MS {
                return Err(BookFailure::DustBook);
            }
        }
        throttle.insert(token_id.to_string(), now);
        drop(throttle);

        // REST unreachable: trust the cached dust verdict rather than blocking forever.
        let rest_book = self.rest.fetch_book(token_id).await.map_err(|_| BookFailure::DustBook)?;

        match self.validate(&rest_book, BookSource::Rest) {
            Ok(state) => {
                info!(token_id, "book recovered after dust re-verification");
                Ok(state)
            }
            Err(e) => Err(e),
        }
    }

    /// Dust-book classification runs before the spread gate: a 1c/99c book
    /// has a spread far wider than any `min_spread_cents` config, so if the
    /// spread check ran first `DUST_BOOK` could never surface as its own
    /// failure reason.
    fn validate(&self, raw: &RawBook, source: BookSource) -> Result<OrderbookState, BookFailure> {
        let best_bid = raw.bids.first().map(|l| l.price);
        let best_ask = raw.asks.first().map(|l| l.price);

        let (bid, ask) = match (best_bid, best_ask) {
            (Some(b), Some(a)) if b.is_finite() && a.is_finite() && b > 0.0 && a > 0.0 => (b, a),
            _ => return Err(BookFailure::InvalidPrices),
        };

        let best_bid_cents = (bid * 100.0).round() as i32;
        let best_ask_cents = (ask * 100.0).round() as i32;

        if best_bid_cents <= 2 && best_ask_cents >= 98 {
            return Err(BookFailure::DustBook);
        }

        let spread_cents = best_ask_cents - best_bid_cents;

        if spread_cents > self.min_spread_cents {
            return Err(BookFailure::InvalidLiquidity);
        }

        let bid_depth_usd: f64 = raw.bids.iter().take(5).map(|l| l.price * l.size).sum();
        let ask_depth_usd: f64 = raw.asks.iter().take(5).map(|l| l.price * l.size).sum();

        Ok(OrderbookState {
            best_bid_cents,
            best_ask_cents,
            bid_depth_usd,
            ask_depth_usd,
            spread_cents,
            mid_price_cents: (best_bid_cents + best_ask_cents) / 2,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::rest::RawLevel;
    use super::*;

    fn facade() -> MarketDataFacade {
        MarketDataFacade::new(WsBookCache::spawn(), 10)
    }

    #[test]
    fn validate_rejects_missing_prices() {
        let f = facade();
        let book = RawBook { bids: vec![], asks: vec![RawLevel { price: 0.5, size: 10.0 }] };
        assert_eq!(f.validate(&book, BookSource::Rest), Err(BookFailure::InvalidPrices));
    }

    #[test]
    fn validate_rejects_wide_spread() {
        let f = facade();
        let book = RawBook {
            bids: vec![RawLevel { price: 0.30, size: 10.0 }],
            asks: vec![RawLevel { price: 0.60, size: 10.0 }],
        };
        assert_eq!(f.validate(&book, BookSource::Rest), Err(BookFailure::InvalidLiquidity));
    }

    #[test]
    fn validate_accepts_tight_book() {
        let f = facade();
        let book = RawBook {
            bids: vec![RawLevel { price: 0.45, size: 100.0 }],
            asks: vec![RawLevel { price: 0.46, size: 100.0 }],
        };
        let state = f.validate(&book, BookSource::Rest).unwrap();
        assert_eq!(state.best_bid_cents, 45);
        assert_eq!(state.best_ask_cents, 46);
        assert_eq!(state.spread_cents, 1);
    }

    #[test]
    fn validate_flags_dust_book_before_spread_gate() {
        // min_spread_cents is 10 in this harness; a 1c/99c book has a spread
        // of 98, which would also fail the spread gate. DUST_BOOK must win.
        let f = facade();
        let book = RawBook {
            bids: vec![RawLevel { price: 0.01, size: 10.0 }],
            asks: vec![RawLevel { price: 0.99, size: 10.0 }],
        };
        assert_eq!(f.validate(&book, BookSource::Rest), Err(BookFailure::DustBook));
    }

    #[tokio::test]
    async fn dust_reverify_is_throttled_per_token() {
        let f = facade();
        f.last_dust_reverify_ms.lock().insert("tok1".to_string(), now_ms());
        let result = f.reverify_dust("tok1").await;
        assert_eq!(result, Err(BookFailure::DustBook));
    }
}
