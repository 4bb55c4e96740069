//! Market data acquisition: REST client, WS book cache, and the facade that
//! unifies both behind sanity gates and dust-book re-verification.

pub mod facade;
pub mod rest;
pub mod ws_cache;

pub use facade::{BookFailure, MarketDataFacade, StalenessConfig};
pub use ws_cache::WsBookCache;
