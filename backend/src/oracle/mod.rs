//! Collateral price oracle
//!
//! Prices are published out-of-band by an adapter (a feed poller, a push
//! subscription...). The adapter delivers each observation to
//! [`PriceCache::on_price_update`], directly or over a channel via
//! [`PriceCache::spawn_listener`]. Loans only ever read the last cached quote,
//! synchronously, at the moment their terms are finalized. Nothing in the
//! lending core waits for a refresh.

use crate::core::time::Timestamp;
use crate::models::ids::AssetId;
use crate::models::money::Amount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Last published valuation of one collateral unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Amount,
    pub published_at: Timestamp,
}

/// Message sent by an oracle adapter when it observes a new price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub asset: AssetId,
    pub price: Amount,
    pub published_at: Timestamp,
}

/// Read side of the oracle, as seen by loans
pub trait PriceOracle: Send + Sync {
    /// Last published quote for `asset`, if any was ever published
    fn current_price(&self, asset: &AssetId) -> Option<PriceQuote>;
}

/// Oracle that never has a price; loans then rely on the supplied unit price
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPriceOracle;

impl PriceOracle for NoPriceOracle {
    fn current_price(&self, _asset: &AssetId) -> Option<PriceQuote> {
        None
    }
}

/// Last-value cache fed by price updates
///
/// # Example
/// ```
/// use p2p_lending_core_rs::oracle::{PriceCache, PriceOracle, PriceUpdate};
/// use p2p_lending_core_rs::AssetId;
///
/// let cache = PriceCache::new();
/// cache.on_price_update(PriceUpdate {
///     asset: AssetId::from("TTT"),
///     price: 10_000,
///     published_at: 100,
/// });
/// assert_eq!(cache.current_price(&AssetId::from("TTT")).unwrap().price, 10_000);
/// ```
#[derive(Debug, Default)]
pub struct PriceCache {
    quotes: RwLock<HashMap<AssetId, PriceQuote>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed price
    ///
    /// Updates published before the cached quote are ignored, so a late
    /// delivery can never roll the price back. Returns whether the cache
    /// changed.
    pub fn on_price_update(&self, update: PriceUpdate) -> bool {
        let mut quotes = self.quotes.write().unwrap_or_else(PoisonError::into_inner);
        let newer = quotes
            .get(&update.asset)
            .map_or(true, |cached| update.published_at >= cached.published_at);
        if newer {
            quotes.insert(
                update.asset,
                PriceQuote {
                    price: update.price,
                    published_at: update.published_at,
                },
            );
        }
        newer
    }

    /// Drain `updates` into the cache on a background thread
    ///
    /// The thread exits when every sender has been dropped.
    pub fn spawn_listener(self: &Arc<Self>, updates: Receiver<PriceUpdate>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        thread::spawn(move || {
            for update in updates {
                cache.on_price_update(update);
            }
        })
    }
}

impl PriceOracle for PriceCache {
    fn current_price(&self, asset: &AssetId) -> Option<PriceQuote> {
        self.quotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset)
            .copied()
    }
}
