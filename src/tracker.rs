//! Tiered re-scan controller
//!
//! [`PatternTracker`] owns the per-symbol cache and exposes the four tier
//! entry points. Tier 1 runs every detector and upserts the results; tiers
//! 2-4 only re-evaluate cached observations whose state is in the tier's
//! watch set, so their cost grows with the number of live formations rather
//! than with history length.
//!
//! | Tier | Re-evaluates                    | Emits (state must have changed) |
//! |------|---------------------------------|---------------------------------|
//! | 1    | - (fresh detection)             | every stored detection          |
//! | 2    | FORMING                         | any new state                   |
//! | 3    | FORMING, NEAR_BREAKOUT          | NEAR_BREAKOUT, BREAKOUT_IMMINENT |
//! | 4    | BREAKOUT_IMMINENT, _CONFIRMED   | BREAKOUT_CONFIRMED              |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cache::{PatternCache, SymbolSlot, UpsertOutcome},
    ContextProvider, DefaultContextProvider, PatternEngine, PatternObservation, PatternState,
    PatternType, Reevaluation, OHLCV,
};

// ============================================================
// TIERS
// ============================================================

/// Re-evaluation frequency class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 1: run every detector
    Full,
    /// Tier 2: re-check forming patterns
    Forming,
    /// Tier 3: watch for imminent breakouts
    Imminent,
    /// Tier 4: track confirmed breakouts
    Confirmed,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Full, Tier::Forming, Tier::Imminent, Tier::Confirmed];

    pub fn number(self) -> u8 {
        match self {
            Tier::Full => 1,
            Tier::Forming => 2,
            Tier::Imminent => 3,
            Tier::Confirmed => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.number() == n)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Full => "TIER1",
            Tier::Forming => "TIER2",
            Tier::Imminent => "TIER3",
            Tier::Confirmed => "TIER4",
        }
    }

    /// Whether a cached observation in `state` is re-evaluated by this tier
    pub fn watches(self, state: PatternState) -> bool {
        use PatternState::*;
        match self {
            Tier::Full => true,
            Tier::Forming => state == Forming,
            Tier::Imminent => matches!(state, Forming | NearBreakout),
            Tier::Confirmed => matches!(state, BreakoutImminent | BreakoutConfirmed),
        }
    }

    /// Whether a re-evaluated observation is surfaced by this tier
    pub fn emits(self, new_state: PatternState, changed: bool) -> bool {
        use PatternState::*;
        match self {
            Tier::Full => true,
            Tier::Forming => changed,
            Tier::Imminent => changed && matches!(new_state, NearBreakout | BreakoutImminent),
            Tier::Confirmed => changed && new_state == BreakoutConfirmed,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// OUTCOME
// ============================================================

/// Terminal record produced when a position on a pattern is closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternOutcome {
    pub symbol: String,
    pub pattern_type: PatternType,
    /// Last price the observation was evaluated at
    pub entry_price: f64,
    pub exit_price: f64,
    /// Targets reached at the exit price (0..=3)
    pub target_hit: u8,
    pub profit_loss_pct: f64,
    pub success: bool,
}

impl PatternOutcome {
    pub fn from_exit(observation: &PatternObservation, exit_price: f64) -> Self {
        let entry_price = observation.current_price;
        let profit_loss_pct = if entry_price.abs() > f64::EPSILON {
            (exit_price - entry_price) / entry_price * 100.0
        } else {
            0.0
        };

        Self {
            symbol: observation.symbol.clone(),
            pattern_type: observation.pattern_type,
            entry_price,
            exit_price,
            target_hit: observation.targets_hit(exit_price),
            profit_loss_pct,
            success: profit_loss_pct > 0.0,
        }
    }
}

// ============================================================
// TRACKER
// ============================================================

/// Detection engine plus the per-symbol cache it feeds.
///
/// All methods take `&self`; the tracker can be shared across worker
/// threads. Work on one symbol is serialized by the cache.
pub struct PatternTracker<C: ContextProvider = DefaultContextProvider> {
    engine: PatternEngine<C>,
    cache: PatternCache,
}

impl<C: ContextProvider> PatternTracker<C> {
    pub fn new(engine: PatternEngine<C>) -> Self {
        Self::with_cache(engine, PatternCache::new())
    }

    /// Share an existing cache (for example between two trackers with different engines)
    pub fn with_cache(engine: PatternEngine<C>, cache: PatternCache) -> Self {
        Self { engine, cache }
    }

    #[inline]
    pub fn engine(&self) -> &PatternEngine<C> {
        &self.engine
    }

    #[inline]
    pub fn cache(&self) -> &PatternCache {
        &self.cache
    }

    /// Tier 1: run every detector and upsert the results.
    ///
    /// Cached entries the current price has fallen through are retired
    /// first, so a later recovery cannot bring them back. Several candidates
    /// of one type collapse to the most recent one. Keys retired earlier in
    /// this cache lifetime are skipped. Returns what was stored.
    pub fn detect_all<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        if bars.is_empty() {
            return Vec::new();
        }

        let ctx = self.engine.compute_context(bars, market_score);
        let latest = latest_per_type(self.engine.detect_with_context(bars, symbol, &ctx));
        let nothing_new = latest.is_empty();

        let store = |slot: &mut SymbolSlot| -> Vec<PatternObservation> {
            let broken = slot.retire_invalidated(ctx.current_price);
            log_retired(broken, symbol, Tier::Full, ctx.current_price);

            latest
                .into_iter()
                .filter(|obs| match slot.upsert(obs.clone()) {
                    UpsertOutcome::Retired => {
                        debug!(symbol = %symbol, pattern = %obs.pattern_type, "skipping retired pattern");
                        false
                    }
                    UpsertOutcome::Inserted | UpsertOutcome::Replaced => true,
                })
                .collect()
        };

        if nothing_new {
            // nothing to insert; only sweep an existing slot
            return self
                .cache
                .with_existing_slot(symbol, store)
                .unwrap_or_default();
        }
        self.cache.with_slot(symbol, store)
    }

    /// Tier 2: re-check FORMING entries; emit any whose state changed.
    pub fn rescan_forming<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        self.rescan(Tier::Forming, bars, symbol, market_score)
    }

    /// Tier 3: re-check FORMING/NEAR_BREAKOUT entries; emit new NEAR_BREAKOUT
    /// or BREAKOUT_IMMINENT states.
    pub fn rescan_imminent<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        self.rescan(Tier::Imminent, bars, symbol, market_score)
    }

    /// Tier 4: re-check imminent/confirmed entries; emit new confirmations.
    pub fn rescan_confirmed<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        self.rescan(Tier::Confirmed, bars, symbol, market_score)
    }

    /// Dispatch to the entry point for `tier`
    pub fn run_tier<T: OHLCV>(
        &self,
        tier: Tier,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        match tier {
            Tier::Full => self.detect_all(bars, symbol, market_score),
            _ => self.rescan(tier, bars, symbol, market_score),
        }
    }

    /// Remove an observation without blocking its key (manual close)
    pub fn deactivate(&self, symbol: &str, pattern_type: PatternType) -> Option<PatternObservation> {
        self.cache.deactivate(symbol, pattern_type)
    }

    /// Deactivate and report the outcome of exiting at `exit_price`
    pub fn close(
        &self,
        symbol: &str,
        pattern_type: PatternType,
        exit_price: f64,
    ) -> Option<PatternOutcome> {
        self.deactivate(symbol, pattern_type)
            .map(|obs| PatternOutcome::from_exit(&obs, exit_price))
    }

    fn rescan<T: OHLCV>(
        &self,
        tier: Tier,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        if bars.is_empty() {
            return Vec::new();
        }

        if !self.cache.any_active(symbol, |o| tier.watches(o.state)) {
            return Vec::new();
        }
        // computed outside the shard lock
        let ctx = self.engine.compute_context(bars, market_score);

        self.cache
            .with_existing_slot(symbol, |slot| {
                let mut emitted = Vec::new();
                let mut invalidated = Vec::new();

                for cached in slot.active.iter_mut().filter(|o| tier.watches(o.state)) {
                    match self.engine.reevaluate(cached, &ctx) {
                        Reevaluation::Invalidated => invalidated.push(cached.pattern_type),
                        Reevaluation::Updated {
                            observation,
                            changed,
                        } => {
                            let emit = tier.emits(observation.state, changed);
                            *cached = observation;
                            if emit {
                                emitted.push(cached.clone());
                            }
                        }
                    }
                }

                for &pattern_type in &invalidated {
                    slot.retire(pattern_type);
                }
                log_retired(invalidated, symbol, tier, ctx.current_price);

                emitted
            })
            .unwrap_or_default()
    }
}

fn log_retired(retired: Vec<PatternType>, symbol: &str, tier: Tier, price: f64) {
    for pattern_type in retired {
        debug!(
            symbol = %symbol,
            pattern = %pattern_type,
            tier = %tier,
            price,
            "pattern invalidated"
        );
    }
}

/// Keep the last observation of each type, ordered by first appearance
fn latest_per_type(found: Vec<PatternObservation>) -> Vec<PatternObservation> {
    let mut order = Vec::new();
    let mut latest: BTreeMap<PatternType, PatternObservation> = BTreeMap::new();

    for obs in found {
        if !latest.contains_key(&obs.pattern_type) {
            order.push(obs.pattern_type);
        }
        latest.insert(obs.pattern_type, obs);
    }

    order
        .into_iter()
        .filter_map(|t| latest.remove(&t))
        .collect()
}
