//! Per-symbol observation cache
//!
//! Sharded concurrent map from symbol to that symbol's active observations.
//! Different symbols never contend on the same lock; all writes for one
//! symbol go through the shard entry guard, which serializes them.
//!
//! Keys that were invalidated are remembered ("retired") until
//! [`PatternCache::clear`], so an invalidated formation cannot come back
//! within the same cache lifetime.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use dashmap::DashMap;
use serde::Serialize;

use crate::{PatternObservation, PatternState, PatternType};

/// What [`PatternCache::upsert`] did with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// An active entry with the same key was fully replaced
    Replaced,
    /// The key was invalidated earlier in this cache lifetime; nothing stored
    Retired,
}

/// Everything cached for one symbol
#[derive(Debug, Default)]
pub(crate) struct SymbolSlot {
    /// At most one entry per pattern type
    pub(crate) active: Vec<PatternObservation>,
    pub(crate) retired: HashSet<PatternType>,
}

impl SymbolSlot {
    pub(crate) fn upsert(&mut self, observation: PatternObservation) -> UpsertOutcome {
        if self.retired.contains(&observation.pattern_type) {
            return UpsertOutcome::Retired;
        }
        match self
            .active
            .iter_mut()
            .find(|o| o.pattern_type == observation.pattern_type)
        {
            Some(existing) => {
                *existing = observation;
                UpsertOutcome::Replaced
            }
            None => {
                self.active.push(observation);
                UpsertOutcome::Inserted
            }
        }
    }

    pub(crate) fn take(&mut self, pattern_type: PatternType) -> Option<PatternObservation> {
        let pos = self
            .active
            .iter()
            .position(|o| o.pattern_type == pattern_type)?;
        Some(self.active.remove(pos))
    }

    pub(crate) fn retire(&mut self, pattern_type: PatternType) -> Option<PatternObservation> {
        self.retired.insert(pattern_type);
        self.take(pattern_type)
    }

    /// Retire every active entry whose invalidation level is above `price`
    pub(crate) fn retire_invalidated(&mut self, price: f64) -> Vec<PatternType> {
        let broken: Vec<PatternType> = self
            .active
            .iter()
            .filter(|o| o.is_invalidated_by(price))
            .map(|o| o.pattern_type)
            .collect();
        for &pattern_type in &broken {
            self.retire(pattern_type);
        }
        broken
    }
}

/// Snapshot statistics over every active observation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_active: usize,
    pub by_type: BTreeMap<PatternType, usize>,
    pub by_state: BTreeMap<PatternState, usize>,
    /// Mean strength score; 0.0 when nothing is active
    pub avg_strength: f64,
    pub confirmed: usize,
}

/// Concurrent symbol -> observations cache.
///
/// Cloning is cheap and shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    slots: Arc<DashMap<String, SymbolSlot>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Insert or fully replace the entry keyed by (symbol, pattern_type).
    pub fn upsert(&self, observation: PatternObservation) -> UpsertOutcome {
        let symbol = observation.symbol.clone();
        self.with_slot(&symbol, move |slot| slot.upsert(observation))
    }

    pub fn get(&self, symbol: &str, pattern_type: PatternType) -> Option<PatternObservation> {
        self.slots.get(symbol).and_then(|slot| {
            slot.active
                .iter()
                .find(|o| o.pattern_type == pattern_type)
                .cloned()
        })
    }

    /// Active observations for `symbol`, in insertion order
    pub fn active(&self, symbol: &str) -> Vec<PatternObservation> {
        self.slots
            .get(symbol)
            .map(|slot| slot.active.clone())
            .unwrap_or_default()
    }

    /// Remove an entry and block its key for the rest of this cache lifetime.
    pub fn retire(&self, symbol: &str, pattern_type: PatternType) -> Option<PatternObservation> {
        self.with_slot(symbol, |slot| slot.retire(pattern_type))
    }

    /// Remove an entry without blocking its key (manual close).
    pub fn deactivate(&self, symbol: &str, pattern_type: PatternType) -> Option<PatternObservation> {
        self.slots
            .get_mut(symbol)
            .and_then(|mut slot| slot.take(pattern_type))
    }

    pub fn is_retired(&self, symbol: &str, pattern_type: PatternType) -> bool {
        self.slots
            .get(symbol)
            .is_some_and(|slot| slot.retired.contains(&pattern_type))
    }

    /// Symbols with at least one active observation, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| !entry.value().active.is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Number of active observations across all symbols
    pub fn len(&self) -> usize {
        self.slots.iter().map(|entry| entry.value().active.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, including retired keys; starts a new cache lifetime.
    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let mut strength_sum = 0u64;

        for entry in self.slots.iter() {
            for o in &entry.value().active {
                stats.total_active += 1;
                strength_sum += u64::from(o.strength_score);
                *stats.by_type.entry(o.pattern_type).or_default() += 1;
                *stats.by_state.entry(o.state).or_default() += 1;
                if o.state == PatternState::BreakoutConfirmed {
                    stats.confirmed += 1;
                }
            }
        }

        if stats.total_active > 0 {
            stats.avg_strength = strength_sum as f64 / stats.total_active as f64;
        }
        stats
    }

    /// Whether any active entry for `symbol` matches `pred`. Read lock only.
    pub(crate) fn any_active(&self, symbol: &str, pred: impl Fn(&PatternObservation) -> bool) -> bool {
        self.slots
            .get(symbol)
            .is_some_and(|slot| slot.active.iter().any(pred))
    }

    /// Run `f` with exclusive access to the slot for `symbol`, creating it if needed.
    ///
    /// The shard lock is held for the duration of `f`; `f` must not touch
    /// this cache again.
    pub(crate) fn with_slot<R>(&self, symbol: &str, f: impl FnOnce(&mut SymbolSlot) -> R) -> R {
        let mut slot = self.slots.entry(symbol.to_string()).or_default();
        f(&mut slot)
    }

    /// Like [`PatternCache::with_slot`], but None if `symbol` was never cached.
    pub(crate) fn with_existing_slot<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut SymbolSlot) -> R,
    ) -> Option<R> {
        self.slots.get_mut(symbol).map(|mut slot| f(&mut slot))
    }
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;
    use crate::{Formation, MarketContext, ScoreBasis, StateThresholds};

    fn observation(symbol: &str, pattern_type: PatternType, price: f64) -> PatternObservation {
        let formation = Formation::new(
            100.0,
            90.0,
            90.0,
            [103.0, 105.0, 108.0],
            ScoreBasis::Generic {
                quality: 80.0,
                depth_pct: 10.0,
            },
        );
        let ctx = MarketContext {
            current_price: price,
            market_score: 50,
            ..MarketContext::default()
        };
        PatternObservation::new(symbol, pattern_type, formation, &ctx, &StateThresholds::default())
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let cache = PatternCache::new();
        assert_eq!(
            cache.upsert(observation("A", PatternType::BullFlag, 95.0)),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            cache.upsert(observation("A", PatternType::BullFlag, 99.0)),
            UpsertOutcome::Replaced
        );
        assert_eq!(
            cache.upsert(observation("A", PatternType::CupHandle, 95.0)),
            UpsertOutcome::Inserted
        );

        assert_eq!(cache.len(), 2);
        let flag = cache.get("A", PatternType::BullFlag).unwrap();
        assert_eq!(flag.current_price, 99.0);
        assert_eq!(flag.state, PatternState::NearBreakout);
    }

    #[test]
    fn test_retired_key_stays_out() {
        let cache = PatternCache::new();
        cache.upsert(observation("A", PatternType::BullFlag, 95.0));
        assert!(cache.retire("A", PatternType::BullFlag).is_some());

        assert!(cache.is_retired("A", PatternType::BullFlag));
        assert_eq!(
            cache.upsert(observation("A", PatternType::BullFlag, 95.0)),
            UpsertOutcome::Retired
        );
        assert!(cache.get("A", PatternType::BullFlag).is_none());
        // other symbols are unaffected
        assert!(!cache.is_retired("B", PatternType::BullFlag));

        cache.clear();
        assert_eq!(
            cache.upsert(observation("A", PatternType::BullFlag, 95.0)),
            UpsertOutcome::Inserted
        );
    }

    #[test]
    fn test_deactivate_does_not_retire() {
        let cache = PatternCache::new();
        cache.upsert(observation("A", PatternType::TripleBottom, 95.0));
        assert!(cache.deactivate("A", PatternType::TripleBottom).is_some());
        assert!(cache.deactivate("A", PatternType::TripleBottom).is_none());
        assert!(cache.deactivate("MISSING", PatternType::TripleBottom).is_none());
        assert!(!cache.is_retired("A", PatternType::TripleBottom));
        assert!(cache.is_empty());
        assert!(cache.symbols().is_empty());
    }

    #[test]
    fn test_retire_invalidated_only_touches_broken_entries() {
        let cache = PatternCache::new();
        cache.upsert(observation("A", PatternType::BullFlag, 95.0));
        let mut deeper = observation("A", PatternType::CupHandle, 95.0);
        deeper.invalidation_point = 80.0;
        cache.upsert(deeper);

        let broken = cache.with_slot("A", |slot| slot.retire_invalidated(85.0));
        assert_eq!(broken, vec![PatternType::BullFlag]);
        assert!(cache.is_retired("A", PatternType::BullFlag));
        assert!(cache.get("A", PatternType::CupHandle).is_some());
        assert!(cache.any_active("A", |o| o.pattern_type == PatternType::CupHandle));
        assert!(!cache.any_active("B", |_| true));
    }

    #[test]
    fn test_stats() {
        let cache = PatternCache::new();
        cache.upsert(observation("A", PatternType::BullFlag, 95.0));
        cache.upsert(observation("B", PatternType::BullFlag, 99.0));
        cache.upsert(observation("B", PatternType::RisingWedge, 95.0));

        let stats = cache.stats();
        assert_eq!(stats.total_active, 3);
        assert_eq!(stats.by_type[&PatternType::BullFlag], 2);
        assert_eq!(stats.by_state[&PatternState::Forming], 2);
        assert_eq!(stats.by_state[&PatternState::NearBreakout], 1);
        assert_eq!(stats.confirmed, 0);
        assert!(stats.avg_strength > 0.0);
        assert_eq!(cache.symbols(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(PatternCache::new().stats(), CacheStats::default());
    }

    #[test]
    fn test_concurrent_upserts_across_symbols() {
        let cache = PatternCache::new();
        let symbols: Vec<String> = (0..64).map(|i| format!("SYM{i}")).collect();

        symbols.par_iter().for_each(|s| {
            for t in PatternType::ALL {
                cache.upsert(observation(s, t, 95.0));
                cache.upsert(observation(s, t, 96.0));
            }
        });

        assert_eq!(cache.len(), 64 * PatternType::ALL.len());
        assert!(cache
            .active("SYM7")
            .iter()
            .all(|o| o.current_price == 96.0));
    }
}
