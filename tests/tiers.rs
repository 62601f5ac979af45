//! Scan passes over a small watchlist, tier by tier, through in-memory collaborators.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use breakout_scan::prelude::*;
use chrono::NaiveDate;

// ============================================================
// COLLABORATORS
// ============================================================

#[derive(Default)]
struct Feed {
    series: RwLock<HashMap<String, Vec<PriceBar>>>,
}

impl Feed {
    fn set(&self, symbol: &str, bars: Vec<PriceBar>) {
        self.series.write().unwrap().insert(symbol.to_string(), bars);
    }
}

impl MarketDataSource for Feed {
    fn fetch_series(
        &self,
        symbol: &str,
        _period: &str,
    ) -> std::result::Result<Option<Vec<PriceBar>>, CollaboratorError> {
        Ok(self.series.read().unwrap().get(symbol).cloned())
    }
}

struct FixedMarket(u8);

impl MarketCondition for FixedMarket {
    fn market_score(&self) -> std::result::Result<u8, CollaboratorError> {
        Ok(self.0)
    }
}

/// Persists by (symbol, pattern_type), like a keyed table
#[derive(Default)]
struct Store {
    rows: Mutex<HashMap<(String, PatternType), PatternObservation>>,
    writes: Mutex<usize>,
}

impl PatternSink for Store {
    fn upsert(&self, observation: &PatternObservation) -> std::result::Result<(), CollaboratorError> {
        self.rows.lock().unwrap().insert(
            (observation.symbol.clone(), observation.pattern_type),
            observation.clone(),
        );
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(PatternState, String)>>,
}

impl AlertSink for Outbox {
    fn notify(
        &self,
        state: PatternState,
        observation: &PatternObservation,
    ) -> std::result::Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap()
            .push((state, observation.symbol.clone()));
        Ok(())
    }
}

// ============================================================
// DATA
// ============================================================

fn path(knots: &[(usize, f64)]) -> Vec<f64> {
    let mut out = vec![knots[0].1];
    for pair in knots.windows(2) {
        let ((i0, v0), (i1, v1)) = (pair[0], pair[1]);
        let step = (v1 - v0) / (i1 - i0) as f64;
        out.extend((1..=i1 - i0).map(|k| v0 + step * k as f64));
    }
    out
}

fn bars_from_lows(lows: &[f64]) -> Vec<PriceBar> {
    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    lows.iter()
        .enumerate()
        .map(|(i, &l)| {
            let date = start + chrono::Duration::days(i as i64);
            PriceBar::new(date, l + 1.0, l + 2.0, l, l + 1.0, 1000.0)
        })
        .collect()
}

fn double_bottom() -> Vec<PriceBar> {
    bars_from_lows(&path(&[
        (0, 105.0),
        (30, 105.0),
        (40, 100.0),
        (60, 108.0),
        (80, 101.0),
        (99, 103.85),
    ]))
}

fn with_tail(bars: &[PriceBar], close: f64, volume: f64) -> Vec<PriceBar> {
    let mut out = bars.to_vec();
    let n = out.len();
    for bar in &mut out[n - 3..] {
        bar.open = close;
        bar.close = close;
        bar.high = close + 0.5;
        bar.low = close - 0.5;
        bar.volume = volume;
    }
    out
}

fn tracker() -> PatternTracker {
    PatternTracker::new(
        EngineBuilder::new()
            .with_all_defaults()
            .only_patterns([PatternType::DoubleBottom])
            .build()
            .unwrap(),
    )
}

const WATCHLIST: [&str; 3] = ["A.NS", "B.NS", "C.NS"];

// ============================================================
// PASSES
// ============================================================

#[test]
fn test_tiered_passes_follow_price() {
    let tracker = tracker();
    let feed = Feed::default();
    let market = FixedMarket(70);
    let store = Store::default();
    let outbox = Outbox::default();

    let base = double_bottom();
    for s in WATCHLIST {
        feed.set(s, base.clone());
    }

    let scanner = Scanner::new(&tracker, &feed, &market, &store)
        .unwrap()
        .with_alerts(&outbox)
        .with_config(ScannerConfig {
            max_workers: 2,
            ..ScannerConfig::default()
        })
        .unwrap();

    let report = scanner.run_pass(Tier::Full, &WATCHLIST).unwrap();
    assert_eq!(report.tier, Tier::Full);
    assert_eq!(report.scanned, 3);
    assert_eq!(report.patterns_found, 3);
    assert!(report.errors.is_empty());
    assert_eq!(tracker.cache().symbols().len(), 3);

    // only A approaches its breakout with volume
    feed.set("A.NS", with_tail(&base, 109.6, 2000.0));
    let report = scanner.run_pass(Tier::Imminent, &WATCHLIST).unwrap();
    assert_eq!(report.patterns_found, 1);
    assert_eq!(
        store.rows.lock().unwrap()[&("A.NS".to_string(), PatternType::DoubleBottom)].state,
        PatternState::BreakoutImminent
    );

    // B breaks down; tier 2 drops it silently
    feed.set("B.NS", with_tail(&base, 95.0, 1000.0));
    let report = scanner.run_pass(Tier::Forming, &WATCHLIST).unwrap();
    assert_eq!(report.patterns_found, 0);
    assert!(tracker.cache().is_retired("B.NS", PatternType::DoubleBottom));
    assert_eq!(tracker.cache().len(), 2);

    // A breaks out
    feed.set("A.NS", with_tail(&base, 111.0, 2000.0));
    let report = scanner.run_pass(Tier::Confirmed, &WATCHLIST).unwrap();
    assert_eq!(report.patterns_found, 1);

    let sent = outbox.sent.lock().unwrap();
    assert_eq!(
        sent.iter().filter(|(state, _)| *state == PatternState::Forming).count(),
        3
    );
    assert!(sent.contains(&(PatternState::BreakoutImminent, "A.NS".to_string())));
    assert!(sent.contains(&(PatternState::BreakoutConfirmed, "A.NS".to_string())));
    assert_eq!(*store.writes.lock().unwrap(), 5);

    let stats = tracker.cache().stats();
    assert_eq!(stats.total_active, 2);
    assert_eq!(stats.confirmed, 1);
}

#[test]
fn test_full_pass_skips_retired_keys() {
    let tracker = tracker();
    let feed = Feed::default();
    let market = FixedMarket(50);
    let store = Store::default();
    let base = double_bottom();
    feed.set("A.NS", base.clone());

    let scanner = Scanner::new(&tracker, &feed, &market, &store).unwrap();
    scanner.run_pass(Tier::Full, &["A.NS"]).unwrap();

    feed.set("A.NS", with_tail(&base, 95.0, 1000.0));
    scanner.run_pass(Tier::Imminent, &["A.NS"]).unwrap();

    feed.set("A.NS", base);
    let report = scanner.run_pass(Tier::Full, &["A.NS"]).unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.patterns_found, 0);
}

#[test]
fn test_rescan_of_unknown_symbols_is_a_no_op() {
    let tracker = tracker();
    let feed = Feed::default();
    feed.set("A.NS", double_bottom());
    let market = FixedMarket(50);
    let store = Store::default();

    let scanner = Scanner::new(&tracker, &feed, &market, &store).unwrap();
    for tier in [Tier::Forming, Tier::Imminent, Tier::Confirmed] {
        let report = scanner.run_pass(tier, &["A.NS"]).unwrap();
        assert_eq!(report.patterns_found, 0);
    }
    assert!(tracker.cache().is_empty());
    assert_eq!(*store.writes.lock().unwrap(), 0);
}

#[test]
fn test_tier_numbers() {
    for tier in Tier::ALL {
        assert_eq!(Tier::from_number(tier.number()), Some(tier));
    }
    assert_eq!(Tier::from_number(0), None);
    assert_eq!(Tier::Confirmed.to_string(), "TIER4");
}
