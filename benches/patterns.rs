//! Benchmarks for chart-pattern detection and tier re-scans.

use breakout_scan::prelude::*;
use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Generate realistic daily bars
fn generate_bars(n: usize) -> Vec<PriceBar> {
  let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
  let mut bars = Vec::with_capacity(n);
  let mut price = 100.0;

  for i in 0..n {
    let change = ((i * 7 + 13) % 100) as f64 / 50.0 - 1.0; // Deterministic "random"
    let volatility = 2.0 + ((i * 3) % 10) as f64 / 5.0;
    let volume = 1000.0 + ((i * 11) % 17) as f64 * 60.0;

    let o = price;
    let c = (price + change).max(5.0);
    let h = o.max(c) + volatility * 0.5;
    let l = o.min(c) - volatility * 0.5;

    let date = start + chrono::Duration::days(i as i64);
    bars.push(PriceBar::new(date, o, h, l, c, volume));
    price = c;
  }

  bars
}

fn bench_single_pattern(c: &mut Criterion) {
  let bars = generate_bars(250);
  let detector = DoubleBottomDetector::default();

  c.bench_function("double_bottom_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(detector.scan(black_box(&bars), "BENCH", 50));
    })
  });
}

fn bench_all_patterns(c: &mut Criterion) {
  let bars = generate_bars(250);
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

  c.bench_function("detect_all_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.detect_all(black_box(&bars), "BENCH", 50));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

  let mut group = c.benchmark_group("scaling");

  for size in [60, 250, 500, 1000].iter() {
    let bars = generate_bars(*size);

    group.bench_with_input(BenchmarkId::new("detect_all", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(engine.detect_all(black_box(&bars), "BENCH", 50));
      })
    });
  }

  group.finish();
}

fn bench_rescan(c: &mut Criterion) {
  let bars = generate_bars(250);
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
  let tracker = PatternTracker::new(engine);

  let symbols: Vec<String> = (0..50).map(|i| format!("SYM{i}")).collect();
  for s in &symbols {
    tracker.detect_all(&bars, s, 50);
  }

  c.bench_function("rescan_imminent_50_symbols", |b| {
    b.iter(|| {
      for s in &symbols {
        let _ = black_box(tracker.rescan_imminent(black_box(&bars), s, 50));
      }
    })
  });
}

fn bench_context_computation(c: &mut Criterion) {
  let bars = generate_bars(250);
  let engine = EngineBuilder::new().with_all_defaults().build().unwrap();

  c.bench_function("compute_context_250_bars", |b| {
    b.iter(|| {
      let _ = black_box(engine.compute_context(black_box(&bars), black_box(50)));
    })
  });
}

criterion_group!(
  benches,
  bench_single_pattern,
  bench_all_patterns,
  bench_scaling,
  bench_rescan,
  bench_context_computation,
);

criterion_main!(benches);
