//! Criterion benchmarks for the breach hot path.
//!
//! 1. Directional level checks over a batch of price observations
//! 2. A full sweep over many stored positions with no breaches

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use exitguard_core::breach::check_levels;
use exitguard_core::config::MonitorConfig;
use exitguard_core::domain::{DeviceId, NewPosition, Side};
use exitguard_core::price::FixedPriceFeed;
use exitguard_core::{BreachMonitor, Database, DeviceRegistry, Ledger, PositionBook};

// ── Helpers ──────────────────────────────────────────────────────────

fn observations(n: usize) -> Vec<(Side, f64, f64, f64)> {
    (0..n)
        .map(|i| {
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            let price = 2000.0 + (i as f64 * 0.37).sin() * 25.0;
            let (stop, target) = match side {
                Side::Buy => (1985.0, 2020.0),
                Side::Sell => (2015.0, 1980.0),
            };
            (side, price, stop, target)
        })
        .collect()
}

fn monitor_with_positions(n: usize) -> BreachMonitor {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let device = DeviceId::new("ea-bench");
    DeviceRegistry::new(db.clone())
        .register(&device, Utc::now())
        .unwrap();
    let book = PositionBook::new(db.clone());
    let instruments = ["XAUUSD", "EURUSD", "GBPUSD", "USDJPY"];

    for i in 0..n {
        let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
        let (stop, target) = match side {
            Side::Buy => (90.0, 110.0),
            Side::Sell => (110.0, 90.0),
        };
        book.open_position(
            NewPosition {
                device_id: device.clone(),
                instrument: instruments[i % instruments.len()].into(),
                side,
                entry_price: 100.0,
                volume: 1.0,
                stop_level: stop,
                target_level: target,
            },
            Utc::now(),
        )
        .unwrap();
    }

    let feed = Arc::new(FixedPriceFeed::with_quotes(
        instruments.iter().map(|s| (*s, 100.0)),
    ));
    BreachMonitor::new(book, Ledger::new(db), feed, MonitorConfig::default())
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_check_levels(c: &mut Criterion) {
    let obs = observations(10_000);
    c.bench_function("check_levels_10k", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for &(side, price, stop, target) in &obs {
                if check_levels(side, black_box(price), stop, target).any() {
                    hits += 1;
                }
            }
            hits
        })
    });
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    for n in [100usize, 1_000] {
        let monitor = monitor_with_positions(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| monitor.sweep(black_box(Utc::now())).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_check_levels, bench_sweep);
criterion_main!(benches);
