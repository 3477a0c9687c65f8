//! End-to-end lifecycles: open → sweep → command → device ack.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use exitguard_core::config::MonitorConfig;
use exitguard_core::domain::{
    AckOutcome, CloseReason, CommandStatus, DeviceId, NewPosition, Position, PositionStatus, Side,
};
use exitguard_core::price::FixedPriceFeed;
use exitguard_core::{BreachMonitor, Database, DeviceRegistry, Ledger, PositionBook};

struct World {
    book: PositionBook,
    ledger: Ledger,
    feed: Arc<FixedPriceFeed>,
    monitor: Arc<BreachMonitor>,
    device: DeviceId,
}

fn world() -> World {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let device = DeviceId::new("ea-london-01");
    DeviceRegistry::new(db.clone())
        .register(&device, Utc::now())
        .unwrap();
    let book = PositionBook::new(db.clone());
    let ledger = Ledger::new(db);
    let feed = Arc::new(FixedPriceFeed::new());
    let monitor = Arc::new(BreachMonitor::new(
        book.clone(),
        ledger.clone(),
        feed.clone(),
        MonitorConfig::default(),
    ));
    World {
        book,
        ledger,
        feed,
        monitor,
        device,
    }
}

fn open(w: &World, side: Side, stop: f64, target: f64) -> Position {
    w.book
        .open_position(
            NewPosition {
                device_id: w.device.clone(),
                instrument: "XAUUSD".into(),
                side,
                entry_price: 2000.0,
                volume: 0.1,
                stop_level: stop,
                target_level: target,
            },
            Utc::now(),
        )
        .unwrap()
}

#[test]
fn buy_stop_hit_then_executed_closes_position() {
    let w = world();
    let p = open(&w, Side::Buy, 1990.0, 2020.0);
    w.feed.set("XAUUSD", 1989.0);

    let report = w.monitor.sweep(Utc::now()).unwrap();
    assert_eq!(report.created, 1);

    let pending = w.ledger.pending_for_device(&w.device, true).unwrap();
    assert_eq!(pending.len(), 1);
    let cmd = &pending[0].command;
    assert_eq!(cmd.position_id, p.id);
    assert_eq!(cmd.reason, CloseReason::StopHit);
    assert_eq!(cmd.expected_price, 1990.0);
    assert_eq!(w.book.get(p.id).unwrap().status, PositionStatus::Closing);

    let done = w
        .ledger
        .apply_ack(
            cmd.id,
            &w.device,
            AckOutcome::Executed {
                actual_close_price: 1988.5,
                broker_reference: None,
            },
            Utc::now(),
        )
        .unwrap();
    assert_eq!(done.status, CommandStatus::Executed);

    let closed = w.book.get(p.id).unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::StopHit));
    assert_eq!(closed.close_price, Some(1988.5));
    assert!(closed.closed_at.is_some());

    // Closed positions drop out of the sweep.
    assert_eq!(w.monitor.sweep(Utc::now()).unwrap().evaluated, 0);
}

#[test]
fn sell_levels_fire_on_inverted_comparisons() {
    let w = world();
    let stop_case = open(&w, Side::Sell, 2010.0, 1990.0);
    w.feed.set("XAUUSD", 2011.0);
    w.monitor.sweep(Utc::now()).unwrap();
    let cmd = w
        .ledger
        .active_for_position(stop_case.id)
        .unwrap()
        .unwrap();
    assert_eq!(cmd.reason, CloseReason::StopHit);
    assert_eq!(cmd.expected_price, 2010.0);

    let w = world();
    let target_case = open(&w, Side::Sell, 2010.0, 1990.0);
    w.feed.set("XAUUSD", 1989.0);
    w.monitor.sweep(Utc::now()).unwrap();
    let cmd = w
        .ledger
        .active_for_position(target_case.id)
        .unwrap()
        .unwrap();
    assert_eq!(cmd.reason, CloseReason::TargetHit);
    assert_eq!(cmd.expected_price, 1990.0);
}

#[test]
fn overlapping_sweeps_create_one_command() {
    let w = world();
    let p = open(&w, Side::Buy, 1990.0, 2020.0);
    w.feed.set("XAUUSD", 1985.0);

    let sweeps = 4;
    let barrier = Arc::new(Barrier::new(sweeps));
    let handles: Vec<_> = (0..sweeps)
        .map(|_| {
            let monitor = w.monitor.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                monitor.sweep(Utc::now()).unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(reports.iter().map(|r| r.created).sum::<usize>(), 1);
    assert_eq!(
        reports.iter().map(|r| r.already_active).sum::<usize>(),
        sweeps - 1
    );
    assert_eq!(w.ledger.history(p.id).unwrap().len(), 1);
}

#[test]
fn failed_close_gets_fresh_command_on_next_sweep() {
    let w = world();
    let p = open(&w, Side::Buy, 1990.0, 2020.0);
    w.feed.set("XAUUSD", 1989.0);
    w.monitor.sweep(Utc::now()).unwrap();
    let first = w.ledger.active_for_position(p.id).unwrap().unwrap();

    let failed = w
        .ledger
        .apply_ack(
            first.id,
            &w.device,
            AckOutcome::Failed {
                error_message: "requote".into(),
            },
            Utc::now(),
        )
        .unwrap();
    assert_eq!(failed.status, CommandStatus::Failed);
    assert_eq!(w.book.get(p.id).unwrap().status, PositionStatus::Closing);
    assert!(w.ledger.active_for_position(p.id).unwrap().is_none());

    // Price has rallied through the target by the next sweep.
    w.feed.set("XAUUSD", 2025.0);
    let report = w.monitor.sweep(Utc::now()).unwrap();
    assert_eq!(report.created, 1);

    let second = w.ledger.active_for_position(p.id).unwrap().unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.reason, CloseReason::TargetHit);
    assert_eq!(second.expected_price, 2020.0);

    let history = w.ledger.history(p.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first.id);
    assert_eq!(history[0].status, CommandStatus::Failed);
}

#[test]
fn closing_position_without_breach_waits() {
    let w = world();
    let p = open(&w, Side::Buy, 1990.0, 2020.0);
    w.feed.set("XAUUSD", 1989.0);
    w.monitor.sweep(Utc::now()).unwrap();
    let cmd = w.ledger.active_for_position(p.id).unwrap().unwrap();
    w.ledger
        .apply_ack(
            cmd.id,
            &w.device,
            AckOutcome::Failed {
                error_message: "market closed".into(),
            },
            Utc::now(),
        )
        .unwrap();

    w.feed.set("XAUUSD", 2005.0);
    assert_eq!(w.monitor.sweep(Utc::now()).unwrap().created, 0);
    assert_eq!(w.book.get(p.id).unwrap().status, PositionStatus::Closing);
}
