//! Property tests for directional breach detection.
//!
//! For BUY: stop breached ⇔ price <= stop, target breached ⇔ price >= target.
//! For SELL the inequalities invert. Checked both on the raw comparison and
//! end-to-end through a sweep against a stored position.

use std::sync::Arc;

use chrono::Utc;
use exitguard_core::breach::{check_levels, levels_are_ordered};
use exitguard_core::config::MonitorConfig;
use exitguard_core::domain::{CloseReason, DeviceId, NewPosition, Side};
use exitguard_core::price::FixedPriceFeed;
use exitguard_core::{BreachMonitor, Database, DeviceRegistry, Ledger, PositionBook};
use proptest::prelude::*;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_level() -> impl Strategy<Value = f64> {
    (100.0..5000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

/// (side, stop, target) with the ordering a position must have at open.
fn arb_ordered_levels() -> impl Strategy<Value = (Side, f64, f64)> {
    (arb_side(), arb_level(), arb_level())
        .prop_filter("levels must differ", |(_, a, b)| a != b)
        .prop_map(|(side, a, b)| {
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            match side {
                Side::Buy => (side, lo, hi),
                Side::Sell => (side, hi, lo),
            }
        })
}

// ── Raw comparison ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn buy_flags_follow_inequalities(
        price in arb_level(),
        stop in arb_level(),
        target in arb_level(),
    ) {
        let flags = check_levels(Side::Buy, price, stop, target);
        prop_assert_eq!(flags.stop, price <= stop);
        prop_assert_eq!(flags.target, price >= target);
    }

    #[test]
    fn sell_flags_follow_inequalities(
        price in arb_level(),
        stop in arb_level(),
        target in arb_level(),
    ) {
        let flags = check_levels(Side::Sell, price, stop, target);
        prop_assert_eq!(flags.stop, price >= stop);
        prop_assert_eq!(flags.target, price <= target);
    }

    /// With ordered levels, stop and target can never both be breached.
    #[test]
    fn ordered_levels_never_double_breach(
        (side, stop, target) in arb_ordered_levels(),
        price in arb_level(),
    ) {
        prop_assert!(levels_are_ordered(side, stop, target));
        let flags = check_levels(side, price, stop, target);
        prop_assert!(!(flags.stop && flags.target));
    }
}

// ── Through the sweep ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A sweep issues a command exactly when a level is breached, with the
    /// matching reason and the breached level as expected price.
    #[test]
    fn sweep_matches_directional_rule(
        (side, stop, target) in arb_ordered_levels(),
        price in arb_level(),
    ) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let device = DeviceId::new("ea-prop");
        DeviceRegistry::new(db.clone()).register(&device, Utc::now()).unwrap();
        let book = PositionBook::new(db.clone());
        let ledger = Ledger::new(db);

        let position = book
            .open_position(
                NewPosition {
                    device_id: device,
                    instrument: "XAUUSD".into(),
                    side,
                    entry_price: (stop + target) / 2.0,
                    volume: 1.0,
                    stop_level: stop,
                    target_level: target,
                },
                Utc::now(),
            )
            .unwrap();

        let feed = Arc::new(FixedPriceFeed::with_quotes([("XAUUSD", price)]));
        let monitor = BreachMonitor::new(book, ledger.clone(), feed, MonitorConfig::default());
        let report = monitor.sweep(Utc::now()).unwrap();

        let flags = check_levels(side, price, stop, target);
        let command = ledger.active_for_position(position.id).unwrap();

        if flags.stop {
            let command = command.expect("stop breach must issue a command");
            prop_assert_eq!(command.reason, CloseReason::StopHit);
            prop_assert_eq!(command.expected_price, stop);
        } else if flags.target {
            let command = command.expect("target breach must issue a command");
            prop_assert_eq!(command.reason, CloseReason::TargetHit);
            prop_assert_eq!(command.expected_price, target);
        } else {
            prop_assert!(command.is_none());
            prop_assert_eq!(report.created, 0);
        }
    }
}
