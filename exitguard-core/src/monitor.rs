//! Breach monitor: the periodic sweep that turns breached positions into close commands.
//!
//! One sweep walks every monitorable position, asks the price feed for the
//! instrument's last price, and issues at most one command per position through
//! [`Ledger::create_if_none_active`]. A failure on one position is logged and
//! counted; the sweep carries on with the rest.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::book::{PositionBook, PositionError};
use crate::breach;
use crate::config::MonitorConfig;
use crate::domain::{CloseReason, CommandId, Position};
use crate::ledger::{Ledger, LedgerError};
use crate::price::PriceFeed;

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub created: usize,
    /// Breached, but an active command already covered the position.
    pub already_active: usize,
    pub skipped_no_price: usize,
    pub errors: usize,
    pub created_commands: Vec<CommandId>,
}

impl SweepReport {
    fn is_quiet(&self) -> bool {
        self.created == 0 && self.skipped_no_price == 0 && self.errors == 0
    }
}

enum Decision {
    Hold,
    Close { reason: CloseReason, expected_price: f64 },
}

/// The sweep component, with its storage and price dependencies injected.
pub struct BreachMonitor {
    book: PositionBook,
    ledger: Ledger,
    feed: Arc<dyn PriceFeed>,
    config: MonitorConfig,
}

impl BreachMonitor {
    pub fn new(
        book: PositionBook,
        ledger: Ledger,
        feed: Arc<dyn PriceFeed>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            book,
            ledger,
            feed,
            config,
        }
    }

    /// Run one sweep as of `now`.
    ///
    /// Only a failure to load the position list aborts the sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, PositionError> {
        let positions = self.book.monitorable()?;
        let mut report = SweepReport::default();
        // One quote per instrument per sweep; `None` marks a failed lookup.
        let mut quotes: HashMap<String, Option<f64>> = HashMap::new();

        for position in &positions {
            report.evaluated += 1;

            let Some(price) = self.quote(&mut quotes, &position.instrument) else {
                report.skipped_no_price += 1;
                continue;
            };

            let (reason, expected_price) = match self.decide(position, price, now) {
                Decision::Hold => continue,
                Decision::Close {
                    reason,
                    expected_price,
                } => (reason, expected_price),
            };

            match self
                .ledger
                .create_if_none_active(position.id, reason, expected_price, now)
            {
                Ok(Some(command)) => {
                    report.created += 1;
                    report.created_commands.push(command.id);
                }
                Ok(None) => report.already_active += 1,
                Err(LedgerError::PositionClosed(_)) => {
                    // Closed by an ack between the list and this check.
                    debug!(position_id = %position.id, "position closed during sweep");
                }
                Err(err) => {
                    report.errors += 1;
                    warn!(
                        position_id = %position.id,
                        error = %err,
                        "failed to issue close command, retrying next sweep"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Sweep, then wait one interval, until `stop` fires or its sender is dropped.
    pub fn run(&self, stop: Receiver<()>) {
        info!(
            interval_secs = self.config.interval_secs,
            feed = self.feed.name(),
            "breach monitor started"
        );

        loop {
            match self.sweep(Utc::now()) {
                Ok(report) if report.is_quiet() => debug!(
                    evaluated = report.evaluated,
                    already_active = report.already_active,
                    "sweep complete"
                ),
                Ok(report) => info!(
                    evaluated = report.evaluated,
                    created = report.created,
                    already_active = report.already_active,
                    skipped_no_price = report.skipped_no_price,
                    errors = report.errors,
                    "sweep complete"
                ),
                Err(err) => error!(error = %err, "sweep aborted: could not load positions"),
            }

            match stop.recv_timeout(self.config.interval()) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("breach monitor stopped");
    }

    fn quote(&self, quotes: &mut HashMap<String, Option<f64>>, instrument: &str) -> Option<f64> {
        match quotes.entry(instrument.to_string()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let price = match self.feed.last_price(instrument) {
                    Ok(price) => Some(price),
                    Err(err) => {
                        warn!(
                            instrument,
                            feed = self.feed.name(),
                            error = %err,
                            "no price, skipping instrument this sweep"
                        );
                        None
                    }
                };
                *entry.insert(price)
            }
        }
    }

    /// Hidden-level breaches take precedence over the holding-time limit.
    fn decide(&self, position: &Position, price: f64, now: DateTime<Utc>) -> Decision {
        if let Some(hit) = breach::evaluate(position.side, price, position.exit_levels()) {
            return Decision::Close {
                reason: hit.reason,
                expected_price: hit.level,
            };
        }

        match self.config.max_holding() {
            Some(limit) if position.holding_duration(now) >= limit => Decision::Close {
                reason: CloseReason::MaxDuration,
                expected_price: price,
            },
            _ => Decision::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceRegistry;
    use crate::domain::{CommandStatus, DeviceId, NewPosition, PositionStatus, Side};
    use crate::price::{FixedPriceFeed, PriceError};
    use crate::store::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        book: PositionBook,
        ledger: Ledger,
        device: DeviceId,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let device = DeviceId::new("ea-1");
        DeviceRegistry::new(db.clone())
            .register(&device, Utc::now())
            .unwrap();
        Fixture {
            book: PositionBook::new(db.clone()),
            ledger: Ledger::new(db),
            device,
        }
    }

    fn open(fx: &Fixture, instrument: &str, side: Side, stop: f64, target: f64) -> Position {
        fx.book
            .open_position(
                NewPosition {
                    device_id: fx.device.clone(),
                    instrument: instrument.into(),
                    side,
                    entry_price: 2000.0,
                    volume: 1.0,
                    stop_level: stop,
                    target_level: target,
                },
                Utc::now(),
            )
            .unwrap()
    }

    fn monitor(fx: &Fixture, feed: Arc<dyn PriceFeed>, config: MonitorConfig) -> BreachMonitor {
        BreachMonitor::new(fx.book.clone(), fx.ledger.clone(), feed, config)
    }

    #[test]
    fn no_breach_no_command() {
        let fx = fixture();
        let position = open(&fx, "XAUUSD", Side::Buy, 1990.0, 2020.0);
        let feed = Arc::new(FixedPriceFeed::with_quotes([("XAUUSD", 2005.0)]));
        let report = monitor(&fx, feed, MonitorConfig::default())
            .sweep(Utc::now())
            .unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.created, 0);
        assert!(fx.ledger.active_for_position(position.id).unwrap().is_none());
        assert_eq!(fx.book.get(position.id).unwrap().status, PositionStatus::Open);
    }

    #[test]
    fn stop_breach_records_level_not_market_price() {
        let fx = fixture();
        let position = open(&fx, "XAUUSD", Side::Buy, 1990.0, 2020.0);
        let feed = Arc::new(FixedPriceFeed::with_quotes([("XAUUSD", 1989.0)]));
        let report = monitor(&fx, feed, MonitorConfig::default())
            .sweep(Utc::now())
            .unwrap();
        assert_eq!(report.created, 1);

        let command = fx.ledger.active_for_position(position.id).unwrap().unwrap();
        assert_eq!(command.reason, CloseReason::StopHit);
        assert_eq!(command.expected_price, 1990.0);
        assert_eq!(command.status, CommandStatus::Pending);
        assert_eq!(report.created_commands, vec![command.id]);
    }

    #[test]
    fn missing_price_skips_only_that_position() {
        let fx = fixture();
        let quoted = open(&fx, "XAUUSD", Side::Buy, 1990.0, 2020.0);
        let unquoted = open(&fx, "EURUSD", Side::Buy, 1.05, 1.15);
        let feed = Arc::new(FixedPriceFeed::with_quotes([("XAUUSD", 2021.0)]));
        let report = monitor(&fx, feed, MonitorConfig::default())
            .sweep(Utc::now())
            .unwrap();

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.skipped_no_price, 1);
        assert_eq!(report.created, 1);
        assert!(fx.ledger.active_for_position(quoted.id).unwrap().is_some());
        assert!(fx.ledger.active_for_position(unquoted.id).unwrap().is_none());
    }

    #[test]
    fn second_sweep_hits_guard() {
        let fx = fixture();
        open(&fx, "XAUUSD", Side::Sell, 2010.0, 1990.0);
        let feed = Arc::new(FixedPriceFeed::with_quotes([("XAUUSD", 2011.0)]));
        let monitor = monitor(&fx, feed, MonitorConfig::default());

        assert_eq!(monitor.sweep(Utc::now()).unwrap().created, 1);
        let again = monitor.sweep(Utc::now()).unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.already_active, 1);
    }

    #[test]
    fn max_holding_uses_live_price() {
        let fx = fixture();
        let position = open(&fx, "XAUUSD", Side::Buy, 1990.0, 2020.0);
        let feed = Arc::new(FixedPriceFeed::with_quotes([("XAUUSD", 2003.5)]));
        let config = MonitorConfig {
            max_holding_secs: Some(3600),
            ..MonitorConfig::default()
        };
        let monitor = monitor(&fx, feed, config);

        assert_eq!(monitor.sweep(position.opened_at).unwrap().created, 0);

        let later = position.opened_at + chrono::Duration::hours(2);
        assert_eq!(monitor.sweep(later).unwrap().created, 1);
        let command = fx.ledger.active_for_position(position.id).unwrap().unwrap();
        assert_eq!(command.reason, CloseReason::MaxDuration);
        assert_eq!(command.expected_price, 2003.5);
    }

    struct CountingFeed {
        calls: AtomicUsize,
    }

    impl PriceFeed for CountingFeed {
        fn name(&self) -> &str {
            "counting"
        }

        fn last_price(&self, _instrument: &str) -> Result<f64, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PriceError::NetworkUnreachable("down".into()))
        }
    }

    #[test]
    fn failed_quote_is_asked_once_per_sweep() {
        let fx = fixture();
        open(&fx, "XAUUSD", Side::Buy, 1990.0, 2020.0);
        open(&fx, "XAUUSD", Side::Sell, 2010.0, 1990.0);
        let feed = Arc::new(CountingFeed {
            calls: AtomicUsize::new(0),
        });
        let report = monitor(&fx, feed.clone(), MonitorConfig::default())
            .sweep(Utc::now())
            .unwrap();
        assert_eq!(report.skipped_no_price, 2);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_exits_on_stop_signal() {
        let fx = fixture();
        let feed = Arc::new(FixedPriceFeed::new());
        let monitor = monitor(&fx, feed, MonitorConfig::default());
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(()).unwrap();
        monitor.run(rx);
    }
}
