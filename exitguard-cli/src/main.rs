//! ExitGuard CLI: run the service and administer devices and positions.
//!
//! Commands:
//! - `serve`: device gateway plus the periodic breach monitor
//! - `sweep`: one breach sweep, optionally against hand-entered quotes
//! - `device add|revoke|list`: manage execution agents and their secrets
//! - `position open|close|show`: operator-side position handling
//! - `commands stale`: active close commands past the stale threshold
//! - `report drift`: requested vs filled entries as CSV

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use exitguard_core::config::{span, PriceFeedConfig, MAX_SPAN_SECS};
use exitguard_core::domain::{CloseReason, DeviceId, NewPosition, PositionId, Side};
use exitguard_core::price::{parse_quote, CircuitBreaker, FixedPriceFeed, HttpPriceFeed, PriceFeed};
use exitguard_core::reconciliation::write_drift_csv;
use exitguard_core::{
    BreachMonitor, Database, DeviceRegistry, ExitGuardConfig, Ledger, PositionBook, Reconciler,
};
use exitguard_gateway::{serve, GatewayState};

const DEFAULT_CONFIG_FILE: &str = "exitguard.toml";

#[derive(Parser)]
#[command(
    name = "exitguard",
    version,
    about = "ExitGuard: server-side exit enforcement for remote execution agents"
)]
struct Cli {
    /// Path to the TOML config. Defaults to ./exitguard.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device gateway and the breach monitor until Ctrl-C.
    Serve,
    /// Run a single breach sweep and print its report.
    Sweep {
        /// Use these quotes instead of the HTTP feed (repeatable, e.g. XAUUSD=1989.5).
        #[arg(long = "quote", value_parser = parse_quote)]
        quotes: Vec<(String, f64)>,
    },
    /// Device registry commands.
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
    /// Position commands.
    Position {
        #[command(subcommand)]
        action: PositionAction,
    },
    /// Close-command queue inspection.
    #[command(name = "commands")]
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Reports.
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// Register a device and print its signing secret (shown once).
    Add { id: String },
    /// Revoke a device; its requests are rejected from now on.
    Revoke { id: String },
    /// List registered devices.
    List,
}

#[derive(Subcommand)]
enum PositionAction {
    /// Open a position with hidden exit levels.
    Open {
        #[arg(long)]
        device: String,
        #[arg(long)]
        instrument: String,
        /// BUY or SELL.
        #[arg(long)]
        side: Side,
        #[arg(long)]
        entry: f64,
        #[arg(long)]
        volume: f64,
        #[arg(long)]
        stop: f64,
        #[arg(long)]
        target: f64,
    },
    /// Issue a manual close command.
    Close {
        id: PositionId,
        /// Expected close price. Fetched from the price feed when omitted.
        #[arg(long)]
        price: Option<f64>,
    },
    /// Show a position and its close-command history.
    Show { id: PositionId },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List PENDING/ACKNOWLEDGED commands older than the threshold, as JSON lines.
    Stale {
        /// Override `monitor.stale_after_secs`.
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Entry drift (slippage, volume shortfall) as CSV.
    Drift {
        /// Output file. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => run_serve(config),
        Commands::Sweep { quotes } => run_sweep(config, quotes),
        Commands::Device { action } => run_device(config, action),
        Commands::Position { action } => run_position(config, action),
        Commands::Queue {
            action: QueueAction::Stale { older_than_secs },
        } => run_stale(config, older_than_secs),
        Commands::Report {
            action: ReportAction::Drift { output },
        } => run_drift(config, output),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ExitGuardConfig> {
    match path {
        Some(path) => ExitGuardConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            ExitGuardConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load {DEFAULT_CONFIG_FILE}"))
        }
        None => Ok(ExitGuardConfig::default()),
    }
}

fn open_db(config: &ExitGuardConfig) -> Result<Arc<Database>> {
    let db = Database::open(&config.database.path).with_context(|| {
        format!("failed to open database {}", config.database.path.display())
    })?;
    Ok(Arc::new(db))
}

/// The blocking HTTP client must be built outside any async runtime.
fn http_feed(config: &PriceFeedConfig) -> Result<Arc<HttpPriceFeed>> {
    let breaker = Arc::new(CircuitBreaker::new(
        Duration::from_secs(config.cooldown_secs),
        config.failure_threshold,
    ));
    let feed = HttpPriceFeed::new(
        &config.base_url,
        Duration::from_secs(config.timeout_secs),
        breaker,
    )?;
    Ok(Arc::new(feed))
}

// ─── serve ──────────────────────────────────────────────────────────

fn run_serve(config: ExitGuardConfig) -> Result<()> {
    let db = open_db(&config)?;
    let feed = http_feed(&config.price_feed)?;
    let monitor = BreachMonitor::new(
        PositionBook::new(db.clone()),
        Ledger::new(db.clone()),
        feed,
        config.monitor.clone(),
    );

    let (stop_tx, stop_rx) = mpsc::channel();
    let monitor_thread = std::thread::Builder::new()
        .name("breach-monitor".into())
        .spawn(move || monitor.run(stop_rx))
        .context("failed to start breach monitor thread")?;

    let state = Arc::new(GatewayState::new(db, &config.gateway));
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let served = runtime.block_on(serve(state, &config.gateway, shutdown_signal()));

    // The monitor exits on the signal or when the sender drops.
    let _ = stop_tx.send(());
    monitor_thread
        .join()
        .map_err(|_| anyhow!("breach monitor thread panicked"))?;

    served.context("gateway server failed")?;
    info!("exitguard stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
    }
}

// ─── sweep ──────────────────────────────────────────────────────────

fn run_sweep(config: ExitGuardConfig, quotes: Vec<(String, f64)>) -> Result<()> {
    let db = open_db(&config)?;
    let feed: Arc<dyn PriceFeed> = if quotes.is_empty() {
        http_feed(&config.price_feed)?
    } else {
        Arc::new(FixedPriceFeed::with_quotes(quotes))
    };

    let monitor = BreachMonitor::new(
        PositionBook::new(db.clone()),
        Ledger::new(db),
        feed,
        config.monitor.clone(),
    );
    let report = monitor.sweep(Utc::now())?;

    println!("Evaluated:        {}", report.evaluated);
    println!("Commands created: {}", report.created);
    println!("Already active:   {}", report.already_active);
    println!("Skipped (price):  {}", report.skipped_no_price);
    println!("Errors:           {}", report.errors);
    for id in &report.created_commands {
        println!("  new command {id}");
    }
    Ok(())
}

// ─── device ─────────────────────────────────────────────────────────

fn run_device(config: ExitGuardConfig, action: DeviceAction) -> Result<()> {
    let registry = DeviceRegistry::new(open_db(&config)?);

    match action {
        DeviceAction::Add { id } => {
            let id = DeviceId::new(id);
            let secret = registry.register(&id, Utc::now())?;
            println!("Device: {id}");
            println!("Secret: {secret}");
            println!("Store the secret in the EA settings now; it is not shown again.");
        }
        DeviceAction::Revoke { id } => {
            let id = DeviceId::new(id);
            registry.revoke(&id)?;
            println!("Revoked {id}");
        }
        DeviceAction::List => {
            let devices = registry.list()?;
            if devices.is_empty() {
                println!("No devices registered.");
            }
            for d in devices {
                let state = if d.revoked { "revoked" } else { "active" };
                println!("{:<24} {:<8} {}", d.id, state, d.created_at.to_rfc3339());
            }
        }
    }
    Ok(())
}

// ─── position ───────────────────────────────────────────────────────

fn run_position(config: ExitGuardConfig, action: PositionAction) -> Result<()> {
    let db = open_db(&config)?;
    let book = PositionBook::new(db.clone());
    let ledger = Ledger::new(db);

    match action {
        PositionAction::Open {
            device,
            instrument,
            side,
            entry,
            volume,
            stop,
            target,
        } => {
            let position = book.open_position(
                NewPosition {
                    device_id: DeviceId::new(device),
                    instrument,
                    side,
                    entry_price: entry,
                    volume,
                    stop_level: stop,
                    target_level: target,
                },
                Utc::now(),
            )?;
            println!("Opened {}", position.id);
        }
        PositionAction::Close { id, price } => {
            let position = book.get(id)?;
            if position.is_closed() {
                bail!("position {id} is already closed");
            }
            let price = match price {
                Some(p) => p,
                None => http_feed(&config.price_feed)?
                    .last_price(&position.instrument)
                    .with_context(|| format!("no price for {}", position.instrument))?,
            };
            let command = ledger.create(id, CloseReason::Manual, price, Utc::now())?;
            println!("Issued close command {} for {id}", command.id);
        }
        PositionAction::Show { id } => {
            let p = book.get(id)?;
            println!("Position:   {}", p.id);
            println!("Device:     {}", p.device_id);
            println!("Instrument: {} {}", p.side, p.instrument);
            println!("Status:     {}", p.status);
            println!(
                "Entry:      requested {} x {}, filled {} x {}",
                p.requested_entry_price,
                p.requested_volume,
                fmt_opt(p.actual_entry_price),
                fmt_opt(p.filled_volume)
            );
            println!("Opened:     {}", p.opened_at.to_rfc3339());
            if let (Some(price), Some(reason), Some(at)) = (p.close_price, p.close_reason, p.closed_at) {
                println!("Closed:     {price} ({reason}) at {}", at.to_rfc3339());
            }

            let history = ledger.history(id)?;
            if !history.is_empty() {
                println!("Close commands:");
            }
            for c in history {
                println!(
                    "  {} {:<12} {:<14} created {}{}",
                    c.id,
                    c.status,
                    c.reason,
                    c.created_at.to_rfc3339(),
                    c.error_message
                        .as_deref()
                        .map(|m| format!(" error: {m}"))
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| "-".to_string())
}

// ─── commands stale ─────────────────────────────────────────────────

fn run_stale(config: ExitGuardConfig, older_than_secs: Option<u64>) -> Result<()> {
    let ledger = Ledger::new(open_db(&config)?);
    let threshold = match older_than_secs {
        Some(secs) if secs <= MAX_SPAN_SECS => span(secs),
        Some(_) => bail!("--older-than-secs must be at most {MAX_SPAN_SECS}"),
        None => config.monitor.stale_after(),
    };
    let now = Utc::now();

    for c in ledger.stale_commands(now, threshold)? {
        let line = serde_json::json!({
            "command_id": c.id,
            "position_id": c.position_id,
            "device_id": c.device_id,
            "status": c.status,
            "reason": c.reason,
            "created_at": c.created_at,
            "age_secs": (now - c.created_at).num_seconds(),
        });
        println!("{line}");
    }
    Ok(())
}

// ─── report drift ───────────────────────────────────────────────────

fn run_drift(config: ExitGuardConfig, output: Option<PathBuf>) -> Result<()> {
    let rows = Reconciler::new(open_db(&config)?).drift_report()?;

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_drift_csv(&rows, file).context("failed to write drift CSV")?;
            println!("Wrote {} rows to {}", rows.len(), path.display());
        }
        None => {
            write_drift_csv(&rows, std::io::stdout().lock()).context("failed to write drift CSV")?;
        }
    }
    Ok(())
}
