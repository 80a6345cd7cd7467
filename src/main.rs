//! Token Dispenser: Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HalHardware        LogEventSink   LogRemote     SystemClock   │
//! │  (HardwarePort)     (EventSink)    (RemoteSync)  (Clock)       │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Dispenser (pure logic)                    │    │
//! │  │  Rotor FSM · IR classifier · Player ledger             │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Scheduler (cooperative, single thread) · RemoteInbox          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{info, warn};

use dispenser::adapters::log_sink::LogEventSink;
use dispenser::adapters::remote_log::LogRemote;
use dispenser::adapters::signal;
use dispenser::adapters::sim;
use dispenser::adapters::time::SystemClock;
use dispenser::app::jobs;
use dispenser::app::service::{Dispenser, ExitReason, VERSION};
use dispenser::config::{read_area_id, DispenserConfig, DEFAULT_CONFIG_PATH};
use dispenser::scheduler::Scheduler;

/// Coins loaded into the simulated hopper.
const SIM_HOPPER_COINS: u32 = 200;

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("╔══════════════════════════════════════╗");
    info!("║  Dispenser v{}                       ║", VERSION);
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = DispenserConfig::load(&config_path)?;
    let area = read_area_id(&config.area_file)
        .with_context(|| format!("reading area id from {}", config.area_file))?;
    info!("Area: {}", area);

    // ── 3. Adapters ───────────────────────────────────────────
    let (hw, rotor) = sim::board(SIM_HOPPER_COINS);
    let remote = LogRemote::new(area.clone());
    let sink = LogEventSink::new();

    // ── 4. Service + scheduler ────────────────────────────────
    let mut sched = Scheduler::new(Box::new(SystemClock));
    sched.set_poll_period(config.poll_period());
    signal::stop_on_interrupt(sched.stop_handle()).context("installing interrupt handler")?;

    let mut app = Dispenser::new(config, area, hw, remote, sink, sched.now());
    app.start(sched.now());
    let handles = jobs::install(&mut sched, &mut app);
    info!("Jobs installed: {:?}", handles);

    // ── 5. Run ────────────────────────────────────────────────
    sched.run_forever(&mut app);

    // ── 6. Teardown ───────────────────────────────────────────
    app.close();
    match app.exit_reason() {
        Some(ExitReason::Update) => warn!("Stopped for update"),
        Some(ExitReason::Shutdown) => info!("Stopped by remote shutdown"),
        None => info!("Stopped by interrupt"),
    }
    info!("Hopper: {} coins left", rotor.coins());
    Ok(())
}
