//! Pairlink: headless Bluetooth pairing agent and device state coordinator
//! for audio receivers.
//!
//! Architecture:
//! - **Console loop** (main): reads operator commands from stdin, prints
//!   pairing prompts and device state.
//! - **BT worker** (tokio task): owns the bluer Session, the registered agent
//!   and the adapter, talks D-Bus.
//! - Two `mpsc` channels bridge them: `BtCommand` (console→worker), `BtEvent`
//!   (worker→console).
//!
//! The console never touches D-Bus. The worker never touches stdin/stdout.

mod bluetooth;
mod config;
mod console;
mod event;

use std::time::Duration;

use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bluetooth::types::BtCommand;
use console::{AppAction, Console};
use event::Event;

/// How long the worker gets to close the pairing window on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // ── Error handling & logging ─────────────────────────────────────────
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr) // stdout belongs to the console sink
        .init();

    config::init()?;
    info!("Pairlink starting");

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run());
    // The stdin reader may still be parked in a blocking read; don't wait on it.
    runtime.shutdown_background();
    info!("Pairlink exiting");
    result
}

async fn run() -> Result<()> {
    // ── Channel setup ───────────────────────────────────────────────────
    let (bt_cmd_tx, bt_cmd_rx) = mpsc::channel::<BtCommand>(32);
    let (bt_evt_tx, bt_evt_rx) = mpsc::channel(64);

    // ── Spawn Bluetooth worker ──────────────────────────────────────────
    let worker = tokio::spawn(bluetooth::worker::run(bt_cmd_rx, bt_evt_tx));

    let mut console = Console::new();
    let mut events = event::EventHandler::new(bt_evt_rx)?;
    println!("Type `help` for commands.");

    // ── Main event loop ─────────────────────────────────────────────────
    while console.running {
        match events.next().await? {
            Event::Line(line) => match console.handle_line(&line) {
                AppAction::Quit => console.running = false,
                AppAction::BtCommand(cmd) => {
                    if bt_cmd_tx.send(cmd).await.is_err() {
                        warn!("Bluetooth worker is gone; command dropped");
                    }
                }
                AppAction::Consumed => {}
            },
            Event::Bluetooth(bt_event) => console.handle_bt_event(bt_event),
            Event::Shutdown => {
                info!("Shutdown signal received");
                console.running = false;
            }
        }

        for line in console.take_output() {
            println!("{line}");
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────────
    // Closing the command channel stops the worker; dropping the event
    // receiver keeps it from blocking on a full channel meanwhile.
    drop(bt_cmd_tx);
    drop(events);
    match tokio::time::timeout(SHUTDOWN_GRACE, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Bluetooth worker failed: {e}"),
        Err(_) => warn!("Bluetooth worker did not stop in time"),
    }
    Ok(())
}
