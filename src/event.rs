//! Unified event loop that merges console input lines, Bluetooth worker
//! events and process signals into a single async stream.
//!
//! The main loop awaits `EventHandler::next()` to process all three sources
//! in arrival order.

use color_eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;

use crate::bluetooth::types::BtEvent;

/// Unified event type consumed by the main loop.
#[derive(Debug)]
pub enum Event {
    /// A line typed on the console (without the trailing newline).
    Line(String),
    /// An event from the Bluetooth worker task.
    Bluetooth(BtEvent),
    /// Ctrl-C or SIGTERM.
    Shutdown,
}

type ConsoleLines = Lines<BufReader<Stdin>>;

pub struct EventHandler {
    /// `None` once stdin hit EOF; the process keeps serving Bluetooth.
    stdin: Option<ConsoleLines>,
    sigterm: Signal,
    /// Receiver end of the BT worker → console channel.
    bt_rx: mpsc::Receiver<BtEvent>,
}

impl EventHandler {
    pub fn new(bt_rx: mpsc::Receiver<BtEvent>) -> Result<Self> {
        Ok(Self {
            stdin: Some(BufReader::new(tokio::io::stdin()).lines()),
            sigterm: signal(SignalKind::terminate())?,
            bt_rx,
        })
    }

    pub async fn next(&mut self) -> Result<Event> {
        loop {
            let line = tokio::select! {
                // ── Bluetooth events (highest priority) ─────────────────
                Some(bt_event) = self.bt_rx.recv() => {
                    return Ok(Event::Bluetooth(bt_event));
                }

                // ── Signals ─────────────────────────────────────────────
                _ = tokio::signal::ctrl_c() => return Ok(Event::Shutdown),
                _ = self.sigterm.recv() => return Ok(Event::Shutdown),

                // ── Console input ───────────────────────────────────────
                line = next_line(&mut self.stdin) => line?,
            };

            match line {
                Some(line) => return Ok(Event::Line(line)),
                None => {
                    info!("Console input closed; still serving pairing requests");
                    self.stdin = None;
                }
            }
        }
    }
}

async fn next_line(stdin: &mut Option<ConsoleLines>) -> std::io::Result<Option<String>> {
    match stdin {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}
