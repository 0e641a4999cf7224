//! Async Bluetooth worker task.
//!
//! Owns the `bluer::Session`, the registered agent and the adapter. Listens
//! for `BtCommand`s from the console and emits `BtEvent`s back. Long device
//! operations run on their own tasks so a slow connect never holds up a
//! pairing decision.

use std::sync::Arc;

use bluer::Session;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::adapter::AdapterController;
use super::agent::{self, PairingAgent};
use super::coordinator::DeviceCoordinator;
use super::stack::{BluerStack, BluetoothStack};
use super::types::*;
use crate::config::{DevicesConfig, GeneralConfig, PairingConfig};

/// The three components wired together over one stack.
pub struct Bluetooth<S> {
    agent: Arc<PairingAgent<S>>,
    devices: Arc<DeviceCoordinator<S>>,
    adapter: Arc<AdapterController<S>>,
    evt_tx: mpsc::Sender<BtEvent>,
    auto_trust_on_accept: bool,
}

impl<S> Clone for Bluetooth<S> {
    fn clone(&self) -> Self {
        Self {
            agent: Arc::clone(&self.agent),
            devices: Arc::clone(&self.devices),
            adapter: Arc::clone(&self.adapter),
            evt_tx: self.evt_tx.clone(),
            auto_trust_on_accept: self.auto_trust_on_accept,
        }
    }
}

impl<S: BluetoothStack> Bluetooth<S> {
    pub fn new(
        stack: Arc<S>,
        pairing: PairingConfig,
        devices: DevicesConfig,
        evt_tx: mpsc::Sender<BtEvent>,
    ) -> Self {
        let auto_trust_on_accept = pairing.auto_trust_on_accept;
        let coordinator = Arc::new(DeviceCoordinator::new(Arc::clone(&stack), devices));
        let agent = Arc::new(PairingAgent::new(
            Arc::clone(&stack),
            Arc::clone(&coordinator),
            pairing,
            evt_tx.clone(),
        ));
        Self {
            agent,
            devices: coordinator,
            adapter: Arc::new(AdapterController::new(stack)),
            evt_tx,
            auto_trust_on_accept,
        }
    }

    pub fn agent(&self) -> Arc<PairingAgent<S>> {
        Arc::clone(&self.agent)
    }

    /// Apply the configured identity and open the pairing window.
    pub async fn startup(&self, general: &GeneralConfig) {
        if let Err(e) = self.adapter.set_alias(&general.device_name).await {
            warn!("Failed to set adapter alias: {e}");
        }
        if general.discoverable_on_startup {
            if let Err(e) = self.adapter.set_discoverable(true, 0).await {
                warn!("Failed to make adapter discoverable: {e}");
            }
            if let Err(e) = self.adapter.set_pairable(true, 0).await {
                warn!("Failed to make adapter pairable: {e}");
            }
        }
    }

    /// Reject whatever is still pending and close the pairing window opened
    /// by [`Bluetooth::startup`].
    pub async fn shutdown(&self, general: &GeneralConfig) {
        if !self.agent.pending_requests().is_empty() {
            self.agent.cancel();
        }
        if !general.discoverable_on_startup {
            return;
        }
        if let Err(e) = self.adapter.set_discoverable(false, 0).await {
            debug!("Failed to disable discoverable on shutdown: {e}");
        }
        if let Err(e) = self.adapter.set_pairable(false, 0).await {
            debug!("Failed to disable pairable on shutdown: {e}");
        }
    }

    /// Process a single command from the console.
    pub async fn handle_command(&self, cmd: BtCommand) {
        match cmd {
            BtCommand::AcceptPairing(path) => {
                let found = self.agent.accept_pairing(&path);
                self.emit(BtEvent::Decision {
                    path: path.clone(),
                    accepted: true,
                    found,
                })
                .await;
                if found && self.auto_trust_on_accept {
                    self.spawn_operation(path, DeviceOperation::Trust);
                }
            }

            BtCommand::RejectPairing(path) => {
                let found = self.agent.reject_pairing(&path);
                self.emit(BtEvent::Decision {
                    path,
                    accepted: false,
                    found,
                })
                .await;
            }

            BtCommand::Connect(path) => self.spawn_operation(path, DeviceOperation::Connect),
            BtCommand::Disconnect(path) => self.spawn_operation(path, DeviceOperation::Disconnect),
            BtCommand::Trust(path) => self.spawn_operation(path, DeviceOperation::Trust),
            BtCommand::Remove(path) => self.spawn_operation(path, DeviceOperation::Remove),

            BtCommand::ListDevices => self.emit_devices().await,

            BtCommand::ConnectedDevice => match self.devices.connected_device().await {
                Ok(device) => self.emit(BtEvent::ConnectedDevice(device)).await,
                Err(e) => {
                    self.emit(BtEvent::Error(format!(
                        "Failed to list devices: {}",
                        e.user_message()
                    )))
                    .await
                }
            },

            BtCommand::PendingRequests => {
                self.emit(BtEvent::PendingRequests(self.agent.pending_requests()))
                    .await
            }

            BtCommand::AdapterInfo => self.emit_adapter_state().await,

            BtCommand::SetDiscoverable(on, timeout) => {
                if let Err(e) = self.adapter.set_discoverable(on, timeout).await {
                    self.emit(BtEvent::Error(format!(
                        "Failed to set discoverable: {}",
                        e.user_message()
                    )))
                    .await;
                }
                self.emit_adapter_state().await;
            }

            BtCommand::SetPairable(on, timeout) => {
                if let Err(e) = self.adapter.set_pairable(on, timeout).await {
                    self.emit(BtEvent::Error(format!(
                        "Failed to set pairable: {}",
                        e.user_message()
                    )))
                    .await;
                }
                self.emit_adapter_state().await;
            }

            BtCommand::SetAlias(alias) => {
                if let Err(e) = self.adapter.set_alias(&alias).await {
                    self.emit(BtEvent::Error(format!(
                        "Failed to set alias: {}",
                        e.user_message()
                    )))
                    .await;
                }
                self.emit_adapter_state().await;
            }
        }
    }

    /// Periodic re-enumeration. Failures are only logged; the console hears
    /// about them when it asks explicitly.
    pub async fn refresh(&self) {
        match self.devices.list_devices().await {
            Ok(devices) => self.emit(BtEvent::Devices(devices)).await,
            Err(e) => debug!("Device refresh failed: {e}"),
        }
    }

    /// Run a device operation off the command loop and report its outcome
    /// followed by the updated device list.
    fn spawn_operation(&self, path: DevicePath, operation: DeviceOperation) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = match operation {
                DeviceOperation::Connect => this.devices.connect(&path).await,
                DeviceOperation::Disconnect => this.devices.disconnect(&path).await,
                DeviceOperation::Trust => this.devices.trust(&path).await,
                DeviceOperation::Remove => this.devices.remove(&path).await,
            };
            let error = result.err().map(|e| e.user_message());
            this.emit(BtEvent::OperationResult {
                path,
                operation,
                error,
            })
            .await;
            this.emit_devices().await;
        });
    }

    async fn emit_devices(&self) {
        match self.devices.list_devices().await {
            Ok(devices) => self.emit(BtEvent::Devices(devices)).await,
            Err(e) => {
                self.emit(BtEvent::Error(format!(
                    "Failed to list devices: {}",
                    e.user_message()
                )))
                .await
            }
        }
    }

    async fn emit_adapter_state(&self) {
        match self.adapter.adapter_info().await {
            Ok(info) => self.emit(BtEvent::AdapterState(info)).await,
            Err(e) => self.emit(BtEvent::Error(e.user_message())).await,
        }
    }

    async fn emit(&self, event: BtEvent) {
        if self.evt_tx.send(event).await.is_err() {
            debug!("Event channel closed, dropping event");
        }
    }
}

/// The main worker entry point. Runs until the command channel is closed
/// (i.e. the console loop exits).
pub async fn run(mut cmd_rx: mpsc::Receiver<BtCommand>, evt_tx: mpsc::Sender<BtEvent>) {
    let cfg = crate::config::get();

    // ── Session & adapter initialisation ────────────────────────────────
    let session = match Session::new().await {
        Ok(s) => s,
        Err(e) => {
            let reason = format!("Failed to connect to BlueZ D-Bus: {e}");
            return serve_unavailable(cmd_rx, evt_tx, reason).await;
        }
    };

    let adapter = match session.default_adapter().await {
        Ok(a) => a,
        Err(e) => {
            let reason = format!("No Bluetooth adapter found: {e}");
            return serve_unavailable(cmd_rx, evt_tx, reason).await;
        }
    };

    let stack = Arc::new(BluerStack::new(adapter));
    info!("Using adapter: {}", stack.adapter_name());

    let bt = Bluetooth::new(
        stack,
        cfg.pairing.clone(),
        cfg.devices.clone(),
        evt_tx.clone(),
    );
    bt.startup(&cfg.general).await;

    // The handle keeps the agent registered; dropping it unregisters.
    let agent_handle = match agent::register(&session, bt.agent()).await {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("Failed to register pairing agent (pairing prompts disabled): {e}");
            None
        }
    };

    bt.emit_adapter_state().await;
    bt.emit_devices().await;

    let mut refresh = tokio::time::interval(cfg.general.refresh_interval);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately and the list was just sent.
    refresh.tick().await;

    // ── Main select loop ────────────────────────────────────────────────
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("Command channel closed, worker exiting");
                    break;
                };
                bt.handle_command(cmd).await;
            }

            _ = refresh.tick() => bt.refresh().await,
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────
    bt.shutdown(&cfg.general).await;
    if let Some(handle) = agent_handle {
        drop(handle);
        bt.agent().release();
    }
    info!("Bluetooth worker shut down");
}

/// Keep answering commands when there is no usable Bluetooth stack, so the
/// console still gets a reply instead of silence.
async fn serve_unavailable(
    mut cmd_rx: mpsc::Receiver<BtCommand>,
    evt_tx: mpsc::Sender<BtEvent>,
    reason: String,
) {
    warn!("{reason}; running without Bluetooth");
    let _ = evt_tx.send(BtEvent::Unavailable(reason.clone())).await;

    while let Some(cmd) = cmd_rx.recv().await {
        debug!("Ignoring {cmd:?}: Bluetooth unavailable");
        let _ = evt_tx.send(BtEvent::Unavailable(reason.clone())).await;
    }
    info!("Bluetooth worker shut down");
}
