//! Device list with locally tracked transient states.
//!
//! BlueZ only exposes `Paired`/`Trusted`/`Connected`. While an operation is
//! in flight, or shortly after one failed, the coordinator layers its own
//! `DeviceState` on top. The overlay is reconciled against the stack on
//! every read:
//!
//! - `Connecting`, `Disconnecting`, `Pairing` are kept until the operation
//!   that set them finishes.
//! - `Error` is kept for the display window, then dropped by a timer unless a
//!   newer operation replaced it.
//! - Settled states (`Connected`, `Disconnected`) are retired on the first
//!   read; from then on the stack's `Connected` flag is the only truth.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::errors::{Error, Result};
use super::stack::BluetoothStack;
use super::types::{BluetoothDevice, DeviceOperation, DevicePath, DeviceState};
use crate::config::DevicesConfig;

#[derive(Debug, Clone)]
struct Overlay {
    state: DeviceState,
    error: Option<String>,
    generation: u64,
}

#[derive(Debug, Default)]
struct OverlayMap {
    entries: HashMap<DevicePath, Overlay>,
    generation: u64,
}

impl OverlayMap {
    fn set(&mut self, path: &DevicePath, state: DeviceState, error: Option<String>) -> u64 {
        self.generation += 1;
        self.entries.insert(
            path.clone(),
            Overlay {
                state,
                error,
                generation: self.generation,
            },
        );
        self.generation
    }

    /// Drop the entry for `path` only if nothing touched it since `generation`.
    fn clear_if(&mut self, path: &DevicePath, generation: u64) -> bool {
        match self.entries.get(path) {
            Some(entry) if entry.generation == generation => {
                self.entries.remove(path);
                true
            }
            _ => false,
        }
    }

    fn merge(&mut self, devices: &mut [BluetoothDevice]) {
        self.entries
            .retain(|path, _| devices.iter().any(|d| &d.path == path));

        for device in devices.iter_mut() {
            let stack_state = DeviceState::from_connected(device.connected);
            device.state = stack_state;
            device.error_message = None;

            let Some(overlay) = self.entries.get(&device.path).cloned() else {
                continue;
            };
            match overlay.state {
                DeviceState::Error => {
                    device.state = DeviceState::Error;
                    device.error_message = overlay.error;
                }
                state if state.is_transient() => device.state = state,
                _ => {
                    self.entries.remove(&device.path);
                }
            }
        }
    }
}

pub struct DeviceCoordinator<S> {
    stack: Arc<S>,
    overlay: Arc<Mutex<OverlayMap>>,
    config: DevicesConfig,
}

impl<S: BluetoothStack> DeviceCoordinator<S> {
    pub fn new(stack: Arc<S>, config: DevicesConfig) -> Self {
        Self {
            stack,
            overlay: Arc::new(Mutex::new(OverlayMap::default())),
            config,
        }
    }

    /// All known devices in stack order, with overlay state merged in.
    pub async fn list_devices(&self) -> Result<Vec<BluetoothDevice>> {
        let mut devices = self.stack.devices().await?;
        self.overlay.lock().merge(&mut devices);
        Ok(devices)
    }

    /// The first connected device, if any.
    pub async fn connected_device(&self) -> Result<Option<BluetoothDevice>> {
        Ok(self
            .list_devices()
            .await?
            .into_iter()
            .find(|device| device.connected))
    }

    pub async fn connect(&self, path: &DevicePath) -> Result<()> {
        self.transition(
            path,
            DeviceOperation::Connect,
            DeviceState::Connecting,
            DeviceState::Connected,
            self.stack.connect(path),
        )
        .await
    }

    pub async fn disconnect(&self, path: &DevicePath) -> Result<()> {
        self.transition(
            path,
            DeviceOperation::Disconnect,
            DeviceState::Disconnecting,
            DeviceState::Disconnected,
            self.stack.disconnect(path),
        )
        .await
    }

    /// Mark the device trusted so it may reconnect without confirmation.
    pub async fn trust(&self, path: &DevicePath) -> Result<()> {
        self.stack
            .set_trusted(path, true)
            .await
            .map_err(|e| operation_failed(DeviceOperation::Trust, path, &e))?;
        info!("Trusted {path}");
        Ok(())
    }

    /// Forget the device. Removing an unknown device succeeds.
    pub async fn remove(&self, path: &DevicePath) -> Result<()> {
        match self.stack.remove_device(path).await {
            Ok(()) => info!("Removed {path}"),
            Err(e) if e.is_not_found() => debug!("{path} was already removed"),
            Err(e) => return Err(operation_failed(DeviceOperation::Remove, path, &e)),
        }
        self.overlay.lock().entries.remove(path);
        Ok(())
    }

    /// A pairing request for the device is waiting on the operator. The
    /// returned generation ends exactly this overlay.
    pub fn begin_pairing(&self, path: &DevicePath) -> u64 {
        self.overlay.lock().set(path, DeviceState::Pairing, None)
    }

    /// The pairing request left the registry; the stack decides what's next.
    /// A newer overlay for the device is left alone.
    pub fn end_pairing(&self, path: &DevicePath, generation: u64) {
        self.overlay.lock().clear_if(path, generation);
    }

    async fn transition(
        &self,
        path: &DevicePath,
        operation: DeviceOperation,
        during: DeviceState,
        after: DeviceState,
        call: impl Future<Output = Result<()>>,
    ) -> Result<()> {
        self.overlay.lock().set(path, during, None);
        info!("{during} {path}");

        match call.await {
            Ok(()) => {
                self.overlay.lock().set(path, after, None);
                info!("{path} {after}");
                Ok(())
            }
            Err(e) => {
                let err = operation_failed(operation, path, &e);
                let generation =
                    self.overlay
                        .lock()
                        .set(path, DeviceState::Error, Some(err.user_message()));
                self.schedule_error_clear(path.clone(), generation);
                Err(err)
            }
        }
    }

    fn schedule_error_clear(&self, path: DevicePath, generation: u64) {
        let overlay = Arc::clone(&self.overlay);
        let window = self.config.error_display;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if overlay.lock().clear_if(&path, generation) {
                debug!("Error state for {path} expired");
            }
        });
    }
}

fn operation_failed(operation: DeviceOperation, path: &DevicePath, e: &Error) -> Error {
    let message = e.user_message();
    warn!("{operation} {path} failed: {e}");
    Error::Operation { operation, message }
}
