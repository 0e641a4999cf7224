//! In-memory `BluetoothStack` for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::errors::Result;
use super::stack::BluetoothStack;
use super::types::{AdapterInfo, BluetoothDevice, DeviceIdentity, DevicePath, DeviceState};

#[derive(Default)]
struct FakeState {
    devices: Vec<BluetoothDevice>,
    adapter: AdapterInfo,
    /// `(operation, path)` → error scripted for the next call.
    failures: HashMap<(&'static str, String), bluer::Error>,
    calls: Vec<String>,
    identity_unavailable: bool,
}

#[derive(Default)]
pub struct FakeStack {
    state: Mutex<FakeState>,
    /// When set, `connect` parks until notified.
    connect_gate: Mutex<Option<Arc<Notify>>>,
}

pub fn bluer_error(kind: bluer::ErrorKind, message: &str) -> bluer::Error {
    bluer::Error {
        kind,
        message: message.to_string(),
    }
}

impl FakeStack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, path: &str, name: &str, connected: bool) {
        let path = DevicePath::from(path);
        let address = path
            .address()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "00:00:00:00:00:00".into());
        self.state.lock().devices.push(BluetoothDevice {
            path,
            address,
            name: name.to_string(),
            icon: Some("phone".into()),
            paired: true,
            trusted: false,
            connected,
            battery_percentage: None,
            state: DeviceState::from_connected(connected),
            error_message: None,
        });
    }

    /// Make the next `operation` on `path` fail with `error`.
    pub fn fail_next(&self, operation: &'static str, path: &str, error: bluer::Error) {
        self.state
            .lock()
            .failures
            .insert((operation, path.to_string()), error);
    }

    pub fn set_connected(&self, path: &str, connected: bool) {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.path.as_str() == path) {
            device.connected = connected;
            device.state = DeviceState::from_connected(connected);
        }
    }

    pub fn set_paired(&self, path: &str, paired: bool) {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.path.as_str() == path) {
            device.paired = paired;
        }
    }

    pub fn make_identity_unavailable(&self) {
        self.state.lock().identity_unavailable = true;
    }

    pub fn hold_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn device(&self, path: &str) -> Option<BluetoothDevice> {
        self.state
            .lock()
            .devices
            .iter()
            .find(|d| d.path.as_str() == path)
            .cloned()
    }

    pub fn adapter(&self) -> AdapterInfo {
        self.state.lock().adapter.clone()
    }

    fn record(&self, operation: &'static str, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{operation} {target}").trim().to_string());
        match state.failures.remove(&(operation, target.to_string())) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn update(&self, path: &DevicePath, apply: impl FnOnce(&mut BluetoothDevice)) -> Result<()> {
        let mut state = self.state.lock();
        match state.devices.iter_mut().find(|d| &d.path == path) {
            Some(device) => {
                apply(device);
                Ok(())
            }
            None => Err(bluer_error(bluer::ErrorKind::DoesNotExist, "Does Not Exist").into()),
        }
    }
}

#[async_trait]
impl BluetoothStack for FakeStack {
    async fn device_identity(&self, path: &DevicePath) -> Result<DeviceIdentity> {
        let state = self.state.lock();
        let device = state
            .devices
            .iter()
            .find(|d| &d.path == path)
            .filter(|_| !state.identity_unavailable);
        match device {
            Some(d) => Ok(DeviceIdentity {
                name: d.name.clone(),
                address: d.address.clone(),
            }),
            None => Err(bluer_error(bluer::ErrorKind::DoesNotExist, "Does Not Exist").into()),
        }
    }

    async fn is_paired(&self, path: &DevicePath) -> Result<bool> {
        let state = self.state.lock();
        match state.devices.iter().find(|d| &d.path == path) {
            Some(d) => Ok(d.paired),
            None => Err(bluer_error(bluer::ErrorKind::DoesNotExist, "Does Not Exist").into()),
        }
    }

    async fn devices(&self) -> Result<Vec<BluetoothDevice>> {
        self.record("devices", "")?;
        Ok(self.state.lock().devices.clone())
    }

    async fn connect(&self, path: &DevicePath) -> Result<()> {
        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record("connect", path.as_str())?;
        self.update(path, |d| {
            d.connected = true;
            d.state = DeviceState::Connected;
        })
    }

    async fn disconnect(&self, path: &DevicePath) -> Result<()> {
        self.record("disconnect", path.as_str())?;
        self.update(path, |d| {
            d.connected = false;
            d.state = DeviceState::Disconnected;
        })
    }

    async fn set_trusted(&self, path: &DevicePath, trusted: bool) -> Result<()> {
        self.record("trust", path.as_str())?;
        self.update(path, |d| d.trusted = trusted)
    }

    async fn remove_device(&self, path: &DevicePath) -> Result<()> {
        self.record("remove", path.as_str())?;
        let mut state = self.state.lock();
        let before = state.devices.len();
        state.devices.retain(|d| &d.path != path);
        if state.devices.len() == before {
            return Err(bluer_error(bluer::ErrorKind::DoesNotExist, "Does Not Exist").into());
        }
        Ok(())
    }

    async fn adapter_info(&self) -> Result<AdapterInfo> {
        self.record("adapter_info", "")?;
        Ok(self.state.lock().adapter.clone())
    }

    async fn set_discoverable(&self, discoverable: bool) -> Result<()> {
        self.record("discoverable", &discoverable.to_string())?;
        self.state.lock().adapter.discoverable = discoverable;
        Ok(())
    }

    async fn set_discoverable_timeout(&self, secs: u32) -> Result<()> {
        self.record("discoverable_timeout", &secs.to_string())
    }

    async fn set_pairable(&self, pairable: bool) -> Result<()> {
        self.record("pairable", &pairable.to_string())?;
        self.state.lock().adapter.pairable = pairable;
        Ok(())
    }

    async fn set_pairable_timeout(&self, secs: u32) -> Result<()> {
        self.record("pairable_timeout", &secs.to_string())
    }

    async fn set_alias(&self, alias: &str) -> Result<()> {
        self.record("alias", alias)?;
        self.state.lock().adapter.alias = alias.to_string();
        Ok(())
    }
}
