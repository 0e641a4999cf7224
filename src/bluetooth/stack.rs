//! The boundary to BlueZ.
//!
//! `BluetoothStack` is the narrow set of object-manager, property and method
//! calls the agent and coordinator need. `BluerStack` answers them through a
//! `bluer::Adapter`; tests substitute an in-memory fake.

use async_trait::async_trait;
use bluer::{Adapter, Device};
use tracing::debug;

use super::errors::{Error, Result};
use super::types::{AdapterInfo, BluetoothDevice, DeviceIdentity, DevicePath, DeviceState};

#[async_trait]
pub trait BluetoothStack: Send + Sync + 'static {
    /// Name and address of a device, for pairing prompts.
    async fn device_identity(&self, path: &DevicePath) -> Result<DeviceIdentity>;

    async fn is_paired(&self, path: &DevicePath) -> Result<bool>;

    /// Every device object the stack knows, in enumeration order, with the
    /// overlay fields unset.
    async fn devices(&self) -> Result<Vec<BluetoothDevice>>;

    async fn connect(&self, path: &DevicePath) -> Result<()>;
    async fn disconnect(&self, path: &DevicePath) -> Result<()>;
    async fn set_trusted(&self, path: &DevicePath, trusted: bool) -> Result<()>;
    async fn remove_device(&self, path: &DevicePath) -> Result<()>;

    async fn adapter_info(&self) -> Result<AdapterInfo>;
    async fn set_discoverable(&self, discoverable: bool) -> Result<()>;
    async fn set_discoverable_timeout(&self, secs: u32) -> Result<()>;
    async fn set_pairable(&self, pairable: bool) -> Result<()>;
    async fn set_pairable_timeout(&self, secs: u32) -> Result<()>;
    async fn set_alias(&self, alias: &str) -> Result<()>;
}

/// `BluetoothStack` backed by a single BlueZ adapter.
pub struct BluerStack {
    adapter: Adapter,
}

impl BluerStack {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Adapter name as used in object paths, e.g. `hci0`.
    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    fn device(&self, path: &DevicePath) -> Result<Device> {
        let address = path
            .address()
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        Ok(self.adapter.device(address)?)
    }
}

/// Snapshot all interesting properties from a `bluer::Device`.
async fn snapshot_device(adapter: &str, device: &Device) -> BluetoothDevice {
    // Every property access is a D-Bus call that can fail. We treat failures
    // as "unknown" rather than propagating errors.
    let address = device.address();
    let name = match device.name().await {
        Ok(Some(name)) => name,
        _ => device
            .alias()
            .await
            .unwrap_or_else(|_| address.to_string()),
    };
    let connected = device.is_connected().await.unwrap_or(false);

    BluetoothDevice {
        path: DevicePath::for_device(adapter, address),
        address: address.to_string(),
        name,
        icon: device.icon().await.unwrap_or(None),
        paired: device.is_paired().await.unwrap_or(false),
        trusted: device.is_trusted().await.unwrap_or(false),
        connected,
        battery_percentage: device.battery_percentage().await.unwrap_or(None),
        state: DeviceState::from_connected(connected),
        error_message: None,
    }
}

#[async_trait]
impl BluetoothStack for BluerStack {
    async fn device_identity(&self, path: &DevicePath) -> Result<DeviceIdentity> {
        let device = self.device(path)?;
        let name = device
            .name()
            .await?
            .unwrap_or_else(|| device.address().to_string());
        Ok(DeviceIdentity {
            name,
            address: device.address().to_string(),
        })
    }

    async fn is_paired(&self, path: &DevicePath) -> Result<bool> {
        Ok(self.device(path)?.is_paired().await?)
    }

    async fn devices(&self) -> Result<Vec<BluetoothDevice>> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| Error::AdapterUnavailable(e.to_string()))?;

        let mut devices = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.adapter.device(address) {
                Ok(device) => devices.push(snapshot_device(self.adapter.name(), &device).await),
                Err(e) => debug!("Skipping {address}: {e}"),
            }
        }
        Ok(devices)
    }

    async fn connect(&self, path: &DevicePath) -> Result<()> {
        Ok(self.device(path)?.connect().await?)
    }

    async fn disconnect(&self, path: &DevicePath) -> Result<()> {
        Ok(self.device(path)?.disconnect().await?)
    }

    async fn set_trusted(&self, path: &DevicePath, trusted: bool) -> Result<()> {
        Ok(self.device(path)?.set_trusted(trusted).await?)
    }

    async fn remove_device(&self, path: &DevicePath) -> Result<()> {
        let address = path
            .address()
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        Ok(self.adapter.remove_device(address).await?)
    }

    async fn adapter_info(&self) -> Result<AdapterInfo> {
        // If `Powered` cannot be read the adapter is gone.
        let powered = self
            .adapter
            .is_powered()
            .await
            .map_err(|e| Error::AdapterUnavailable(e.to_string()))?;

        Ok(AdapterInfo {
            name: self
                .adapter
                .system_name()
                .await
                .unwrap_or_else(|_| self.adapter.name().to_string()),
            alias: self.adapter.alias().await.unwrap_or_default(),
            address: self
                .adapter
                .address()
                .await
                .map(|a| a.to_string())
                .unwrap_or_default(),
            powered,
            discoverable: self.adapter.is_discoverable().await.unwrap_or(false),
            pairable: self.adapter.is_pairable().await.unwrap_or(false),
        })
    }

    async fn set_discoverable(&self, discoverable: bool) -> Result<()> {
        Ok(self.adapter.set_discoverable(discoverable).await?)
    }

    async fn set_discoverable_timeout(&self, secs: u32) -> Result<()> {
        Ok(self.adapter.set_discoverable_timeout(secs).await?)
    }

    async fn set_pairable(&self, pairable: bool) -> Result<()> {
        Ok(self.adapter.set_pairable(pairable).await?)
    }

    async fn set_pairable_timeout(&self, secs: u32) -> Result<()> {
        Ok(self.adapter.set_pairable_timeout(secs).await?)
    }

    async fn set_alias(&self, alias: &str) -> Result<()> {
        Ok(self.adapter.set_alias(alias.to_string()).await?)
    }
}
