//! Channel message types and plain-data snapshots shared between the pairing
//! agent, the device coordinator, the worker task and the console sink.
//! No `bluer` handles cross the channel boundary; devices are addressed by
//! their BlueZ object path.

use std::fmt;

/// Device addresses as parsed out of object paths.
pub use bluer::Address;

// ─── Identifiers ────────────────────────────────────────────────────────────

/// BlueZ object path of a remote device, e.g.
/// `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`. Unique per device per adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Build the object path BlueZ assigns to `address` on `adapter`.
    pub fn for_device(adapter: &str, address: Address) -> Self {
        let suffix = address.to_string().replace(':', "_");
        Self(format!("/org/bluez/{adapter}/dev_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the device address encoded in the last path segment.
    pub fn address(&self) -> Option<Address> {
        let segment = self.0.rsplit('/').next()?;
        let hex = segment.strip_prefix("dev_")?;
        hex.replace('_', ":").parse().ok()
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DevicePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for DevicePath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Display metadata resolved for a device when a pairing request arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub address: String,
}

// ─── Pairing requests ───────────────────────────────────────────────────────

/// Lifecycle of a pairing request. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingStatus {
    Pending,
    Accepted,
    Rejected,
    Timeout,
}

impl PairingStatus {
    pub fn is_terminal(self) -> bool {
        self != PairingStatus::Pending
    }
}

impl fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PairingStatus::Pending => "pending",
            PairingStatus::Accepted => "accepted",
            PairingStatus::Rejected => "rejected",
            PairingStatus::Timeout => "timed out",
        })
    }
}

/// A decision issued by the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl From<Decision> for PairingStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Accept => PairingStatus::Accepted,
            Decision::Reject => PairingStatus::Rejected,
        }
    }
}

/// What the device asked for, so the sink can word its prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Show a legacy PIN code on our side.
    DisplayPinCode,
    /// Show a six-digit passkey the peer is typing.
    DisplayPasskey,
    /// Confirm that both sides show the same passkey.
    Confirmation,
    /// Allow an incoming connection from an unpaired device.
    Authorization,
    /// Allow a profile outside the auto-approved set.
    Service { uuid: String },
}

impl RequestKind {
    /// Whether a caller is suspended waiting on the outcome.
    pub fn awaits_decision(&self) -> bool {
        !matches!(self, RequestKind::DisplayPinCode | RequestKind::DisplayPasskey)
    }
}

/// Snapshot of a pairing request as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub device_path: DevicePath,
    pub device_name: String,
    pub device_address: String,
    pub kind: RequestKind,
    /// Formatted PIN or zero-padded passkey, absent for plain authorization.
    pub passkey: Option<String>,
    pub status: PairingStatus,
}

// ─── Device and adapter snapshots ───────────────────────────────────────────

/// Locally tracked device state layered over the stack's boolean properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Pairing,
    Error,
}

impl DeviceState {
    /// The state implied by the stack's `Connected` property alone.
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            DeviceState::Connected
        } else {
            DeviceState::Disconnected
        }
    }

    /// An operation is in flight for the device.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            DeviceState::Connecting | DeviceState::Disconnecting | DeviceState::Pairing
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceState::Disconnected => "disconnected",
            DeviceState::Connecting => "connecting",
            DeviceState::Connected => "connected",
            DeviceState::Disconnecting => "disconnecting",
            DeviceState::Pairing => "pairing",
            DeviceState::Error => "error",
        })
    }
}

/// Plain-data snapshot of a remote Bluetooth device with its overlay state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub path: DevicePath,
    pub address: String,
    pub name: String,
    pub icon: Option<String>,
    pub paired: bool,
    pub trusted: bool,
    pub connected: bool,
    pub battery_percentage: Option<u8>,
    pub state: DeviceState,
    pub error_message: Option<String>,
}

impl fmt::Display for BluetoothDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.name, self.address, self.state)?;
        if let Some(battery) = self.battery_percentage {
            write!(f, " {battery}%")?;
        }
        if let Some(error) = &self.error_message {
            write!(f, " ({error})")?;
        }
        Ok(())
    }
}

/// Plain-data snapshot of the host Bluetooth adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub alias: String,
    pub address: String,
    pub powered: bool,
    pub discoverable: bool,
    pub pairable: bool,
}

// ─── Sink → Worker commands ─────────────────────────────────────────────────

/// Commands sent from the notification sink to the Bluetooth worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtCommand {
    AcceptPairing(DevicePath),
    RejectPairing(DevicePath),
    Connect(DevicePath),
    Disconnect(DevicePath),
    Trust(DevicePath),
    Remove(DevicePath),
    ListDevices,
    ConnectedDevice,
    PendingRequests,
    AdapterInfo,
    /// Flag plus auto-expiry in seconds (0 = never).
    SetDiscoverable(bool, u32),
    SetPairable(bool, u32),
    SetAlias(String),
}

/// A device operation whose outcome is reported back to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOperation {
    Connect,
    Disconnect,
    Trust,
    Remove,
}

impl fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceOperation::Connect => "connect",
            DeviceOperation::Disconnect => "disconnect",
            DeviceOperation::Trust => "trust",
            DeviceOperation::Remove => "remove",
        })
    }
}

// ─── Worker → Sink events ───────────────────────────────────────────────────

/// Events emitted by the agent and the worker back to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtEvent {
    /// A new request needs the operator's attention.
    PairingRequested(PairingRequest),
    /// A request left the registry.
    PairingResolved {
        path: DevicePath,
        status: PairingStatus,
    },
    /// Answer to an accept/reject command. `found = false` means the request
    /// had already been resolved or timed out.
    Decision {
        path: DevicePath,
        accepted: bool,
        found: bool,
    },
    /// Snapshot of the registry, for a sink that attached late.
    PendingRequests(Vec<PairingRequest>),
    /// Merged device list, in stack enumeration order.
    Devices(Vec<BluetoothDevice>),
    ConnectedDevice(Option<BluetoothDevice>),
    AdapterState(AdapterInfo),
    /// Outcome of a connect/disconnect/trust/remove.
    OperationResult {
        path: DevicePath,
        operation: DeviceOperation,
        error: Option<String>,
    },
    /// Bluetooth functionality is not available on this host.
    Unavailable(String),
    /// Catch-all error surfaced from BlueZ / D-Bus.
    Error(String),
}
