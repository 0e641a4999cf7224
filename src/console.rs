//! Console notification sink and input handling.
//!
//! `Console` is the operator-facing side of the channels: it turns typed
//! lines into `BtCommand`s and worker events into printable lines. It is only
//! mutated from the main event loop.

use crate::bluetooth::types::*;

const HELP: &str = "\
Commands:
  accept [device]               accept the pending request (latest if omitted)
  reject [device]               reject the pending request (latest if omitted)
  pending                       list pending pairing requests
  devices                       list known devices
  connected                     show the connected device
  connect <device>              connect a paired device
  disconnect <device>           disconnect a device
  trust <device>                mark a device trusted
  remove <device>               forget a device
  adapter                       show adapter state
  discoverable on|off [secs]    toggle discoverability (0 = no timeout)
  pairable on|off [secs]        toggle pairability (0 = no timeout)
  alias <name>                  set the adapter's friendly name
  help                          show this help
  quit                          exit
<device> is an object path, an address, or a number from `devices`.";

// ─── Actions produced by input handling ─────────────────────────────────────

/// Actions that the main loop should execute after processing input.
#[derive(Debug, PartialEq, Eq)]
pub enum AppAction {
    /// Quit the application.
    Quit,
    /// Send a command to the Bluetooth worker.
    BtCommand(BtCommand),
    /// No-op (input was consumed but requires no further action).
    Consumed,
}

// ─── Console state ──────────────────────────────────────────────────────────

pub struct Console {
    /// Last device list received, in stack order.
    devices: Vec<BluetoothDevice>,
    /// Paths with an open request, oldest first.
    pending: Vec<DevicePath>,
    /// Print the next device list even if unchanged.
    devices_requested: bool,
    /// Lines waiting to be printed.
    output: Vec<String>,
    /// Whether the application should keep running.
    pub running: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            pending: Vec::new(),
            devices_requested: false,
            output: Vec::new(),
            running: true,
        }
    }

    /// Lines produced since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn say(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    /// Friendly label for a path: the device name if we know it.
    fn label(&self, path: &DevicePath) -> String {
        self.devices
            .iter()
            .find(|d| &d.path == path)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| path.to_string())
    }

    // ── Worker events ───────────────────────────────────────────────────

    pub fn handle_bt_event(&mut self, event: BtEvent) {
        match event {
            BtEvent::PairingRequested(request) => {
                self.pending.retain(|p| p != &request.device_path);
                self.pending.push(request.device_path.clone());
                let line = describe_request(&request);
                self.say(line);
            }

            BtEvent::PairingResolved { path, status } => {
                self.pending.retain(|p| p != &path);
                let label = self.label(&path);
                self.say(format!("Pairing with {label} {status}"));
            }

            BtEvent::Decision {
                path, found: false, ..
            } => {
                self.say(format!(
                    "No pending request for {path} (already resolved or timed out)"
                ));
            }
            // The resolution event reports the outcome.
            BtEvent::Decision { .. } => {}

            BtEvent::PendingRequests(requests) => {
                self.pending = requests.iter().map(|r| r.device_path.clone()).collect();
                if requests.is_empty() {
                    self.say("No pending pairing requests");
                }
                for request in &requests {
                    let line = describe_request(request);
                    self.say(line);
                }
            }

            BtEvent::Devices(devices) => {
                let changed = devices != self.devices;
                self.devices = devices;
                if changed || std::mem::take(&mut self.devices_requested) {
                    self.print_devices();
                }
            }

            BtEvent::ConnectedDevice(device) => match device {
                Some(device) => self.say(format!("Connected: {device}")),
                None => self.say("No device connected"),
            },

            BtEvent::AdapterState(info) => {
                self.say(format!(
                    "Adapter {} ({}) \"{}\": powered {}, discoverable {}, pairable {}",
                    info.name,
                    info.address,
                    info.alias,
                    on_off(info.powered),
                    on_off(info.discoverable),
                    on_off(info.pairable),
                ));
            }

            BtEvent::OperationResult {
                path,
                operation,
                error,
            } => {
                let label = self.label(&path);
                match error {
                    None => self.say(format!("{operation} {label}: ok")),
                    Some(e) => self.say(format!("{operation} {label} failed: {e}")),
                }
            }

            BtEvent::Unavailable(reason) => self.say(format!("Bluetooth unavailable: {reason}")),

            BtEvent::Error(msg) => self.say(format!("Error: {msg}")),
        }
    }

    fn print_devices(&mut self) {
        if self.devices.is_empty() {
            self.say("No known devices");
            return;
        }
        let lines: Vec<String> = self
            .devices
            .iter()
            .enumerate()
            .map(|(i, device)| format!("{:>3}. {device}", i + 1))
            .collect();
        self.output.extend(lines);
    }

    // ── Input handling ──────────────────────────────────────────────────

    /// Process a typed line and return an action for the main loop.
    pub fn handle_line(&mut self, line: &str) -> AppAction {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return AppAction::Consumed;
        };
        let args: Vec<&str> = words.collect();

        match command.to_ascii_lowercase().as_str() {
            "quit" | "exit" | "q" => AppAction::Quit,

            "help" | "?" => {
                self.say(HELP);
                AppAction::Consumed
            }

            "accept" | "a" => self.decision(&args, BtCommand::AcceptPairing),
            "reject" | "r" => self.decision(&args, BtCommand::RejectPairing),

            "pending" => AppAction::BtCommand(BtCommand::PendingRequests),

            "devices" | "ls" => {
                self.devices_requested = true;
                AppAction::BtCommand(BtCommand::ListDevices)
            }

            "connected" => AppAction::BtCommand(BtCommand::ConnectedDevice),

            "connect" => self.device_command(&args, BtCommand::Connect),
            "disconnect" => self.device_command(&args, BtCommand::Disconnect),
            "trust" => self.device_command(&args, BtCommand::Trust),
            "remove" => self.device_command(&args, BtCommand::Remove),

            "adapter" => AppAction::BtCommand(BtCommand::AdapterInfo),

            "discoverable" => self.toggle(&args, BtCommand::SetDiscoverable),
            "pairable" => self.toggle(&args, BtCommand::SetPairable),

            "alias" => {
                let alias = args.join(" ");
                if alias.is_empty() {
                    self.say("Usage: alias <name>");
                    AppAction::Consumed
                } else {
                    AppAction::BtCommand(BtCommand::SetAlias(alias))
                }
            }

            other => {
                self.say(format!("Unknown command: {other} (try `help`)"));
                AppAction::Consumed
            }
        }
    }

    /// Accept/reject target the latest request when no device is named.
    fn decision(&mut self, args: &[&str], make: fn(DevicePath) -> BtCommand) -> AppAction {
        let target = match args.first() {
            Some(arg) => self.resolve_device(arg),
            None => self.pending.last().cloned(),
        };
        match target {
            Some(path) => AppAction::BtCommand(make(path)),
            None if args.is_empty() => {
                self.say("No pending pairing request");
                AppAction::Consumed
            }
            None => {
                self.say(format!("Unknown device: {}", args[0]));
                AppAction::Consumed
            }
        }
    }

    fn device_command(&mut self, args: &[&str], make: fn(DevicePath) -> BtCommand) -> AppAction {
        let Some(arg) = args.first() else {
            self.say("Usage: <command> <device>");
            return AppAction::Consumed;
        };
        match self.resolve_device(arg) {
            Some(path) => AppAction::BtCommand(make(path)),
            None => {
                self.say(format!("Unknown device: {arg}"));
                AppAction::Consumed
            }
        }
    }

    fn toggle(&mut self, args: &[&str], make: fn(bool, u32) -> BtCommand) -> AppAction {
        let on = match args.first().map(|a| a.to_ascii_lowercase()) {
            Some(a) if a == "on" => true,
            Some(a) if a == "off" => false,
            _ => {
                self.say("Usage: discoverable|pairable on|off [timeout secs]");
                return AppAction::Consumed;
            }
        };
        let timeout = match args.get(1) {
            None => 0,
            Some(secs) => match secs.parse() {
                Ok(secs) => secs,
                Err(_) => {
                    self.say(format!("Invalid timeout: {secs}"));
                    return AppAction::Consumed;
                }
            },
        };
        AppAction::BtCommand(make(on, timeout))
    }

    /// An object path is taken as-is; otherwise match a list number or an
    /// address from the last device list.
    fn resolve_device(&self, arg: &str) -> Option<DevicePath> {
        if arg.starts_with('/') {
            return Some(DevicePath::from(arg));
        }
        if let Ok(index) = arg.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|i| self.devices.get(i))
                .map(|d| d.path.clone());
        }
        self.devices
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(arg))
            .map(|d| d.path.clone())
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn describe_request(request: &PairingRequest) -> String {
    let who = format!("{} ({})", request.device_name, request.device_address);
    let code = request.passkey.as_deref().unwrap_or("");
    let text = match &request.kind {
        RequestKind::Confirmation => format!("Pairing request from {who}: confirm passkey {code}"),
        RequestKind::DisplayPasskey | RequestKind::DisplayPinCode => {
            format!("{who} is pairing: enter {code} on the device")
        }
        RequestKind::Authorization => format!("{who} wants to connect"),
        RequestKind::Service { uuid } => format!("{who} requests service {uuid}"),
    };
    if request.kind.awaits_decision() {
        format!("{text}, then `accept` or `reject`")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D1: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_01";
    const D2: &str = "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_02";

    fn device(path: &str, name: &str, connected: bool) -> BluetoothDevice {
        let path = DevicePath::from(path);
        BluetoothDevice {
            address: path.address().unwrap().to_string(),
            path,
            name: name.into(),
            icon: None,
            paired: true,
            trusted: false,
            connected,
            battery_percentage: None,
            state: DeviceState::from_connected(connected),
            error_message: None,
        }
    }

    fn request(path: &str, kind: RequestKind, passkey: Option<&str>) -> PairingRequest {
        PairingRequest {
            device_path: path.into(),
            device_name: "Phone".into(),
            device_address: "AA:BB:CC:DD:EE:01".into(),
            kind,
            passkey: passkey.map(str::to_string),
            status: PairingStatus::Pending,
        }
    }

    #[test]
    fn bare_accept_targets_latest_request() {
        let mut console = Console::new();
        assert_eq!(console.handle_line("accept"), AppAction::Consumed);
        assert_eq!(console.take_output(), vec!["No pending pairing request"]);

        console.handle_bt_event(BtEvent::PairingRequested(request(
            D1,
            RequestKind::Confirmation,
            Some("123456"),
        )));
        console.handle_bt_event(BtEvent::PairingRequested(request(
            D2,
            RequestKind::Authorization,
            None,
        )));
        let output = console.take_output();
        assert!(output[0].contains("confirm passkey 123456"));
        assert!(output[1].contains("wants to connect"));

        assert_eq!(
            console.handle_line("accept"),
            AppAction::BtCommand(BtCommand::AcceptPairing(D2.into()))
        );
        console.handle_bt_event(BtEvent::PairingResolved {
            path: D2.into(),
            status: PairingStatus::Accepted,
        });
        assert_eq!(
            console.handle_line("reject"),
            AppAction::BtCommand(BtCommand::RejectPairing(D1.into()))
        );
    }

    #[test]
    fn devices_resolve_by_number_address_or_path() {
        let mut console = Console::new();
        console.handle_bt_event(BtEvent::Devices(vec![
            device(D1, "Phone", false),
            device(D2, "Tablet", true),
        ]));
        let output = console.take_output();
        assert_eq!(output.len(), 2);
        assert!(output[1].starts_with("  2. Tablet [AA:BB:CC:DD:EE:02] connected"));

        assert_eq!(
            console.handle_line("connect 1"),
            AppAction::BtCommand(BtCommand::Connect(D1.into()))
        );
        assert_eq!(
            console.handle_line("trust aa:bb:cc:dd:ee:02"),
            AppAction::BtCommand(BtCommand::Trust(D2.into()))
        );
        assert_eq!(
            console.handle_line(&format!("remove {D1}")),
            AppAction::BtCommand(BtCommand::Remove(D1.into()))
        );
        assert_eq!(console.handle_line("disconnect 9"), AppAction::Consumed);
        assert_eq!(console.take_output(), vec!["Unknown device: 9"]);
    }

    #[test]
    fn unchanged_device_list_is_printed_only_on_request() {
        let mut console = Console::new();
        let list = vec![device(D1, "Phone", false)];
        console.handle_bt_event(BtEvent::Devices(list.clone()));
        console.take_output();

        console.handle_bt_event(BtEvent::Devices(list.clone()));
        assert!(console.take_output().is_empty());

        assert_eq!(
            console.handle_line("devices"),
            AppAction::BtCommand(BtCommand::ListDevices)
        );
        console.handle_bt_event(BtEvent::Devices(list));
        assert_eq!(console.take_output().len(), 1);
    }

    #[test]
    fn adapter_toggles_parse_flag_and_timeout() {
        let mut console = Console::new();
        assert_eq!(
            console.handle_line("discoverable on 180"),
            AppAction::BtCommand(BtCommand::SetDiscoverable(true, 180))
        );
        assert_eq!(
            console.handle_line("pairable OFF"),
            AppAction::BtCommand(BtCommand::SetPairable(false, 0))
        );
        assert_eq!(console.handle_line("pairable maybe"), AppAction::Consumed);
        assert_eq!(console.handle_line("discoverable on soon"), AppAction::Consumed);
        assert_eq!(
            console.handle_line("alias Living Room"),
            AppAction::BtCommand(BtCommand::SetAlias("Living Room".into()))
        );
        assert_eq!(console.handle_line("quit"), AppAction::Quit);
    }

    #[test]
    fn stale_decision_and_failures_are_reported() {
        let mut console = Console::new();
        console.handle_bt_event(BtEvent::Devices(vec![device(D1, "Phone", false)]));
        console.take_output();

        console.handle_bt_event(BtEvent::Decision {
            path: D1.into(),
            accepted: true,
            found: false,
        });
        console.handle_bt_event(BtEvent::OperationResult {
            path: D1.into(),
            operation: DeviceOperation::Connect,
            error: Some("Device is not in range or powered off".into()),
        });
        assert_eq!(
            console.take_output(),
            vec![
                format!("No pending request for {D1} (already resolved or timed out)"),
                "connect Phone failed: Device is not in range or powered off".to_string(),
            ]
        );
    }

    #[test]
    fn pending_snapshot_replaces_local_view() {
        let mut console = Console::new();
        console.handle_bt_event(BtEvent::PendingRequests(vec![request(
            D1,
            RequestKind::DisplayPasskey,
            Some("001234"),
        )]));
        assert_eq!(
            console.take_output(),
            vec!["Phone (AA:BB:CC:DD:EE:01) is pairing: enter 001234 on the device"]
        );
        assert_eq!(
            console.handle_line("reject"),
            AppAction::BtCommand(BtCommand::RejectPairing(D1.into()))
        );

        console.handle_bt_event(BtEvent::PendingRequests(Vec::new()));
        assert_eq!(console.take_output(), vec!["No pending pairing requests"]);
    }

    #[test]
    fn blank_and_unknown_input() {
        let mut console = Console::new();
        assert_eq!(console.handle_line("   "), AppAction::Consumed);
        assert!(console.take_output().is_empty());
        assert_eq!(console.handle_line("frobnicate"), AppAction::Consumed);
        assert_eq!(
            console.take_output(),
            vec!["Unknown command: frobnicate (try `help`)"]
        );
    }
}
