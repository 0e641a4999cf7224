//! Custom BlueZ agent that puts a human in the pairing loop.
//!
//! BlueZ calls the agent during authentication. Every callback falls into one
//! of three handlings:
//!
//! - **auto-answer**: PIN/passkey entry and allow-listed services are answered
//!   on the spot;
//! - **display-only**: the code is registered and forwarded to the sink, and
//!   the call returns immediately. The entry ends when the stack cancels the
//!   display, the device turns up paired, a callback needing a decision
//!   replaces it, or the timeout elapses;
//! - **confirm**: the request is registered, forwarded, and the BlueZ call is
//!   held open until the sink accepts/rejects or the timeout elapses.
//!
//! The held call races three resolutions (decision, timeout, cancel) against
//! the registry's single-resolution signal, so whichever comes first wins
//! and the rest are no-ops.

use std::sync::Arc;
use std::time::Duration;

use bluer::agent::{
    Agent, AgentHandle, AuthorizeService, DisplayPasskey, DisplayPinCode, ReqError, ReqResult,
    RequestAuthorization, RequestConfirmation, RequestPasskey, RequestPinCode,
};
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::coordinator::DeviceCoordinator;
use super::registry::{Pending, RequestRegistry};
use super::stack::BluetoothStack;
use super::types::{
    BtEvent, Decision, DeviceIdentity, DevicePath, PairingRequest, PairingStatus, RequestKind,
};
use crate::config::PairingConfig;

const UNKNOWN_NAME: &str = "Unknown Device";
const UNKNOWN_ADDRESS: &str = "00:00:00:00:00:00";

/// How often a displayed code checks whether the device finished pairing.
const PAIRED_POLL: Duration = Duration::from_secs(1);

/// The authentication callbacks BlueZ can invoke on an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    RequestPinCode,
    DisplayPinCode(String),
    RequestPasskey,
    DisplayPasskey { passkey: u32, entered: u16 },
    RequestConfirmation(u32),
    RequestAuthorization,
    AuthorizeService(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    AutoAnswer,
    DisplayOnly,
    Confirm,
}

/// Successful answer to a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    PinCode(String),
    Passkey(u32),
    Done,
}

impl Reply {
    fn pin_code(self) -> ReqResult<String> {
        match self {
            Reply::PinCode(pin) => Ok(pin),
            _ => Err(ReqError::Rejected),
        }
    }

    fn passkey(self) -> ReqResult<u32> {
        match self {
            Reply::Passkey(passkey) => Ok(passkey),
            _ => Err(ReqError::Rejected),
        }
    }
}

/// Six digits, zero padded, as both devices display it.
pub fn format_passkey(passkey: u32) -> String {
    format!("{passkey:06}")
}

impl Callback {
    pub fn handling(&self, auto_authorized: &[String]) -> Handling {
        match self {
            Callback::RequestPinCode | Callback::RequestPasskey => Handling::AutoAnswer,
            Callback::AuthorizeService(uuid)
                if auto_authorized
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(uuid)) =>
            {
                Handling::AutoAnswer
            }
            Callback::DisplayPinCode(_) | Callback::DisplayPasskey { .. } => Handling::DisplayOnly,
            Callback::RequestConfirmation(_)
            | Callback::RequestAuthorization
            | Callback::AuthorizeService(_) => Handling::Confirm,
        }
    }

    fn request_kind(&self) -> RequestKind {
        match self {
            Callback::DisplayPinCode(_) | Callback::RequestPinCode => RequestKind::DisplayPinCode,
            Callback::DisplayPasskey { .. } | Callback::RequestPasskey => {
                RequestKind::DisplayPasskey
            }
            Callback::RequestConfirmation(_) => RequestKind::Confirmation,
            Callback::RequestAuthorization => RequestKind::Authorization,
            Callback::AuthorizeService(uuid) => RequestKind::Service { uuid: uuid.clone() },
        }
    }

    fn passkey(&self) -> Option<String> {
        match self {
            Callback::DisplayPinCode(pin) => Some(pin.clone()),
            Callback::DisplayPasskey { passkey, .. } | Callback::RequestConfirmation(passkey) => {
                Some(format_passkey(*passkey))
            }
            _ => None,
        }
    }
}

/// Rejects everything pending if a held call is dropped before it resolved,
/// which is how bluer surfaces the stack's `Cancel`.
struct CancelOnDrop {
    registry: Arc<RequestRegistry>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            let cancelled = self.registry.cancel_all();
            info!(
                "Pairing cancelled by the stack, rejected {} request(s)",
                cancelled.len()
            );
        }
    }
}

pub struct PairingAgent<S> {
    stack: Arc<S>,
    registry: Arc<RequestRegistry>,
    coordinator: Arc<DeviceCoordinator<S>>,
    config: PairingConfig,
    evt_tx: mpsc::Sender<BtEvent>,
}

impl<S: BluetoothStack> PairingAgent<S> {
    pub fn new(
        stack: Arc<S>,
        coordinator: Arc<DeviceCoordinator<S>>,
        config: PairingConfig,
        evt_tx: mpsc::Sender<BtEvent>,
    ) -> Self {
        Self {
            stack,
            registry: Arc::new(RequestRegistry::new()),
            coordinator,
            config,
            evt_tx,
        }
    }

    /// Answer one callback from the stack.
    pub async fn handle(&self, path: DevicePath, callback: Callback) -> ReqResult<Reply> {
        let identity = self.identity(&path).await;

        match callback.handling(&self.config.auto_authorized_services) {
            Handling::AutoAnswer => Ok(self.auto_answer(&identity, &callback)),
            Handling::DisplayOnly => {
                info!(
                    "Displaying code {} for {} ({})",
                    callback.passkey().unwrap_or_default(),
                    identity.name,
                    identity.address
                );
                if let Callback::DisplayPasskey { entered, .. } = &callback {
                    debug!("{entered} digit(s) entered on the remote side");
                }
                self.register(path, identity, &callback).await;
                Ok(Reply::Done)
            }
            Handling::Confirm => {
                info!(
                    "{:?} from {} ({}), waiting for a decision",
                    callback, identity.name, identity.address
                );
                self.confirm(path, identity, &callback).await
            }
        }
    }

    /// Answer a display callback. `dismissed` is bluer's per-call cancel
    /// signal: `Ok` is the stack's `Cancel`, an error only means bluer handed
    /// its cancel slot to a later call.
    pub async fn handle_display(
        &self,
        path: DevicePath,
        callback: Callback,
        dismissed: oneshot::Receiver<()>,
    ) -> ReqResult<Reply> {
        let reply = self.handle(path, callback).await;
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if dismissed.await.is_ok() {
                let cancelled = registry.cancel_all();
                info!(
                    "Display cancelled by the stack, rejected {} request(s)",
                    cancelled.len()
                );
            }
        });
        reply
    }

    /// Accept the pending request for `path`. `false` means it was no longer
    /// pending; that is not an error.
    pub fn accept_pairing(&self, path: &DevicePath) -> bool {
        self.decide(path, Decision::Accept)
    }

    pub fn reject_pairing(&self, path: &DevicePath) -> bool {
        self.decide(path, Decision::Reject)
    }

    /// The stack aborted the interaction; reject everything pending.
    pub fn cancel(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        info!("Pairing cancelled, rejected {} request(s)", cancelled.len());
        cancelled.len()
    }

    /// The agent has been unregistered from the stack.
    pub fn release(&self) {
        info!("Bluetooth agent released");
    }

    pub fn pending_requests(&self) -> Vec<PairingRequest> {
        self.registry.pending()
    }

    fn decide(&self, path: &DevicePath, decision: Decision) -> bool {
        match self.registry.resolve(path, decision) {
            Some(request) => {
                info!(
                    "Pairing with {} ({}) {}",
                    request.device_name, request.device_address, request.status
                );
                true
            }
            None => {
                debug!("Stale {decision:?} for {path}");
                false
            }
        }
    }

    async fn identity(&self, path: &DevicePath) -> DeviceIdentity {
        match self.stack.device_identity(path).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Failed to get device info for {path}: {e}");
                DeviceIdentity {
                    name: UNKNOWN_NAME.into(),
                    address: path
                        .address()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| UNKNOWN_ADDRESS.into()),
                }
            }
        }
    }

    fn auto_answer(&self, identity: &DeviceIdentity, callback: &Callback) -> Reply {
        match callback {
            Callback::RequestPinCode => {
                info!("PIN code requested for {} ({})", identity.name, identity.address);
                Reply::PinCode(self.config.default_pin.clone())
            }
            Callback::RequestPasskey => {
                info!("Passkey requested for {} ({})", identity.name, identity.address);
                Reply::Passkey(self.config.default_passkey)
            }
            Callback::AuthorizeService(uuid) => {
                info!("Auto-authorizing service {uuid} for {}", identity.name);
                Reply::Done
            }
            _ => Reply::Done,
        }
    }

    /// Put the request in the registry. On first registration, flag the
    /// device as pairing, tell the sink and start the watcher.
    async fn register(
        &self,
        path: DevicePath,
        identity: DeviceIdentity,
        callback: &Callback,
    ) -> Pending {
        let pending =
            self.registry
                .create_or_get(path, identity, callback.request_kind(), callback.passkey());

        if pending.created {
            let generation = self.coordinator.begin_pairing(&pending.request.device_path);
            self.watch(&pending, generation);
            let _ = self
                .evt_tx
                .send(BtEvent::PairingRequested(pending.request.clone()))
                .await;
        }
        pending
    }

    /// Every registered request gets a watcher that enforces the timeout
    /// (display-only requests have no caller to do it), finishes a display
    /// once the device is paired, and reports the outcome once.
    fn watch(&self, pending: &Pending, generation: u64) {
        let registry = Arc::clone(&self.registry);
        let coordinator = Arc::clone(&self.coordinator);
        let evt_tx = self.evt_tx.clone();
        let timeout = self.config.timeout;
        let path = pending.request.device_path.clone();
        let id = pending.id;
        let outcome = pending.outcome.clone();
        let paired: BoxFuture<'static, ()> = if pending.request.kind.awaits_decision() {
            future::pending::<()>().boxed()
        } else {
            paired_later(Arc::clone(&self.stack), path.clone()).boxed()
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = outcome.clone() => {}
                _ = tokio::time::sleep(timeout) => {
                    if registry.expire(&path, id).is_some() {
                        info!("Pairing request for {path} timed out");
                    }
                }
                _ = paired => {
                    if registry.close(&path, id, PairingStatus::Accepted).is_some() {
                        info!("{path} paired, code no longer displayed");
                    }
                }
            }
            let status = outcome.await;
            coordinator.end_pairing(&path, generation);
            if registry.is_latest(&path, id) {
                let _ = evt_tx.send(BtEvent::PairingResolved { path, status }).await;
            } else {
                debug!("Request {id} for {path} was superseded ({status})");
            }
        });
    }

    /// Register the request and hold the caller until it resolves.
    async fn confirm(
        &self,
        path: DevicePath,
        identity: DeviceIdentity,
        callback: &Callback,
    ) -> ReqResult<Reply> {
        let mut guard = CancelOnDrop {
            registry: Arc::clone(&self.registry),
            armed: true,
        };
        let pending = self.register(path, identity, callback).await;

        let status = match tokio::time::timeout(self.config.timeout, pending.outcome.clone()).await
        {
            Ok(status) => status,
            Err(_) => {
                self.registry
                    .expire(&pending.request.device_path, pending.id);
                pending.outcome.await
            }
        };
        guard.armed = false;

        match status {
            PairingStatus::Accepted => Ok(Reply::Done),
            status => {
                info!(
                    "Rejecting {} for {}: {status}",
                    describe(&pending.request.kind),
                    pending.request.device_path
                );
                Err(ReqError::Rejected)
            }
        }
    }
}

/// Resolves once `path` becomes paired. A device that is already paired (or
/// unreadable) when the display starts never resolves; only the other
/// endings apply to it.
async fn paired_later<S: BluetoothStack>(stack: Arc<S>, path: DevicePath) {
    if stack.is_paired(&path).await.unwrap_or(true) {
        return future::pending().await;
    }
    loop {
        tokio::time::sleep(PAIRED_POLL).await;
        if stack.is_paired(&path).await.unwrap_or(false) {
            return;
        }
    }
}

fn describe(kind: &RequestKind) -> &'static str {
    match kind {
        RequestKind::DisplayPinCode | RequestKind::DisplayPasskey => "display",
        RequestKind::Confirmation => "confirmation",
        RequestKind::Authorization => "authorization",
        RequestKind::Service { .. } => "service authorization",
    }
}

/// Register the agent with the BlueZ session as the default agent. Returns a
/// handle that must be kept alive for the agent to remain registered.
pub async fn register<S: BluetoothStack>(
    session: &bluer::Session,
    agent: Arc<PairingAgent<S>>,
) -> bluer::Result<AgentHandle> {
    let pin_agent = Arc::clone(&agent);
    let display_pin_agent = Arc::clone(&agent);
    let passkey_agent = Arc::clone(&agent);
    let display_passkey_agent = Arc::clone(&agent);
    let confirm_agent = Arc::clone(&agent);
    let authorize_agent = Arc::clone(&agent);
    let service_agent = agent;

    let agent = Agent {
        request_default: true,

        request_pin_code: Some(Box::new(move |req: RequestPinCode| {
            let agent = Arc::clone(&pin_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                agent
                    .handle(path, Callback::RequestPinCode)
                    .await
                    .and_then(Reply::pin_code)
            })
        })),

        display_pin_code: Some(Box::new(move |req: DisplayPinCode| {
            let agent = Arc::clone(&display_pin_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                agent
                    .handle_display(path, Callback::DisplayPinCode(req.pincode), req.cancel)
                    .await
                    .map(drop)
            })
        })),

        request_passkey: Some(Box::new(move |req: RequestPasskey| {
            let agent = Arc::clone(&passkey_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                agent
                    .handle(path, Callback::RequestPasskey)
                    .await
                    .and_then(Reply::passkey)
            })
        })),

        display_passkey: Some(Box::new(move |req: DisplayPasskey| {
            let agent = Arc::clone(&display_passkey_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                let callback = Callback::DisplayPasskey {
                    passkey: req.passkey,
                    entered: req.entered,
                };
                agent
                    .handle_display(path, callback, req.cancel)
                    .await
                    .map(drop)
            })
        })),

        request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
            let agent = Arc::clone(&confirm_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                agent
                    .handle(path, Callback::RequestConfirmation(req.passkey))
                    .await
                    .map(drop)
            })
        })),

        request_authorization: Some(Box::new(move |req: RequestAuthorization| {
            let agent = Arc::clone(&authorize_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                agent
                    .handle(path, Callback::RequestAuthorization)
                    .await
                    .map(drop)
            })
        })),

        authorize_service: Some(Box::new(move |req: AuthorizeService| {
            let agent = Arc::clone(&service_agent);
            Box::pin(async move {
                let path = DevicePath::for_device(&req.adapter, req.device);
                agent
                    .handle(path, Callback::AuthorizeService(req.service.to_string()))
                    .await
                    .map(drop)
            })
        })),

        ..Default::default()
    };

    session.register_agent(agent).await
}
