//! In-flight pairing requests, keyed by device path.
//!
//! Each request carries a single-resolution signal: a oneshot whose receiver
//! is wrapped in a `Shared` future so that every callback waiting on the same
//! device observes the same outcome. All state lives behind one mutex and
//! every operation is a single locked step, so "resolve only if still
//! pending" cannot race with a timeout or a late decision.

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::types::{Decision, DeviceIdentity, DevicePath, PairingRequest, PairingStatus, RequestKind};

/// Resolves to the terminal status of a request. Cheap to clone.
pub type Outcome = Shared<BoxFuture<'static, PairingStatus>>;

/// Handle returned by [`RequestRegistry::create_or_get`].
#[derive(Clone)]
pub struct Pending {
    pub request: PairingRequest,
    pub outcome: Outcome,
    /// Identifies this registration; a later request for the same path gets
    /// a different id, so stale timers cannot expire it.
    pub id: u64,
    /// `false` when an existing pending entry was reused.
    pub created: bool,
}

struct Entry {
    id: u64,
    request: PairingRequest,
    resolver: oneshot::Sender<PairingStatus>,
    outcome: Outcome,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<DevicePath, Entry>,
    /// Id of the most recent registration per path, kept after resolution.
    latest: HashMap<DevicePath, u64>,
    next_id: u64,
}

#[derive(Default)]
pub struct RequestRegistry {
    inner: Mutex<Inner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pending request for `path`, registering a new one if there
    /// is none. At most one request exists per path.
    ///
    /// A pending display-only entry does not absorb a request that needs a
    /// decision: it is settled as rejected and the new request takes its
    /// place.
    pub fn create_or_get(
        &self,
        path: DevicePath,
        identity: DeviceIdentity,
        kind: RequestKind,
        passkey: Option<String>,
    ) -> Pending {
        let mut inner = self.inner.lock();

        let reusable = inner
            .entries
            .get(&path)
            .map(|entry| entry.request.kind.awaits_decision() || !kind.awaits_decision());
        match reusable {
            Some(true) => {
                if let Some(entry) = inner.entries.get(&path) {
                    debug!("Reusing pending request for {path}");
                    return Pending {
                        request: entry.request.clone(),
                        outcome: entry.outcome.clone(),
                        id: entry.id,
                        created: false,
                    };
                }
            }
            Some(false) => {
                if let Some(entry) = inner.entries.remove(&path) {
                    debug!("{kind:?} for {path} replaces the displayed code");
                    settle(entry, PairingStatus::Rejected);
                }
            }
            None => {}
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let (resolver, rx) = oneshot::channel();
        // A dropped resolver can only mean the registry itself went away.
        let outcome = rx
            .map(|status| status.unwrap_or(PairingStatus::Rejected))
            .boxed()
            .shared();
        let request = PairingRequest {
            device_path: path.clone(),
            device_name: identity.name,
            device_address: identity.address,
            kind,
            passkey,
            status: PairingStatus::Pending,
        };

        inner.latest.insert(path.clone(), id);
        inner.entries.insert(
            path,
            Entry {
                id,
                request: request.clone(),
                resolver,
                outcome: outcome.clone(),
            },
        );

        Pending {
            request,
            outcome,
            id,
            created: true,
        }
    }

    /// Apply an operator decision. Returns the resolved request, or `None`
    /// if nothing was pending for `path` (already resolved or timed out).
    pub fn resolve(&self, path: &DevicePath, decision: Decision) -> Option<PairingRequest> {
        let entry = self.inner.lock().entries.remove(path);
        match entry {
            Some(entry) => Some(settle(entry, decision.into())),
            None => {
                debug!("No pending request for {path}; {decision:?} ignored");
                None
            }
        }
    }

    /// Time out registration `id` if it is still the pending one for `path`.
    pub fn expire(&self, path: &DevicePath, id: u64) -> Option<PairingRequest> {
        self.close(path, id, PairingStatus::Timeout)
    }

    /// Settle registration `id` with `status` if it is still the pending one
    /// for `path`.
    pub fn close(
        &self,
        path: &DevicePath,
        id: u64,
        status: PairingStatus,
    ) -> Option<PairingRequest> {
        let mut inner = self.inner.lock();
        if inner.entries.get(path).map(|e| e.id) != Some(id) {
            return None;
        }
        let entry = inner.entries.remove(path)?;
        drop(inner);
        Some(settle(entry, status))
    }

    /// `false` once a later registration exists for `path`.
    pub fn is_latest(&self, path: &DevicePath, id: u64) -> bool {
        self.inner.lock().latest.get(path).map_or(true, |latest| *latest == id)
    }

    /// Reject everything pending and empty the registry.
    pub fn cancel_all(&self) -> Vec<PairingRequest> {
        let drained: Vec<Entry> = {
            let mut inner = self.inner.lock();
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };
        drained
            .into_iter()
            .map(|entry| settle(entry, PairingStatus::Rejected))
            .collect()
    }

    pub fn pending(&self) -> Vec<PairingRequest> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|entry| entry.request.clone())
            .collect()
    }
}

/// Fire the signal of an entry already removed from the map.
fn settle(entry: Entry, status: PairingStatus) -> PairingRequest {
    debug_assert!(status.is_terminal());
    let mut request = entry.request;
    request.status = status;
    // Nobody may be listening (display-only request with no watcher left).
    let _ = entry.resolver.send(status);
    request
}
