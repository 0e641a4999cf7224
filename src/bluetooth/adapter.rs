//! Discoverable/pairable windows and adapter identity.

use std::sync::Arc;

use tracing::info;

use super::errors::Result;
use super::stack::BluetoothStack;
use super::types::AdapterInfo;

pub struct AdapterController<S> {
    stack: Arc<S>,
}

impl<S: BluetoothStack> AdapterController<S> {
    pub fn new(stack: Arc<S>) -> Self {
        Self { stack }
    }

    /// Toggle discoverability. `timeout_secs` is the auto-expiry window,
    /// 0 keeps the adapter discoverable until told otherwise. The timeout is
    /// written first so it applies to the window being opened.
    pub async fn set_discoverable(&self, discoverable: bool, timeout_secs: u32) -> Result<()> {
        self.stack.set_discoverable_timeout(timeout_secs).await?;
        self.stack.set_discoverable(discoverable).await?;
        info!("Adapter discoverable: {discoverable} (timeout {timeout_secs}s)");
        Ok(())
    }

    pub async fn set_pairable(&self, pairable: bool, timeout_secs: u32) -> Result<()> {
        self.stack.set_pairable_timeout(timeout_secs).await?;
        self.stack.set_pairable(pairable).await?;
        info!("Adapter pairable: {pairable} (timeout {timeout_secs}s)");
        Ok(())
    }

    /// Set the friendly name other devices see.
    pub async fn set_alias(&self, alias: &str) -> Result<()> {
        self.stack.set_alias(alias).await?;
        info!("Adapter alias set to: {alias}");
        Ok(())
    }

    pub async fn adapter_info(&self) -> Result<AdapterInfo> {
        self.stack.adapter_info().await
    }
}
