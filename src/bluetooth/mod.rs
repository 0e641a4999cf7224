//! Pairing agent, device coordination and the worker task that owns the
//! BlueZ session.

pub mod adapter;
pub mod agent;
pub mod coordinator;
pub mod errors;
pub mod registry;
pub mod stack;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod worker;
