//! Ledger listener for hub `Trust` events.
//!
//! This module provides:
//! - Event definitions and decoding
//! - RPC provider wrapper
//! - Sync engine for historical and live block processing

pub mod events;
pub mod provider;
pub mod sync;

pub use events::TrustEvent;
pub use provider::RpcProvider;
pub use sync::{SyncEngine, SyncProgress};
