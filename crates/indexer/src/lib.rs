//! Trust line ingestion for the trust graph.
//!
//! This crate provides:
//! - A ledger listener for hub `Trust` events
//! - SQLite storage of trust lines with latest-wins semantics
//! - Trust line sinks (CSV file export, forwarding to a remote service)
//! - Profile enrichment with an injected cache
//! - CSV snapshot export
//!
//! ```text
//! ledger RPC ──► listener ──► sink (file | remote)
//!                   │
//!                   ▼
//!                SQLite ◄──── trustgraph-api (replay + write-through)
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod enrichment;
pub mod export;
pub mod listener;
pub mod sink;
pub mod storage;

pub use config::Config;
pub use enrichment::{CirclesClient, ProfileCache, ProfileDirectory};
pub use sink::{FileExportSink, RemoteSink, TrustLineSink};
pub use storage::Storage;
