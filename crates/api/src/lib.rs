//! Axum-based API server for the trust graph.
//!
//! This crate provides:
//! - `GET /trust/:truster/:trustee/:amount` - Path of profiles with enough capacity
//! - `POST /trust/:truster/:trustee/:amount/:blockNumber` - Submit a trust line (`TCB-ID` required)
//! - `GET /stats` - Latest applied block and ledger head
//! - `GET /export` - CSV snapshot of every edge
//! - `GET /health` - Liveness probe

#![warn(missing_docs)]

/// API server runtime and in-process app builder.
pub mod server;
