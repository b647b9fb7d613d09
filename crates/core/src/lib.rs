//! # Trust Graph Core
//!
//! Domain types shared by every trust graph component.
//!
//! ## Features
//!
//! - **Identifiers**: `AccountId`, an opaque, cheap-to-clone node address
//! - **Trust lines**: validated `(truster, trustee, amount, blockNumber)` tuples
//! - **Edges**: the latest accepted capacity per directed pair
//! - **Profiles**: enrichment metadata with an address-only fallback
//! - **Addresses**: EIP-55 checksumming for the adapters at the boundary

#![warn(missing_docs)]

pub mod address;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use address::{account_from_address, checksum_address};
pub use error::{CoreError, Result};
pub use types::*;
