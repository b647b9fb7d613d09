//! Address canonicalization for the adapters at the system boundary.
//!
//! The engine treats addresses as opaque strings. HTTP handlers and the
//! ledger listener run inputs through [`checksum_address`] first so that
//! the same account always maps to the same node.

use alloy_primitives::Address;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::AccountId;

/// Parse a hex address and return its EIP-55 checksummed form.
pub fn checksum_address(raw: &str) -> Result<AccountId, CoreError> {
    let trimmed = raw.trim();
    let address =
        Address::from_str(trimmed).map_err(|_| CoreError::InvalidAddress(raw.to_string()))?;
    AccountId::new(address.to_checksum(None))
}

/// Checksum an already-decoded address.
pub fn account_from_address(address: &Address) -> AccountId {
    // A checksummed hex string is never empty and has no separators.
    AccountId::new_unchecked(address.to_checksum(None))
}
