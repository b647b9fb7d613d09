//! Error types for the core crate.

use thiserror::Error;

/// Core validation error.
///
/// Every variant is an invalid-argument condition: the input is rejected
/// before it can reach shared graph state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Address is empty or contains characters that are not allowed.
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    /// Trust amount below zero.
    #[error("Invalid amount: {0} (must be non-negative)")]
    NegativeAmount(i128),

    /// Trust amount does not fit the capacity range.
    #[error("Invalid amount: {0} (exceeds u64::MAX)")]
    AmountOutOfRange(i128),

    /// Block number below zero.
    #[error("Invalid block number: {0} (must be non-negative)")]
    NegativeBlockNumber(i128),

    /// Block number does not fit the block range.
    #[error("Invalid block number: {0} (exceeds u64::MAX)")]
    BlockNumberOutOfRange(i128),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
