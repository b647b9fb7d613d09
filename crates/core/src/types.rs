//! Core types for the trust graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::CoreError;

/// Opaque node identifier (an already-normalized address string).
///
/// Nodes have no lifecycle of their own; an `AccountId` is only a key into
/// the edge map. Cloning is a reference-count bump.
///
/// Validation is structural only: the identifier must be non-empty and must
/// not contain whitespace or commas. Canonical formatting (checksumming) is
/// the caller's job, see [`crate::checksum_address`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(Arc<str>);

impl AccountId {
    /// Create a new AccountId, validating its shape.
    pub fn new(value: impl AsRef<str>) -> Result<Self, CoreError> {
        let value = value.as_ref();
        if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == ',') {
            return Err(CoreError::InvalidAddress(value.to_string()));
        }
        Ok(AccountId(Arc::from(value)))
    }

    /// Create an AccountId without validation (use with caution).
    pub(crate) fn new_unchecked(value: String) -> Self {
        AccountId(Arc::from(value))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::new(s)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for AccountId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Deserialize as a string, then validate through AccountId::new
        let value = String::deserialize(deserializer)?;
        AccountId::new(value).map_err(|e| serde::de::Error::custom(format!("{}", e)))
    }
}

/// A validated trust line update as handed over by the event decoder.
///
/// `truster` accepts up to `amount` vouched by `trustee`, as of
/// `block_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustLine {
    /// Party accepting trust.
    pub truster: AccountId,
    /// Party being trusted.
    pub trustee: AccountId,
    /// Capacity the truster accepts from the trustee.
    pub amount: u64,
    /// Ledger block at which the amount was set.
    pub block_number: u64,
}

impl TrustLine {
    /// Build a trust line from raw, possibly negative, inputs.
    ///
    /// Negative values and values beyond `u64::MAX` are rejected.
    pub fn new(
        truster: AccountId,
        trustee: AccountId,
        amount: i128,
        block_number: i128,
    ) -> Result<Self, CoreError> {
        if amount < 0 {
            return Err(CoreError::NegativeAmount(amount));
        }
        if block_number < 0 {
            return Err(CoreError::NegativeBlockNumber(block_number));
        }
        let amount = u64::try_from(amount).map_err(|_| CoreError::AmountOutOfRange(amount))?;
        let block_number = u64::try_from(block_number)
            .map_err(|_| CoreError::BlockNumberOutOfRange(block_number))?;

        Ok(Self {
            truster,
            trustee,
            amount,
            block_number,
        })
    }

    /// Build a trust line from string addresses and raw numbers.
    pub fn from_parts(
        truster: &str,
        trustee: &str,
        amount: i128,
        block_number: i128,
    ) -> Result<Self, CoreError> {
        Self::new(
            AccountId::new(truster)?,
            AccountId::new(trustee)?,
            amount,
            block_number,
        )
    }
}

/// Latest accepted state of a directed trust edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Party accepting trust.
    pub truster: AccountId,
    /// Party being trusted.
    pub trustee: AccountId,
    /// Current capacity. Zero means impassable.
    pub capacity: u64,
    /// Block at which `capacity` was last set.
    pub last_block: u64,
}

impl Edge {
    /// Whether a path may traverse this edge at all.
    pub const fn is_passable(&self) -> bool {
        self.capacity > 0
    }
}

impl From<&TrustLine> for Edge {
    fn from(line: &TrustLine) -> Self {
        Edge {
            truster: line.truster.clone(),
            trustee: line.trustee.clone(),
            capacity: line.amount,
            last_block: line.block_number,
        }
    }
}

/// Display metadata for an address, as returned by the enrichment lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// The address this profile belongs to.
    pub safe_address: String,
    /// Display name, if registered.
    #[serde(default)]
    pub username: Option<String>,
    /// Avatar image URL, if registered.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Address-only profile used when enrichment has nothing to offer.
    pub fn fallback(address: &AccountId) -> Self {
        Profile {
            safe_address: address.to_string(),
            username: None,
            avatar_url: None,
        }
    }
}

/// Ingestion progress relative to the ledger head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Highest block processed so far.
    pub latest_block: String,
    /// Current ledger head.
    pub current_block: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_validation() {
        assert!(AccountId::new("0xabc").is_ok());
        assert_eq!(
            AccountId::new(""),
            Err(CoreError::InvalidAddress(String::new()))
        );
        assert!(AccountId::new("0x a").is_err());
        assert!(AccountId::new("0xa,0xb").is_err());
    }

    #[test]
    fn test_account_id_serde_validates() {
        let id: AccountId = serde_json::from_str("\"0xabc\"").unwrap();
        assert_eq!(id.as_str(), "0xabc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"0xabc\"");

        let err = serde_json::from_str::<AccountId>("\"a b\"");
        assert!(err.is_err());
    }

    #[test]
    fn test_trust_line_rejects_negative_inputs() {
        assert_eq!(
            TrustLine::from_parts("A", "B", -1, 5),
            Err(CoreError::NegativeAmount(-1))
        );
        assert_eq!(
            TrustLine::from_parts("A", "B", 1, -5),
            Err(CoreError::NegativeBlockNumber(-5))
        );
        assert_eq!(
            TrustLine::from_parts("A", "B", i128::from(u64::MAX) + 1, 5),
            Err(CoreError::AmountOutOfRange(i128::from(u64::MAX) + 1))
        );
    }

    #[test]
    fn test_trust_line_accepts_zero() {
        let line = TrustLine::from_parts("A", "B", 0, 0).unwrap();
        assert_eq!(line.amount, 0);
        assert_eq!(line.block_number, 0);
        assert!(!Edge::from(&line).is_passable());
    }

    #[test]
    fn test_profile_json_shape() {
        let profile = Profile::fallback(&AccountId::new("0xabc").unwrap());
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["safeAddress"], "0xabc");
        assert!(json["username"].is_null());

        let parsed: Profile =
            serde_json::from_str(r#"{"safeAddress":"0x1","username":"alice","id":7}"#).unwrap();
        assert_eq!(parsed.username.as_deref(), Some("alice"));
        assert_eq!(parsed.avatar_url, None);
    }
}
