//! `RequestId`: the canonical workflow identifier and aggregate stream id.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Canonical workflow identifier: `"{partitionKey}|{rowKey}"`.
///
/// Constructed from intake keys, or parsed from any payload that carries a
/// `requestId` field. Serves as the aggregate stream id everywhere in this
/// crate family — event stores, projections, and idempotency leases are all
/// keyed (in part) by `RequestId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId {
    partition_key: String,
    row_key: String,
}

impl RequestId {
    /// Construct directly from intake keys. Neither half may be empty, and
    /// neither half may itself contain the `|` separator (that would make
    /// round-tripping through `Display`/`FromStr` ambiguous).
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let partition_key = partition_key.into();
        let row_key = row_key.into();

        if partition_key.is_empty() {
            return Err(DomainError::invalid_request_id("partitionKey is empty"));
        }
        if row_key.is_empty() {
            return Err(DomainError::invalid_request_id("rowKey is empty"));
        }
        if partition_key.contains('|') || row_key.contains('|') {
            return Err(DomainError::invalid_request_id(
                "partitionKey/rowKey must not contain '|'",
            ));
        }

        Ok(Self {
            partition_key,
            row_key,
        })
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn row_key(&self) -> &str {
        &self.row_key
    }

    /// The canonical `"{partitionKey}|{rowKey}"` string form.
    pub fn as_canonical(&self) -> String {
        format!("{}|{}", self.partition_key, self.row_key)
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}|{}", self.partition_key, self.row_key)
    }
}

impl FromStr for RequestId {
    type Err = DomainError;

    /// Parses `"{partitionKey}|{rowKey}"`. Requires exactly one `|`
    /// separator with non-empty content on both sides.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '|');
        let partition_key = parts.next().unwrap_or_default();
        let rest = parts.next().ok_or_else(|| {
            DomainError::invalid_request_id(format!("missing '|' separator in {s:?}"))
        })?;

        if rest.contains('|') {
            return Err(DomainError::invalid_request_id(format!(
                "more than one '|' separator in {s:?}"
            )));
        }

        Self::new(partition_key, rest)
    }
}

impl TryFrom<String> for RequestId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.as_canonical()
    }
}
