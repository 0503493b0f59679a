use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::shipping::ProviderOperation;

/// Failure talking to one carrier integration
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("no built-in adapter registered for key '{0}'")]
    UnknownBuiltIn(String),

    #[error("operation not supported by this adapter")]
    Unsupported,

    #[error("circuit open, failing fast")]
    CircuitOpen,

    #[error("carrier rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Transport-level failures that may succeed on an identical retry
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Unreachable(_))
    }
}

/// A `ProviderError` attributed to the provider and operation that raised it
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{provider} {operation} failed: {error}")]
pub struct ProviderFailure {
    pub provider_id: Uuid,
    pub provider: String,
    pub operation: ProviderOperation,
    #[source]
    pub error: ProviderError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuantityShortfall {
    pub line_item_id: Uuid,
    pub requested: i32,
    pub remaining: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Requested quantities exceed what remains unfulfilled")]
    QuantityExceeded(Vec<QuantityShortfall>),

    #[error("Fulfillment already canceled at {0}")]
    AlreadyCanceled(DateTime<Utc>),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_names_provider() {
        let failure = ProviderFailure {
            provider_id: Uuid::nil(),
            provider: "Acme Post".to_string(),
            operation: ProviderOperation::QuoteRates,
            error: ProviderError::Timeout(15_000),
        };
        assert_eq!(failure.to_string(), "Acme Post quote_rates failed: timed out after 15000 ms");
        assert!(failure.error.is_transient());
        assert!(!ProviderError::Malformed("x".into()).is_transient());
    }
}
