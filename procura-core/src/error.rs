//! Error types for Procura.
//!
//! Authorization denials are deliberately not opaque: every rejected spend
//! carries a machine-readable [`DenialReason`] code so the calling agent can
//! decide whether to retry, request a new mandate, or abort.

use crate::mandate::MandateStatus;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Result type alias for Procura operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an authorization check denied a spend.
///
/// The checks in [`MandateService::check_authorization`] run in a fixed
/// order and the first failure wins, so a given mandate/spend pair always
/// produces the same reason.
///
/// [`MandateService::check_authorization`]: crate::service::MandateService::check_authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// No mandate exists under the given id.
    NotFound,
    /// The mandate's embedded signature does not match its content.
    InvalidSignature,
    /// The mandate is not `active` (revoked or suspended).
    Status(MandateStatus),
    /// The mandate's validity window has not opened yet.
    NotYetValid,
    /// The mandate's validity window has closed.
    Expired,
    /// The requested amount exceeds the mandate's per-transaction ceiling.
    AmountExceeded,
    /// The requested scope is not in the mandate's permitted set.
    ScopeNotAuthorized,
    /// The mandate's transaction-count limit is exhausted.
    TransactionLimitReached,
}

impl DenialReason {
    /// Machine-readable reason code.
    ///
    /// Status denials render as `status:<value>`, e.g. `status:revoked`.
    pub fn code(&self) -> String {
        match self {
            Self::NotFound => "not_found".to_string(),
            Self::InvalidSignature => "invalid_signature".to_string(),
            Self::Status(status) => format!("status:{}", status.as_str()),
            Self::NotYetValid => "not_yet_valid".to_string(),
            Self::Expired => "expired".to_string(),
            Self::AmountExceeded => "amount_exceeded".to_string(),
            Self::ScopeNotAuthorized => "scope_not_authorized".to_string(),
            Self::TransactionLimitReached => "transaction_limit_reached".to_string(),
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for DenialReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(status) = s.strip_prefix("status:") {
            let status = MandateStatus::from_str(status)
                .map_err(|_| format!("unknown mandate status: {}", status))?;
            return Ok(Self::Status(status));
        }
        match s {
            "not_found" => Ok(Self::NotFound),
            "invalid_signature" => Ok(Self::InvalidSignature),
            "not_yet_valid" => Ok(Self::NotYetValid),
            "expired" => Ok(Self::Expired),
            "amount_exceeded" => Ok(Self::AmountExceeded),
            "scope_not_authorized" => Ok(Self::ScopeNotAuthorized),
            "transaction_limit_reached" => Ok(Self::TransactionLimitReached),
            other => Err(format!("unknown denial reason: {}", other)),
        }
    }
}

impl Serialize for DenialReason {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DenialReason {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur in Procura operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Malformed create/spend request. Rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// No mandate exists under the given id.
    #[error("mandate not found: {0}")]
    MandateNotFound(String),

    /// No transaction exists under the given id.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// An authorization check denied the spend. No transaction was created.
    #[error("unauthorized: {0}")]
    Unauthorized(DenialReason),

    /// No settlement backend is registered for the payment method type.
    #[error("unsupported payment method: {0}")]
    UnsupportedMethod(String),

    /// An operation is not legal from the record's current status
    /// (e.g. refunding a transaction that never completed).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The settlement backend rejected or errored. Callers never see this
    /// from `process_payment` - it is folded into a failed transaction.
    #[error("settlement failed: {0}")]
    ExecutionFailure(String),

    /// The backing store failed a read or write.
    #[error("storage error: {0}")]
    Storage(String),

    /// Mandate signature verification failed.
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Cryptographic operation failed.
    #[error("cryptographic error: {0}")]
    CryptoError(String),

    /// Invalid mandate ID format.
    #[error("invalid mandate ID: {0}")]
    InvalidMandateId(String),

    /// Invalid transaction ID format.
    #[error("invalid transaction ID: {0}")]
    InvalidTransactionId(String),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Payload size exceeds maximum allowed.
    #[error("payload size {size} bytes exceeds maximum {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::DeserializationError(e.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::CryptoError(e.to_string())
    }
}
