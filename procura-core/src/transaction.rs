//! Transaction type - one attempted spend against a mandate.
//!
//! A transaction freezes its amount, currency, and payment method at
//! creation and only ever advances forward through its status machine:
//!
//! ```text
//! Pending --ok--> Completed --refund--> Refunded
//!    \--err--> Failed
//! ```
//!
//! `Failed` and `Refunded` are terminal. Transactions are created only by
//! [`TransactionLedger`](crate::TransactionLedger), and only after a
//! successful reservation against the mandate's limits.

use crate::amount::Amount;
use crate::audit::AuditEntry;
use crate::error::{Error, Result};
use crate::mandate::{MandateId, PaymentMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// The required prefix for all transaction IDs.
pub const TRANSACTION_ID_PREFIX: &str = "prc_txn_";

/// A unique identifier for a transaction.
///
/// Time-ordered (UUIDv7) and prefixed like [`MandateId`]. The id doubles as
/// the idempotency token handed to settlement backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TransactionId(String);

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if !s.starts_with(TRANSACTION_ID_PREFIX) {
            return Err(serde::de::Error::custom(format!(
                "transaction ID must start with '{}', got: {}",
                TRANSACTION_ID_PREFIX,
                if s.len() > 20 { &s[..20] } else { &s }
            )));
        }
        Ok(TransactionId(s))
    }
}

impl TransactionId {
    /// Generate a new time-ordered transaction ID.
    pub fn new() -> Self {
        Self(format!(
            "{}{}",
            TRANSACTION_ID_PREFIX,
            Uuid::now_v7().simple()
        ))
    }

    /// Create a transaction ID from a string.
    pub fn from_string(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !s.starts_with(TRANSACTION_ID_PREFIX) {
            return Err(Error::InvalidTransactionId(format!(
                "transaction ID must start with '{}', got: {}",
                TRANSACTION_ID_PREFIX,
                if s.len() > 20 { &s[..20] } else { &s }
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Statuses that consume mandate capacity.
    ///
    /// Failed transactions release their reservation; refunded ones already
    /// spent it.
    pub fn holds_capacity(self) -> bool {
        matches!(self, Self::Pending | Self::Completed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// What the authorization check concluded, recorded at authorization time.
///
/// Kept for audit even if the mandate is later revoked or expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSnapshot {
    pub mandate_verified: bool,
    pub signature_verified: bool,
    pub amount_within_limit: bool,
    pub scope_authorized: bool,
}

impl VerificationSnapshot {
    /// Snapshot for a spend that passed every check.
    pub fn all_verified() -> Self {
        Self {
            mandate_verified: true,
            signature_verified: true,
            amount_within_limit: true,
            scope_authorized: true,
        }
    }
}

/// One attempted spend against a mandate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    mandate_id: MandateId,
    agent_id: String,
    principal_id: String,

    amount: Amount,
    currency: String,
    description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,

    /// Copied from the mandate at execution time, not a live reference.
    payment_method: PaymentMethod,

    status: TransactionStatus,
    verification: VerificationSnapshot,
    audit_trail: Vec<AuditEntry>,

    #[serde(skip_serializing_if = "Option::is_none")]
    settlement_ref: Option<String>,

    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a pending transaction. Ledger-internal: a transaction must
    /// not exist without a reservation behind it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mandate_id: MandateId,
        agent_id: impl Into<String>,
        principal_id: impl Into<String>,
        amount: Amount,
        currency: impl Into<String>,
        description: impl Into<String>,
        metadata: BTreeMap<String, String>,
        payment_method: PaymentMethod,
        verification: VerificationSnapshot,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            mandate_id,
            agent_id: agent_id.into(),
            principal_id: principal_id.into(),
            amount,
            currency: currency.into(),
            description: description.into(),
            metadata,
            payment_method,
            status: TransactionStatus::Pending,
            verification,
            audit_trail: Vec::new(),
            settlement_ref: None,
            created_at: now,
            authorized_at: Some(now),
            completed_at: None,
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn mandate_id(&self) -> &MandateId {
        &self.mandate_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn payment_method(&self) -> &PaymentMethod {
        &self.payment_method
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn verification(&self) -> &VerificationSnapshot {
        &self.verification
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit_trail
    }

    pub fn settlement_ref(&self) -> Option<&str> {
        self.settlement_ref.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn authorized_at(&self) -> Option<DateTime<Utc>> {
        self.authorized_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Append an audit entry. The trail is append-only; entries are never
    /// rewritten or removed.
    pub fn record(&mut self, entry: AuditEntry) {
        self.audit_trail.push(entry);
    }

    /// `Pending -> Completed`.
    pub fn mark_completed(&mut self, settlement_ref: Option<String>) -> Result<()> {
        if self.status != TransactionStatus::Pending {
            return Err(Error::InvalidState(format!(
                "cannot complete transaction in status {}",
                self.status
            )));
        }
        self.status = TransactionStatus::Completed;
        self.settlement_ref = settlement_ref;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `Pending -> Failed`. Releases the capacity this transaction reserved.
    pub fn mark_failed(&mut self) -> Result<()> {
        if self.status != TransactionStatus::Pending {
            return Err(Error::InvalidState(format!(
                "cannot fail transaction in status {}",
                self.status
            )));
        }
        self.status = TransactionStatus::Failed;
        Ok(())
    }

    /// `Completed -> Refunded`. Any other source status is an error.
    pub fn mark_refunded(&mut self) -> Result<()> {
        if self.status != TransactionStatus::Completed {
            return Err(Error::InvalidState(format!(
                "cannot refund transaction in status {}",
                self.status
            )));
        }
        self.status = TransactionStatus::Refunded;
        Ok(())
    }
}
