//! Audit trail infrastructure.
//!
//! Two layers share the [`AuditEntry`] shape:
//!
//! 1. Every [`Transaction`](crate::Transaction) carries its own append-only
//!    trail - the authoritative narrative of what happened to that spend.
//! 2. A process-wide [`AuditSink`] receives lifecycle events (mandate
//!    created, revoked, reconciled) for export to external log pipelines.
//!
//! Entries are immutable once written; each carries a SHA-256 integrity tag
//! over its content so after-the-fact edits are detectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// The human principal.
    User,
    /// The automated agent spending under a mandate.
    Agent,
    /// Procura itself (state transitions, reconciliation).
    System,
    /// The external settlement backend.
    PaymentProvider,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
            Self::PaymentProvider => "payment_provider",
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable fact about a transaction's or mandate's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When this happened.
    pub at: DateTime<Utc>,
    /// Action name, e.g. `transaction_initiated`, `payment_completed`.
    pub action: String,
    /// Who did it.
    pub actor_role: ActorRole,
    /// Identifier of the actor (agent id, backend name, "procura").
    pub actor_id: String,
    /// Free-text detail.
    pub detail: String,
    /// SHA-256 over the entry content, hex-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_tag: Option<String>,
}

impl AuditEntry {
    /// Create a new entry stamped now, with its integrity tag computed.
    pub fn new(
        action: impl Into<String>,
        actor_role: ActorRole,
        actor_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            at: Utc::now(),
            action: action.into(),
            actor_role,
            actor_id: actor_id.into(),
            detail: detail.into(),
            integrity_tag: None,
        };
        entry.integrity_tag = Some(entry.compute_tag());
        entry
    }

    /// Recompute the tag and compare against the stored one.
    ///
    /// Entries written without a tag verify trivially.
    pub fn verify_integrity(&self) -> bool {
        match &self.integrity_tag {
            Some(tag) => *tag == self.compute_tag(),
            None => true,
        }
    }

    fn compute_tag(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.at.timestamp_micros().to_le_bytes());
        hasher.update(b"|");
        hasher.update(self.action.as_bytes());
        hasher.update(b"|");
        hasher.update(self.actor_role.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.actor_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.detail.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Destination for lifecycle audit events.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Record an event about the given subject (a mandate or transaction id).
    fn record(&self, subject: &str, entry: &AuditEntry);
}

/// A sink that writes events to stdout as JSON lines.
///
/// Suitable for containerized environments where logs are scraped by an
/// external agent.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for StdoutSink {
    fn record(&self, subject: &str, entry: &AuditEntry) {
        let line = serde_json::json!({
            "subject": subject,
            "at": entry.at,
            "action": entry.action,
            "actor_role": entry.actor_role,
            "actor_id": entry.actor_id,
            "detail": entry.detail,
            "integrity_tag": entry.integrity_tag,
        });
        println!("{}", line);
    }
}

/// A sink that does nothing (the default; also for tests).
#[derive(Debug, Default)]
pub struct NoOpSink;

impl AuditSink for NoOpSink {
    fn record(&self, _subject: &str, _entry: &AuditEntry) {}
}

/// Global audit sink.
///
/// A global avoids threading the sink through every constructor.
/// Unset means events are dropped.
static GLOBAL_SINK: RwLock<Option<Arc<dyn AuditSink>>> = RwLock::new(None);

/// Set the global audit sink.
pub fn set_global_sink(sink: Arc<dyn AuditSink>) {
    let mut lock = GLOBAL_SINK.write().unwrap();
    *lock = Some(sink);
}

/// Record an event through the global sink, if one is set.
pub fn record_event(subject: &str, entry: &AuditEntry) {
    if let Ok(lock) = GLOBAL_SINK.read() {
        if let Some(sink) = lock.as_ref() {
            sink.record(subject, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_tag_detects_mutation() {
        let mut entry = AuditEntry::new(
            "payment_completed",
            ActorRole::PaymentProvider,
            "card-backend",
            "settled ref=ch_123",
        );
        assert!(entry.verify_integrity());

        entry.detail = "settled ref=ch_999".into();
        assert!(!entry.verify_integrity());
    }

    #[test]
    fn test_untagged_entry_verifies() {
        let entry = AuditEntry {
            at: Utc::now(),
            action: "legacy".into(),
            actor_role: ActorRole::System,
            actor_id: "procura".into(),
            detail: String::new(),
            integrity_tag: None,
        };
        assert!(entry.verify_integrity());
    }

    #[test]
    fn test_actor_role_strings() {
        assert_eq!(ActorRole::User.as_str(), "user");
        assert_eq!(ActorRole::Agent.as_str(), "agent");
        assert_eq!(ActorRole::System.as_str(), "system");
        assert_eq!(ActorRole::PaymentProvider.as_str(), "payment_provider");
    }

    #[test]
    fn test_serde_roundtrip() {
        let entry = AuditEntry::new("transaction_initiated", ActorRole::Agent, "a1", "350.00 USD");
        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
        assert!(back.verify_integrity());
    }
}
