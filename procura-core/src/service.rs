//! Mandate lifecycle and authorization service.
//!
//! [`MandateService`] owns every mutation of a mandate's status and answers
//! the one question the ledger asks before any money moves: is this mandate,
//! right now, authorized for this amount in this scope?
//!
//! The authorization checks run in a fixed order and the first failure wins,
//! so denials are deterministic and testable:
//!
//! 1. mandate exists (`not_found`)
//! 2. signature verifies (`invalid_signature`)
//! 3. status is active (`status:<value>`)
//! 4. validity window is open (`not_yet_valid` / `expired` - the latter also
//!    persists the `Expired` transition)
//! 5. amount within ceiling (`amount_exceeded`)
//! 6. scope permitted (`scope_not_authorized`)
//! 7. transaction count under the limit (`transaction_limit_reached`)

use crate::amount::Amount;
use crate::audit::{ActorRole, AuditEntry};
use crate::error::{DenialReason, Error, Result};
use crate::mandate::{Mandate, MandateId, MandateStatus};
use crate::request::CreateMandateRequest;
use crate::store::{MandateStore, TransactionStore};
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Outcome of an authorization check.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// Every check passed; the snapshot of the mandate that passed them.
    Granted { mandate: Box<Mandate> },
    /// A check failed; `reason` is the first failure in check order.
    Denied { reason: DenialReason },
}

impl Authorization {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    pub fn denial(&self) -> Option<&DenialReason> {
        match self {
            Self::Denied { reason } => Some(reason),
            Self::Granted { .. } => None,
        }
    }
}

/// Creates mandates, runs authorization checks, and drives lifecycle
/// transitions. Shared across request handlers via `Arc`.
pub struct MandateService {
    mandates: Arc<dyn MandateStore>,
    transactions: Arc<dyn TransactionStore>,
}

impl MandateService {
    pub fn new(mandates: Arc<dyn MandateStore>, transactions: Arc<dyn TransactionStore>) -> Self {
        Self {
            mandates,
            transactions,
        }
    }

    /// Create, sign, and persist a mandate.
    ///
    /// The signing key is generated here, used once, and dropped; the
    /// response carries the public key and signature but never the private
    /// key.
    pub async fn create_mandate(&self, request: CreateMandateRequest) -> Result<Mandate> {
        request.validate()?;

        let mut builder = Mandate::builder()
            .principal(request.principal_id)
            .agent(request.agent_id)
            .max_amount(request.max_amount)
            .currency(request.currency)
            .scopes(request.scopes)
            .valid_for(Duration::hours(i64::from(request.duration_hours)))
            .payment_methods(request.payment_methods)
            .consent(request.consent);
        if let Some(limit) = request.transaction_limit {
            builder = builder.transaction_limit(limit);
        }
        let mandate = builder.build()?;

        self.mandates.put(&mandate).await?;
        tracing::info!(
            mandate_id = %mandate.id(),
            principal_id = %mandate.principal_id(),
            agent_id = %mandate.agent_id(),
            max_amount = %mandate.authorization().max_amount,
            "mandate created"
        );
        Ok(mandate)
    }

    /// Verify a mandate's proof against its content.
    pub fn verify_signature(&self, mandate: &Mandate) -> bool {
        mandate.verify_signature()
    }

    /// Run the ordered authorization checks for a prospective spend.
    ///
    /// Read-only except for one side effect: a mandate found past its
    /// `valid_until` is transitioned to `Expired` in the store.
    pub async fn check_authorization(
        &self,
        mandate_id: &MandateId,
        amount: Amount,
        scope: &str,
    ) -> Result<Authorization> {
        let Some(mandate) = self.mandates.get(mandate_id).await? else {
            return Ok(Authorization::Denied {
                reason: DenialReason::NotFound,
            });
        };

        if !mandate.verify_signature() {
            tracing::warn!(mandate_id = %mandate_id, "mandate failed signature verification");
            return Ok(Authorization::Denied {
                reason: DenialReason::InvalidSignature,
            });
        }

        if mandate.status() != MandateStatus::Active {
            return Ok(Authorization::Denied {
                reason: DenialReason::Status(mandate.status()),
            });
        }

        let now = Utc::now();
        if mandate.is_not_yet_valid_at(now) {
            return Ok(Authorization::Denied {
                reason: DenialReason::NotYetValid,
            });
        }
        if mandate.is_expired_at(now) {
            // Lazy expiry: the check is the point where the wall clock
            // crossing valid_until becomes visible, so persist it here.
            // A concurrent transition losing the CAS is fine - the mandate
            // is no longer active either way.
            let _ = self
                .mandates
                .set_status(
                    mandate_id,
                    MandateStatus::Active,
                    MandateStatus::Expired,
                    None,
                )
                .await?;
            tracing::info!(mandate_id = %mandate_id, "mandate expired");
            return Ok(Authorization::Denied {
                reason: DenialReason::Expired,
            });
        }

        if amount > mandate.authorization().max_amount {
            return Ok(Authorization::Denied {
                reason: DenialReason::AmountExceeded,
            });
        }

        if !mandate
            .authorization()
            .scopes
            .iter()
            .any(|s| s.as_str() == scope)
        {
            return Ok(Authorization::Denied {
                reason: DenialReason::ScopeNotAuthorized,
            });
        }

        if let Some(limit) = mandate.authorization().transaction_limit {
            let used = self.transactions.count_active(mandate_id).await?;
            if used >= limit {
                return Ok(Authorization::Denied {
                    reason: DenialReason::TransactionLimitReached,
                });
            }
        }

        Ok(Authorization::Granted {
            mandate: Box::new(mandate),
        })
    }

    /// Revoke a mandate.
    ///
    /// Idempotent: revoking an already-revoked or expired mandate succeeds
    /// without change. Unknown ids are `MandateNotFound`.
    pub async fn revoke(&self, mandate_id: &MandateId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let Some(mandate) = self.mandates.get(mandate_id).await? else {
            return Err(Error::MandateNotFound(mandate_id.to_string()));
        };

        if mandate.status().is_terminal() {
            return Ok(());
        }

        let applied = self
            .mandates
            .set_status(
                mandate_id,
                mandate.status(),
                MandateStatus::Revoked,
                Some(reason.clone()),
            )
            .await?;
        if applied {
            crate::audit::record_event(
                mandate_id.as_str(),
                &AuditEntry::new(
                    "mandate_revoked",
                    ActorRole::User,
                    mandate.principal_id(),
                    reason.clone(),
                ),
            );
            tracing::info!(mandate_id = %mandate_id, reason = %reason, "mandate revoked");
        }
        // CAS failure means a concurrent transition beat us; revoke is
        // idempotent, so that is still success.
        Ok(())
    }

    /// Pause an active mandate without ending it.
    pub async fn suspend(&self, mandate_id: &MandateId) -> Result<()> {
        let Some(mandate) = self.mandates.get(mandate_id).await? else {
            return Err(Error::MandateNotFound(mandate_id.to_string()));
        };
        match mandate.status() {
            MandateStatus::Suspended => Ok(()),
            MandateStatus::Active => {
                self.mandates
                    .set_status(
                        mandate_id,
                        MandateStatus::Active,
                        MandateStatus::Suspended,
                        None,
                    )
                    .await?;
                tracing::info!(mandate_id = %mandate_id, "mandate suspended");
                Ok(())
            }
            status => Err(Error::InvalidState(format!(
                "cannot suspend mandate in status {}",
                status
            ))),
        }
    }

    /// Resume a suspended mandate.
    pub async fn reinstate(&self, mandate_id: &MandateId) -> Result<()> {
        let Some(mandate) = self.mandates.get(mandate_id).await? else {
            return Err(Error::MandateNotFound(mandate_id.to_string()));
        };
        match mandate.status() {
            MandateStatus::Active => Ok(()),
            MandateStatus::Suspended => {
                self.mandates
                    .set_status(
                        mandate_id,
                        MandateStatus::Suspended,
                        MandateStatus::Active,
                        None,
                    )
                    .await?;
                tracing::info!(mandate_id = %mandate_id, "mandate reinstated");
                Ok(())
            }
            status => Err(Error::InvalidState(format!(
                "cannot reinstate mandate in status {}",
                status
            ))),
        }
    }

    /// Active mandates for a principal, newest first.
    pub async fn list_active(&self, principal_id: &str) -> Result<Vec<Mandate>> {
        let mandates = self.mandates.list_for_principal(principal_id).await?;
        Ok(mandates
            .into_iter()
            .filter(|m| m.status() == MandateStatus::Active)
            .collect())
    }
}
