//! Transaction ledger - end-to-end orchestration of a spend.
//!
//! `process_payment` is the only way a transaction comes into existence:
//!
//! 1. ask [`MandateService`] for authorization
//! 2. atomically reserve capacity against the mandate's limits
//! 3. select the highest-priority payment method from the mandate snapshot
//! 4. create the transaction as `pending` with a `transaction_initiated`
//!    audit entry
//! 5. hand it to the [`PaymentExecutor`]; success completes the
//!    transaction, failure fails it and releases the reserved capacity
//! 6. persist the final record
//!
//! Steps 1-4 run under a per-mandate lock, so two concurrent spends against
//! the same mandate are totally ordered with respect to its
//! transaction-count limit: they can never both observe free capacity.
//! Settlement itself runs outside the lock.
//!
//! A revoke that lands before a spend's reservation denies it; a spend
//! already past reservation runs to completion and is not retroactively
//! invalidated.

use crate::amount::Amount;
use crate::audit::{ActorRole, AuditEntry};
use crate::error::{Error, Result};
use crate::mandate::MandateId;
use crate::request::ProcessPaymentRequest;
use crate::service::{Authorization, MandateService};
use crate::settlement::{PaymentExecutor, SettlementRequest};
use crate::store::TransactionStore;
use crate::transaction::{Transaction, TransactionId, VerificationSnapshot};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a processed payment ended.
///
/// Both variants carry a fully persisted transaction. A declined settlement
/// is a normal outcome, not an error - callers must not need to distinguish
/// "payment declined" from "service crashed" by catching errors.
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    /// Settlement succeeded; the transaction is `completed`.
    Completed(Transaction),
    /// Settlement declined or errored; the transaction is `failed` and its
    /// capacity reservation has been released.
    Declined(Transaction),
}

impl PaymentOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Completed(txn) | Self::Declined(txn) => txn,
        }
    }
}

/// Aggregate spend figures for a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalStats {
    /// All transactions ever recorded for the principal.
    pub transaction_count: usize,
    /// Sum of completed (not refunded) transaction amounts.
    pub total_completed: Amount,
    pub active_mandates: usize,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

/// Orchestrates spends against mandates.
pub struct TransactionLedger {
    service: Arc<MandateService>,
    transactions: Arc<dyn TransactionStore>,
    executor: Arc<PaymentExecutor>,
    /// Per-mandate serializing locks for the check-and-reserve step.
    /// The outer mutex only guards the map itself.
    reservations: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TransactionLedger {
    pub fn new(
        service: Arc<MandateService>,
        transactions: Arc<dyn TransactionStore>,
        executor: Arc<PaymentExecutor>,
    ) -> Self {
        Self {
            service,
            transactions,
            executor,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    fn reservation_lock(&self, mandate_id: &MandateId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.reservations.lock().expect("reservation map poisoned");
        locks
            .entry(mandate_id.as_str().to_string())
            .or_default()
            .clone()
    }

    /// Process one spend end to end.
    ///
    /// Errors (`Validation`, `Unauthorized`, `UnsupportedMethod`) mean no
    /// transaction was created. An `Ok` always carries a persisted
    /// transaction, completed or failed.
    pub async fn process_payment(&self, request: ProcessPaymentRequest) -> Result<PaymentOutcome> {
        request.validate()?;

        let lock = self.reservation_lock(&request.mandate_id);
        let reservation = lock.lock().await;

        // Step 1: authorization. A denial creates nothing.
        let authorization = self
            .service
            .check_authorization(&request.mandate_id, request.amount, &request.scope)
            .await?;
        let mandate = match authorization {
            Authorization::Denied { reason } => {
                tracing::info!(
                    mandate_id = %request.mandate_id,
                    amount = %request.amount,
                    scope = %request.scope,
                    reason = %reason,
                    "payment denied"
                );
                return Err(Error::Unauthorized(reason));
            }
            Authorization::Granted { mandate } => mandate,
        };

        // Step 3 runs before the reservation is committed: a mandate whose
        // preferred rail has no registered backend must not burn capacity.
        let method = mandate
            .preferred_method()
            .ok_or_else(|| Error::Validation("mandate has no payment methods".to_string()))?
            .clone();
        if !self.executor.supports(method.method_type) {
            return Err(Error::UnsupportedMethod(method.method_type.to_string()));
        }

        // Steps 2+4: the pending record IS the reservation. Persisting it
        // under the per-mandate lock makes check-and-reserve indivisible:
        // the next caller's count_active sees this transaction.
        let mut transaction = Transaction::new(
            request.mandate_id.clone(),
            request.agent_id.clone(),
            request.principal_id.clone(),
            request.amount,
            request.currency.clone(),
            request.description.clone(),
            request.metadata.clone(),
            method.clone(),
            VerificationSnapshot::all_verified(),
        );
        transaction.record(AuditEntry::new(
            "transaction_initiated",
            ActorRole::Agent,
            &request.agent_id,
            format!(
                "{} {} for {} via {} (consent {})",
                request.amount,
                request.currency,
                request.scope,
                method.method_type,
                request.consent.consent_id
            ),
        ));
        self.transactions.put(&transaction).await?;
        drop(reservation);

        // Step 5: settle outside the lock.
        let outcome = self
            .executor
            .execute(&SettlementRequest {
                transaction_id: transaction.id().clone(),
                amount: transaction.amount(),
                currency: transaction.currency().to_string(),
                method,
            })
            .await?;

        // Step 6: record the result and persist the final state.
        if outcome.settled {
            transaction.mark_completed(outcome.reference.clone())?;
            transaction.record(AuditEntry::new(
                "payment_completed",
                ActorRole::PaymentProvider,
                transaction.payment_method().provider_ref.clone(),
                outcome
                    .reference
                    .map(|r| format!("settled, ref {}", r))
                    .unwrap_or_else(|| "settled".to_string()),
            ));
            self.transactions.put(&transaction).await?;
            tracing::info!(
                transaction_id = %transaction.id(),
                mandate_id = %transaction.mandate_id(),
                amount = %transaction.amount(),
                "payment completed"
            );
            Ok(PaymentOutcome::Completed(transaction))
        } else {
            let detail = outcome
                .message
                .unwrap_or_else(|| "settlement declined".to_string());
            transaction.mark_failed()?;
            transaction.record(AuditEntry::new(
                "payment_failed",
                ActorRole::System,
                "procura",
                detail.clone(),
            ));
            self.transactions.put(&transaction).await?;
            tracing::warn!(
                transaction_id = %transaction.id(),
                mandate_id = %transaction.mandate_id(),
                detail = %detail,
                "payment failed"
            );
            Ok(PaymentOutcome::Declined(transaction))
        }
    }

    /// Refund a completed transaction.
    ///
    /// Only legal from `completed`; `pending`, `failed`, and already
    /// refunded transactions are `InvalidState` and left unchanged.
    pub async fn refund(
        &self,
        transaction_id: &TransactionId,
        reason: impl Into<String>,
    ) -> Result<Transaction> {
        let reason = reason.into();
        let Some(mut transaction) = self.transactions.get(transaction_id).await? else {
            return Err(Error::TransactionNotFound(transaction_id.to_string()));
        };

        transaction.mark_refunded()?;
        transaction.record(AuditEntry::new(
            "payment_refunded",
            ActorRole::User,
            transaction.principal_id().to_string(),
            reason.clone(),
        ));
        self.transactions.put(&transaction).await?;
        tracing::info!(
            transaction_id = %transaction_id,
            reason = %reason,
            "payment refunded"
        );
        Ok(transaction)
    }

    /// Transactions for a principal, newest first.
    pub async fn history(
        &self,
        principal_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        self.transactions
            .list_for_principal(principal_id, limit, offset)
            .await
    }

    /// Aggregate spend figures for a principal.
    pub async fn stats(&self, principal_id: &str) -> Result<PrincipalStats> {
        let transactions = self
            .transactions
            .list_for_principal(principal_id, usize::MAX, 0)
            .await?;
        let active_mandates = self.service.list_active(principal_id).await?.len();

        let total_completed: Amount = transactions
            .iter()
            .filter(|t| t.status() == crate::transaction::TransactionStatus::Completed)
            .map(|t| t.amount())
            .sum();

        Ok(PrincipalStats {
            transaction_count: transactions.len(),
            total_completed,
            active_mandates,
            last_transaction_at: transactions.first().map(|t| t.created_at()),
        })
    }

    /// Repair transactions stuck in `pending` longer than `older_than`.
    ///
    /// A caller that crashed between settlement and persistence leaves a
    /// pending record whose true outcome only the backend knows. This sweep
    /// asks each backend for its authoritative answer and completes or fails
    /// the transaction accordingly. A backend with no record of the id
    /// cannot be repaired locally and is surfaced for operators.
    ///
    /// Returns the repaired transactions.
    pub async fn reconcile_pending(&self, older_than: Duration) -> Result<Vec<Transaction>> {
        let cutoff = Utc::now() - older_than;
        let stale = self.transactions.list_pending_before(cutoff).await?;
        let mut repaired = Vec::new();

        for mut transaction in stale {
            let method_type = transaction.payment_method().method_type;
            let outcome = match self.executor.lookup(method_type, transaction.id()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        transaction_id = %transaction.id(),
                        error = %e,
                        "reconciliation cannot reach settlement backend"
                    );
                    continue;
                }
            };

            match outcome {
                Some(outcome) if outcome.settled => {
                    transaction.mark_completed(outcome.reference)?;
                    transaction.record(AuditEntry::new(
                        "payment_completed",
                        ActorRole::System,
                        "procura-reconciler",
                        "recovered from settlement backend",
                    ));
                }
                Some(outcome) => {
                    transaction.mark_failed()?;
                    transaction.record(AuditEntry::new(
                        "payment_failed",
                        ActorRole::System,
                        "procura-reconciler",
                        outcome
                            .message
                            .unwrap_or_else(|| "declined (recovered)".to_string()),
                    ));
                }
                None => {
                    // Backend never saw the idempotency token: the settle
                    // call itself was lost. Needs an operator decision.
                    tracing::error!(
                        transaction_id = %transaction.id(),
                        mandate_id = %transaction.mandate_id(),
                        "pending transaction unknown to settlement backend"
                    );
                    continue;
                }
            }

            self.transactions.put(&transaction).await?;
            crate::audit::record_event(
                transaction.id().as_str(),
                &AuditEntry::new(
                    "transaction_reconciled",
                    ActorRole::System,
                    "procura-reconciler",
                    format!("resolved to {}", transaction.status()),
                ),
            );
            repaired.push(transaction);
        }

        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mandate::{ConsentRecord, Mandate, PaymentMethod, PaymentMethodType};
    use crate::settlement::{SettlementBackend, SettlementOutcome};
    use crate::store::{MemoryMandateStore, MemoryTransactionStore};
    use crate::transaction::TransactionStatus;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex as AsyncMutex;

    /// Backend that only answers lookups, from a fixed table.
    #[derive(Debug, Default)]
    struct LookupOnlyBackend {
        outcomes: AsyncMutex<HashMap<String, SettlementOutcome>>,
    }

    impl LookupOnlyBackend {
        async fn insert(&self, id: &TransactionId, outcome: SettlementOutcome) {
            self.outcomes
                .lock()
                .await
                .insert(id.as_str().to_string(), outcome);
        }
    }

    #[async_trait]
    impl SettlementBackend for LookupOnlyBackend {
        async fn settle(
            &self,
            _request: &SettlementRequest,
        ) -> crate::error::Result<SettlementOutcome> {
            Err(Error::ExecutionFailure("settle not expected here".into()))
        }

        async fn lookup(
            &self,
            transaction_id: &TransactionId,
        ) -> crate::error::Result<Option<SettlementOutcome>> {
            Ok(self
                .outcomes
                .lock()
                .await
                .get(transaction_id.as_str())
                .cloned())
        }
    }

    fn test_mandate() -> Mandate {
        Mandate::builder()
            .principal("u1")
            .agent("a1")
            .max_amount(Amount::from_minor(500_00))
            .scope("flight-booking")
            .valid_for(Duration::hours(24))
            .payment_method(PaymentMethod::new(PaymentMethodType::Card, "pm", "Visa", 0))
            .consent(ConsentRecord::new("c1"))
            .build()
            .unwrap()
    }

    fn pending_transaction(mandate: &Mandate) -> Transaction {
        Transaction::new(
            mandate.id().clone(),
            mandate.agent_id(),
            mandate.principal_id(),
            Amount::from_minor(350_00),
            "USD",
            "interrupted spend",
            BTreeMap::new(),
            mandate.payment_methods()[0].clone(),
            VerificationSnapshot::all_verified(),
        )
    }

    fn harness(
        backend: Arc<LookupOnlyBackend>,
    ) -> (TransactionLedger, Arc<MemoryTransactionStore>) {
        let mandates = Arc::new(MemoryMandateStore::new());
        let transactions = Arc::new(MemoryTransactionStore::new());
        let service = Arc::new(MandateService::new(mandates, transactions.clone()));
        let executor =
            PaymentExecutor::new().with_backend(PaymentMethodType::Card, backend);
        let ledger = TransactionLedger::new(service, transactions.clone(), Arc::new(executor));
        (ledger, transactions)
    }

    #[tokio::test]
    async fn test_reconcile_completes_settled_pending() {
        let backend = Arc::new(LookupOnlyBackend::default());
        let (ledger, transactions) = harness(backend.clone());

        let mandate = test_mandate();
        let stuck = pending_transaction(&mandate);
        backend
            .insert(stuck.id(), SettlementOutcome::settled("ch_recovered"))
            .await;
        transactions.put(&stuck).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let repaired = ledger
            .reconcile_pending(Duration::milliseconds(1))
            .await
            .unwrap();

        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].status(), TransactionStatus::Completed);
        assert_eq!(repaired[0].settlement_ref(), Some("ch_recovered"));

        let stored = transactions.get(stuck.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Completed);
        assert_eq!(
            stored.audit_trail().last().unwrap().action,
            "payment_completed"
        );
    }

    #[tokio::test]
    async fn test_reconcile_fails_declined_pending() {
        let backend = Arc::new(LookupOnlyBackend::default());
        let (ledger, transactions) = harness(backend.clone());

        let mandate = test_mandate();
        let stuck = pending_transaction(&mandate);
        backend
            .insert(stuck.id(), SettlementOutcome::declined("card expired"))
            .await;
        transactions.put(&stuck).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let repaired = ledger
            .reconcile_pending(Duration::milliseconds(1))
            .await
            .unwrap();

        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].status(), TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_reconcile_leaves_unknown_pending_for_operators() {
        // The backend never saw the idempotency token: nothing to repair
        // locally, the record stays pending.
        let backend = Arc::new(LookupOnlyBackend::default());
        let (ledger, transactions) = harness(backend);

        let mandate = test_mandate();
        let stuck = pending_transaction(&mandate);
        transactions.put(&stuck).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let repaired = ledger
            .reconcile_pending(Duration::milliseconds(1))
            .await
            .unwrap();

        assert!(repaired.is_empty());
        let stored = transactions.get(stuck.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_reconcile_ignores_fresh_pending() {
        let backend = Arc::new(LookupOnlyBackend::default());
        let (ledger, transactions) = harness(backend.clone());

        let mandate = test_mandate();
        let fresh = pending_transaction(&mandate);
        backend
            .insert(fresh.id(), SettlementOutcome::settled("ch_x"))
            .await;
        transactions.put(&fresh).await.unwrap();

        // A transaction younger than the cutoff may still be mid-flight.
        let repaired = ledger.reconcile_pending(Duration::hours(1)).await.unwrap();
        assert!(repaired.is_empty());
    }
}
