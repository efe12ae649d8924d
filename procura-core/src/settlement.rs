//! Payment-agnostic settlement dispatch.
//!
//! Procura never talks to a card processor, bank rail, wallet, or crypto
//! network directly. Each of those is a [`SettlementBackend`] implementation
//! registered with the [`PaymentExecutor`] under its method type; the
//! executor dispatches by the payment method's type tag and reports a
//! structured outcome.
//!
//! Backends are expected to be idempotent for a given transaction id - the
//! id is passed as the idempotency token, so a retried settle for the same
//! transaction must not move money twice.

use crate::amount::Amount;
use crate::error::{Error, Result};
use crate::mandate::{PaymentMethod, PaymentMethodType};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a backend needs to move money for one transaction.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    /// Doubles as the idempotency token.
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub currency: String,
    pub method: PaymentMethod,
}

/// What a settlement attempt concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    /// Whether money moved.
    pub settled: bool,
    /// Backend-side reference (charge id, transfer id, tx hash).
    pub reference: Option<String>,
    /// Decline or error detail, for the audit trail.
    pub message: Option<String>,
}

impl SettlementOutcome {
    pub fn settled(reference: impl Into<String>) -> Self {
        Self {
            settled: true,
            reference: Some(reference.into()),
            message: None,
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            settled: false,
            reference: None,
            message: Some(message.into()),
        }
    }
}

/// One external settlement network (card / bank transfer / wallet / crypto).
#[async_trait]
pub trait SettlementBackend: Send + Sync + std::fmt::Debug {
    /// Attempt to move money. A decline is a successful call with
    /// `settled: false`; `Err` means the backend itself failed.
    async fn settle(&self, request: &SettlementRequest) -> Result<SettlementOutcome>;

    /// The backend's authoritative record for a transaction id, if any.
    ///
    /// Used by reconciliation to repair transactions whose final state was
    /// lost between settlement and persistence.
    async fn lookup(&self, transaction_id: &TransactionId) -> Result<Option<SettlementOutcome>>;
}

/// Dispatch table from payment method type to settlement backend.
#[derive(Debug, Default)]
pub struct PaymentExecutor {
    backends: HashMap<PaymentMethodType, Arc<dyn SettlementBackend>>,
}

impl PaymentExecutor {
    /// An executor with no backends. Every method type is unsupported until
    /// registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend for a method type, replacing any previous one.
    pub fn register(
        &mut self,
        method_type: PaymentMethodType,
        backend: Arc<dyn SettlementBackend>,
    ) {
        self.backends.insert(method_type, backend);
    }

    /// Builder-style registration.
    pub fn with_backend(
        mut self,
        method_type: PaymentMethodType,
        backend: Arc<dyn SettlementBackend>,
    ) -> Self {
        self.register(method_type, backend);
        self
    }

    /// Whether a backend is registered for this method type.
    pub fn supports(&self, method_type: PaymentMethodType) -> bool {
        self.backends.contains_key(&method_type)
    }

    /// Execute a settlement through the matching backend.
    ///
    /// An unregistered method type is `Error::UnsupportedMethod`. A backend
    /// error is folded into a declined outcome - settlement failures are
    /// reported, never thrown past this point.
    pub async fn execute(&self, request: &SettlementRequest) -> Result<SettlementOutcome> {
        let backend = self
            .backends
            .get(&request.method.method_type)
            .ok_or_else(|| Error::UnsupportedMethod(request.method.method_type.to_string()))?;

        match backend.settle(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(
                    transaction_id = %request.transaction_id,
                    method = %request.method.method_type,
                    error = %e,
                    "settlement backend errored"
                );
                Ok(SettlementOutcome::declined(e.to_string()))
            }
        }
    }

    /// Query the backend's authoritative outcome for a transaction.
    pub async fn lookup(
        &self,
        method_type: PaymentMethodType,
        transaction_id: &TransactionId,
    ) -> Result<Option<SettlementOutcome>> {
        let backend = self
            .backends
            .get(&method_type)
            .ok_or_else(|| Error::UnsupportedMethod(method_type.to_string()))?;
        backend.lookup(transaction_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedBackend(SettlementOutcome);

    #[async_trait]
    impl SettlementBackend for FixedBackend {
        async fn settle(&self, _request: &SettlementRequest) -> Result<SettlementOutcome> {
            Ok(self.0.clone())
        }

        async fn lookup(
            &self,
            _transaction_id: &TransactionId,
        ) -> Result<Option<SettlementOutcome>> {
            Ok(Some(self.0.clone()))
        }
    }

    #[derive(Debug)]
    struct BrokenBackend;

    #[async_trait]
    impl SettlementBackend for BrokenBackend {
        async fn settle(&self, _request: &SettlementRequest) -> Result<SettlementOutcome> {
            Err(Error::ExecutionFailure("connection reset".to_string()))
        }

        async fn lookup(
            &self,
            _transaction_id: &TransactionId,
        ) -> Result<Option<SettlementOutcome>> {
            Ok(None)
        }
    }

    fn card_request() -> SettlementRequest {
        SettlementRequest {
            transaction_id: TransactionId::new(),
            amount: Amount::from_minor(350_00),
            currency: "USD".to_string(),
            method: PaymentMethod::new(PaymentMethodType::Card, "pm_tok", "Visa", 0),
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_method_type() {
        let executor = PaymentExecutor::new().with_backend(
            PaymentMethodType::Card,
            Arc::new(FixedBackend(SettlementOutcome::settled("ch_1"))),
        );

        let outcome = executor.execute(&card_request()).await.unwrap();
        assert!(outcome.settled);
        assert_eq!(outcome.reference.as_deref(), Some("ch_1"));
    }

    #[tokio::test]
    async fn test_unknown_method_type_is_error_not_panic() {
        let executor = PaymentExecutor::new();
        assert!(!executor.supports(PaymentMethodType::Crypto));

        let result = executor.execute(&card_request()).await;
        assert!(matches!(result, Err(Error::UnsupportedMethod(_))));
    }

    #[tokio::test]
    async fn test_backend_error_folds_to_decline() {
        let executor =
            PaymentExecutor::new().with_backend(PaymentMethodType::Card, Arc::new(BrokenBackend));

        let outcome = executor.execute(&card_request()).await.unwrap();
        assert!(!outcome.settled);
        assert!(outcome.message.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_decline_passes_through() {
        let executor = PaymentExecutor::new().with_backend(
            PaymentMethodType::Card,
            Arc::new(FixedBackend(SettlementOutcome::declined(
                "insufficient funds",
            ))),
        );

        let outcome = executor.execute(&card_request()).await.unwrap();
        assert!(!outcome.settled);
        assert_eq!(outcome.message.as_deref(), Some("insufficient funds"));
    }
}
