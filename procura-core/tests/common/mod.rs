//! Shared fixtures for integration tests: in-memory stores wired to a
//! ledger, plus fake settlement backends.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use procura::{
    Amount, ConsentRecord, CreateMandateRequest, MandateId, MandateService, MemoryMandateStore,
    MemoryTransactionStore, PaymentExecutor, PaymentMethod, PaymentMethodType,
    ProcessPaymentRequest, Result, SettlementBackend, SettlementOutcome, SettlementRequest,
    TransactionId, TransactionLedger,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Install a fmt subscriber once per test binary; `RUST_LOG` filters.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fake card network.
///
/// Settles everything unless `decline_over` is set, keeps a per-transaction
/// outcome map so repeated settles with the same id are idempotent and
/// `lookup` answers authoritatively.
#[derive(Debug, Default)]
pub struct FakeCardNetwork {
    pub decline_over: Option<Amount>,
    pub delay: Option<std::time::Duration>,
    outcomes: Mutex<HashMap<String, SettlementOutcome>>,
}

impl FakeCardNetwork {
    pub fn settling() -> Self {
        Self::default()
    }

    pub fn declining_over(limit: Amount) -> Self {
        Self {
            decline_over: Some(limit),
            ..Self::default()
        }
    }

    /// Delay each settle call, to widen race windows in concurrency tests.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SettlementBackend for FakeCardNetwork {
    async fn settle(&self, request: &SettlementRequest) -> Result<SettlementOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut outcomes = self.outcomes.lock().await;
        if let Some(prior) = outcomes.get(request.transaction_id.as_str()) {
            return Ok(prior.clone());
        }

        let outcome = match self.decline_over {
            Some(limit) if request.amount > limit => {
                SettlementOutcome::declined("insufficient funds")
            }
            _ => SettlementOutcome::settled(format!(
                "ch_{}",
                &request.transaction_id.as_str()[8..24]
            )),
        };
        outcomes.insert(request.transaction_id.as_str().to_string(), outcome.clone());
        Ok(outcome)
    }

    async fn lookup(&self, transaction_id: &TransactionId) -> Result<Option<SettlementOutcome>> {
        let outcomes = self.outcomes.lock().await;
        Ok(outcomes.get(transaction_id.as_str()).cloned())
    }
}

/// Everything wired together over in-memory stores.
pub struct Harness {
    pub service: Arc<MandateService>,
    pub ledger: Arc<TransactionLedger>,
    pub mandates: Arc<MemoryMandateStore>,
    pub transactions: Arc<MemoryTransactionStore>,
}

impl Harness {
    /// Harness with a settling card backend.
    pub fn new() -> Self {
        Self::with_executor(
            PaymentExecutor::new()
                .with_backend(PaymentMethodType::Card, Arc::new(FakeCardNetwork::settling())),
        )
    }

    pub fn with_executor(executor: PaymentExecutor) -> Self {
        let mandates = Arc::new(MemoryMandateStore::new());
        let transactions = Arc::new(MemoryTransactionStore::new());
        let mandate_store: Arc<dyn procura::MandateStore> = mandates.clone();
        let transaction_store: Arc<dyn procura::TransactionStore> = transactions.clone();
        let service = Arc::new(MandateService::new(
            mandate_store,
            transaction_store.clone(),
        ));
        let ledger = Arc::new(TransactionLedger::new(
            service.clone(),
            transaction_store,
            Arc::new(executor),
        ));
        Self {
            service,
            ledger,
            mandates,
            transactions,
        }
    }
}

pub fn card_method() -> PaymentMethod {
    PaymentMethod::new(PaymentMethodType::Card, "pm_tok_4242", "Visa ending 4242", 0)
}

pub fn create_request(max_amount: u64) -> CreateMandateRequest {
    CreateMandateRequest {
        principal_id: "u1".into(),
        agent_id: "a1".into(),
        max_amount: Amount::from_minor(max_amount),
        currency: "USD".into(),
        scopes: vec!["flight-booking".into()],
        duration_hours: 24,
        transaction_limit: None,
        payment_methods: vec![card_method()],
        consent: ConsentRecord::new("consent-1"),
    }
}

pub fn payment_request(mandate_id: &MandateId, amount: u64) -> ProcessPaymentRequest {
    ProcessPaymentRequest {
        mandate_id: mandate_id.clone(),
        agent_id: "a1".into(),
        principal_id: "u1".into(),
        amount: Amount::from_minor(amount),
        currency: "USD".into(),
        description: "LAX-JFK one way, AA123".into(),
        scope: "flight-booking".into(),
        metadata: BTreeMap::from([("booking_ref".to_string(), "BK-7731".to_string())]),
        consent: ConsentRecord::new("consent-2"),
    }
}
