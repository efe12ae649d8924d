//! # Procura Core
//!
//! Agent payment authorization - Rust core library.
//!
//! Procura lets a software agent spend money on behalf of a human principal
//! only within bounds the principal has cryptographically pre-approved.
//! The principal signs off on a **Mandate** - a bounded grant of spending
//! authority - and every spend is checked against that mandate before any
//! money moves.
//!
//! ## Key Concepts
//!
//! - **Mandate**: a signed grant containing an amount ceiling, permitted
//!   scopes, a validity window, an optional transaction-count limit, and an
//!   ordered list of payment methods
//! - **Transaction**: one attempted spend against a mandate, with its own
//!   append-only audit trail
//! - **Settlement backend**: the external payment network (card, bank,
//!   wallet, crypto) that actually moves money, behind one trait
//!
//! ## Example
//!
//! ```rust,ignore
//! use procura::{Amount, MandateService, TransactionLedger};
//!
//! let mandate = service
//!     .create_mandate(CreateMandateRequest {
//!         principal_id: "u1".into(),
//!         agent_id: "a1".into(),
//!         max_amount: Amount::from_minor(500_00),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let outcome = ledger
//!     .process_payment(ProcessPaymentRequest {
//!         mandate_id: mandate.id().clone(),
//!         amount: Amount::from_minor(350_00),
//!         scope: "flight-booking".into(),
//!         ..request
//!     })
//!     .await?;
//! ```
//!
//! ## Trust model
//!
//! The signing key for a mandate is generated at creation, used once, and
//! discarded. The embedded public key therefore proves the mandate content
//! has not been altered since issuance (server-side integrity), not that the
//! principal's own device signed it. Principal-held signing keys are a
//! planned extension of the same proof shape.

pub mod amount;
pub mod audit;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod mandate;
pub mod request;
pub mod service;
pub mod settlement;
pub mod store;
pub mod transaction;
pub mod wire;

// Re-exports for convenience
pub use amount::Amount;
pub use audit::{ActorRole, AuditEntry, AuditSink, NoOpSink, StdoutSink};
pub use crypto::{PublicKey, Signature, SigningKey};
pub use error::{DenialReason, Error, Result};
pub use ledger::{PaymentOutcome, PrincipalStats, TransactionLedger};
pub use mandate::{
    ConsentRecord, Mandate, MandateBuilder, MandateId, MandateStatus, PaymentMethod,
    PaymentMethodType, SpendingAuthorization, MANDATE_ID_PREFIX,
};
pub use request::{
    CreateMandateRequest, ProcessPaymentRequest, RefundRequest, RevokeMandateRequest,
};
pub use service::{Authorization, MandateService};
pub use settlement::{PaymentExecutor, SettlementBackend, SettlementOutcome, SettlementRequest};
pub use store::{MandateStore, MemoryMandateStore, MemoryTransactionStore, TransactionStore};
pub use transaction::{
    Transaction, TransactionId, TransactionStatus, VerificationSnapshot, TRANSACTION_ID_PREFIX,
};
pub use wire::MAX_MANDATE_SIZE;

/// Context string for Ed25519 signatures (prevents cross-protocol attacks).
///
/// All signatures are computed over: `SIGNATURE_CONTEXT || payload`
///
/// This prevents a signature from one protocol being valid in another.
pub const SIGNATURE_CONTEXT: &[u8] = b"procura-mandate-v1";

/// Current mandate payload version.
pub const PROTOCOL_VERSION: u8 = 1;
