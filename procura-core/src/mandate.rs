//! Mandate type - the core primitive of Procura.
//!
//! A mandate is a bounded, signed grant of spending authority containing:
//! - The parties (principal and agent)
//! - Authorization bounds (amount ceiling, scopes, validity window,
//!   optional transaction-count limit)
//! - An ordered list of payment methods
//! - A consent record establishing when/how the principal agreed
//! - A proof (signature + embedded public key) sealing all of the above
//!
//! Once created, the signed content is immutable - the signature is computed
//! once and never recomputed. Only lifecycle status and its timestamps
//! mutate, and a mandate is never physically deleted.

use crate::amount::Amount;
use crate::audit::{ActorRole, AuditEntry};
use crate::crypto::{PublicKey, Signature, SigningKey, SIGNATURE_ALGORITHM};
use crate::error::{Error, Result};
use crate::PROTOCOL_VERSION;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// The required prefix for all mandate IDs.
pub const MANDATE_ID_PREFIX: &str = "prc_mnd_";

/// A unique identifier for a mandate.
///
/// Uses UUIDv7 (time-ordered), so ids sort chronologically in stores and
/// audit exports. IDs must start with `prc_mnd_`; this is enforced during
/// both construction and deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MandateId(String);

impl<'de> Deserialize<'de> for MandateId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if !s.starts_with(MANDATE_ID_PREFIX) {
            return Err(serde::de::Error::custom(format!(
                "mandate ID must start with '{}', got: {}",
                MANDATE_ID_PREFIX,
                if s.len() > 20 { &s[..20] } else { &s }
            )));
        }
        Ok(MandateId(s))
    }
}

impl MandateId {
    /// Generate a new time-ordered mandate ID.
    pub fn new() -> Self {
        Self(format!("{}{}", MANDATE_ID_PREFIX, Uuid::now_v7().simple()))
    }

    /// Create a mandate ID from a string.
    ///
    /// Returns `InvalidMandateId` if the string doesn't start with `prc_mnd_`.
    pub fn from_string(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !s.starts_with(MANDATE_ID_PREFIX) {
            return Err(Error::InvalidMandateId(format!(
                "mandate ID must start with '{}', got: {}",
                MANDATE_ID_PREFIX,
                if s.len() > 20 { &s[..20] } else { &s }
            )));
        }
        Ok(Self(s))
    }

    /// Get the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MandateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MandateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a mandate.
///
/// `Active -> {Revoked | Expired}` and `Active <-> Suspended`;
/// `Revoked` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    Active,
    Revoked,
    Expired,
    Suspended,
}

impl MandateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::Suspended => "suspended",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Revoked | Self::Expired)
    }
}

impl std::fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MandateStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            "suspended" => Ok(Self::Suspended),
            other => Err(format!("unknown mandate status: {}", other)),
        }
    }
}

/// Settlement rail for a payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    BankTransfer,
    Wallet,
    Crypto,
    Other,
}

impl PaymentMethodType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Wallet => "wallet",
            Self::Crypto => "crypto",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An abstract payment method a mandate may settle through.
///
/// Carries only an opaque provider reference and non-sensitive display
/// details - card numbers and bank credentials live with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub method_type: PaymentMethodType,
    /// Opaque token identifying the instrument at the provider.
    pub provider_ref: String,
    /// Non-sensitive display string, e.g. "Visa ending 4242".
    pub display: String,
    /// Selection priority; lower is preferred.
    pub priority: u8,
}

impl PaymentMethod {
    pub fn new(
        method_type: PaymentMethodType,
        provider_ref: impl Into<String>,
        display: impl Into<String>,
        priority: u8,
    ) -> Self {
        Self {
            method_type,
            provider_ref: provider_ref.into(),
            display: display.into(),
            priority,
        }
    }
}

/// When and how the principal agreed to this mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub consent_id: String,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl ConsentRecord {
    /// A consent record captured now, with no origin context.
    pub fn new(consent_id: impl Into<String>) -> Self {
        Self {
            consent_id: consent_id.into(),
            captured_at: Utc::now(),
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_origin(
        mut self,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// The bounds a mandate places on spending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingAuthorization {
    /// Per-transaction amount ceiling.
    pub max_amount: Amount,
    /// ISO currency code, passed through to settlement.
    pub currency: String,
    /// Permitted spend categories, e.g. "flight-booking".
    pub scopes: Vec<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Maximum number of pending+completed transactions, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_limit: Option<u32>,
}

/// The signed content of a mandate.
///
/// Everything in here is covered by the proof signature; nothing in here
/// may change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandatePayload {
    /// Payload schema version.
    pub version: u8,
    pub id: MandateId,
    pub principal_id: String,
    pub agent_id: String,
    pub authorization: SpendingAuthorization,
    /// Ordered by `priority`; validated non-empty at creation.
    pub payment_methods: Vec<PaymentMethod>,
    pub consent: ConsentRecord,
}

impl MandatePayload {
    /// Canonical bytes for signing and verification.
    ///
    /// CBOR with struct-ordered fields; no maps, so re-serialization is
    /// deterministic and verification can recompute these bytes from the
    /// content fields alone.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)?;
        Ok(buf)
    }
}

/// The cryptographic seal over a mandate's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandateProof {
    /// Signature algorithm identifier ("ed25519").
    pub algorithm: String,
    /// Verification key, embedded so any holder can verify.
    pub public_key: PublicKey,
    pub signature: Signature,
    pub signed_at: DateTime<Utc>,
}

/// A signed mandate - the complete grant of spending authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    payload: MandatePayload,
    proof: MandateProof,

    // Lifecycle state; outside the signature, mutated only through the
    // transition methods below.
    status: MandateStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoke_reason: Option<String>,
}

impl Mandate {
    /// Create a new mandate builder.
    pub fn builder() -> MandateBuilder {
        MandateBuilder::new()
    }

    pub fn id(&self) -> &MandateId {
        &self.payload.id
    }

    pub fn principal_id(&self) -> &str {
        &self.payload.principal_id
    }

    pub fn agent_id(&self) -> &str {
        &self.payload.agent_id
    }

    pub fn authorization(&self) -> &SpendingAuthorization {
        &self.payload.authorization
    }

    pub fn payment_methods(&self) -> &[PaymentMethod] {
        &self.payload.payment_methods
    }

    pub fn consent(&self) -> &ConsentRecord {
        &self.payload.consent
    }

    pub fn proof(&self) -> &MandateProof {
        &self.proof
    }

    /// Payload schema version this mandate was signed under.
    pub fn payload_version(&self) -> u8 {
        self.payload.version
    }

    pub fn status(&self) -> MandateStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn revoke_reason(&self) -> Option<&str> {
        self.revoke_reason.as_deref()
    }

    /// The preferred payment method (lowest priority value).
    ///
    /// `None` only for a mandate deserialized from a hand-built payload;
    /// the builder rejects empty method lists.
    pub fn preferred_method(&self) -> Option<&PaymentMethod> {
        self.payload
            .payment_methods
            .iter()
            .min_by_key(|m| m.priority)
    }

    /// Whether `now` falls past the validity window.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.payload.authorization.valid_until
    }

    /// Whether `now` falls before the validity window opens.
    pub fn is_not_yet_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.payload.authorization.valid_from
    }

    /// Verify the proof against the mandate's content.
    ///
    /// Recomputes canonical bytes from the payload fields (excluding the
    /// proof itself) and checks them against the embedded public key and
    /// stored signature. Never panics; any malformed input is `false`.
    pub fn verify_signature(&self) -> bool {
        match self.payload.canonical_bytes() {
            Ok(bytes) => self
                .proof
                .public_key
                .verify(&bytes, &self.proof.signature)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Transition to `Revoked`.
    ///
    /// Idempotent: revoking an already-revoked or expired mandate is a
    /// no-op, not an error.
    pub fn revoke(&mut self, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = MandateStatus::Revoked;
        let now = Utc::now();
        self.updated_at = now;
        self.revoked_at = Some(now);
        self.revoke_reason = Some(reason.into());
    }

    /// Transition to `Expired`. No-op unless currently active or suspended.
    pub fn mark_expired(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = MandateStatus::Expired;
        self.updated_at = Utc::now();
    }

    /// Transition `Active -> Suspended`.
    pub fn suspend(&mut self) -> Result<()> {
        match self.status {
            MandateStatus::Suspended => Ok(()),
            MandateStatus::Active => {
                self.status = MandateStatus::Suspended;
                self.updated_at = Utc::now();
                Ok(())
            }
            status => Err(Error::InvalidState(format!(
                "cannot suspend mandate in status {}",
                status
            ))),
        }
    }

    /// Transition `Suspended -> Active`.
    pub fn reinstate(&mut self) -> Result<()> {
        match self.status {
            MandateStatus::Active => Ok(()),
            MandateStatus::Suspended => {
                self.status = MandateStatus::Active;
                self.updated_at = Utc::now();
                Ok(())
            }
            status => Err(Error::InvalidState(format!(
                "cannot reinstate mandate in status {}",
                status
            ))),
        }
    }
}

/// Builder for creating mandates.
///
/// `build()` validates the bounds, generates a fresh keypair, signs the
/// canonical content, and drops the private key. The returned mandate can
/// never be re-signed; any change requires a new mandate.
#[derive(Debug, Default)]
pub struct MandateBuilder {
    principal_id: Option<String>,
    agent_id: Option<String>,
    max_amount: Option<Amount>,
    currency: Option<String>,
    scopes: Vec<String>,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    ttl: Option<Duration>,
    transaction_limit: Option<u32>,
    payment_methods: Vec<PaymentMethod>,
    consent: Option<ConsentRecord>,
}

impl MandateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn max_amount(mut self, max_amount: Amount) -> Self {
        self.max_amount = Some(max_amount);
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Add a permitted scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes.extend(scopes);
        self
    }

    /// Set the validity window as a duration from now.
    pub fn valid_for(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set an explicit validity window.
    pub fn valid_window(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.valid_from = Some(from);
        self.valid_until = Some(until);
        self
    }

    pub fn transaction_limit(mut self, limit: u32) -> Self {
        self.transaction_limit = Some(limit);
        self
    }

    /// Add a payment method.
    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_methods.push(method);
        self
    }

    pub fn payment_methods(mut self, methods: impl IntoIterator<Item = PaymentMethod>) -> Self {
        self.payment_methods.extend(methods);
        self
    }

    pub fn consent(mut self, consent: ConsentRecord) -> Self {
        self.consent = Some(consent);
        self
    }

    /// Validate, sign, and seal the mandate.
    pub fn build(self) -> Result<Mandate> {
        let principal_id = self
            .principal_id
            .ok_or_else(|| Error::MissingField("principal_id".to_string()))?;
        let agent_id = self
            .agent_id
            .ok_or_else(|| Error::MissingField("agent_id".to_string()))?;
        let max_amount = self
            .max_amount
            .ok_or_else(|| Error::MissingField("max_amount".to_string()))?;
        let consent = self
            .consent
            .ok_or_else(|| Error::MissingField("consent".to_string()))?;

        let now = Utc::now();
        let (valid_from, valid_until) = match (self.valid_from, self.valid_until, self.ttl) {
            (Some(from), Some(until), _) => (from, until),
            (None, None, Some(ttl)) => (now, now + ttl),
            _ => return Err(Error::MissingField("validity window".to_string())),
        };

        if valid_until <= valid_from {
            return Err(Error::Validation(
                "valid_until must be after valid_from".to_string(),
            ));
        }
        if self.scopes.is_empty() {
            return Err(Error::Validation(
                "mandate requires at least one scope".to_string(),
            ));
        }
        if self.payment_methods.is_empty() {
            return Err(Error::Validation(
                "mandate requires at least one payment method".to_string(),
            ));
        }
        if let Some(0) = self.transaction_limit {
            return Err(Error::Validation(
                "transaction_limit must be at least 1".to_string(),
            ));
        }

        let mut payment_methods = self.payment_methods;
        payment_methods.sort_by_key(|m| m.priority);

        let payload = MandatePayload {
            version: PROTOCOL_VERSION,
            id: MandateId::new(),
            principal_id,
            agent_id,
            authorization: SpendingAuthorization {
                max_amount,
                currency: self.currency.unwrap_or_else(|| "USD".to_string()),
                scopes: self.scopes,
                valid_from,
                valid_until,
                transaction_limit: self.transaction_limit,
            },
            payment_methods,
            consent,
        };

        // Single-use key: sign once, drop the private half.
        let signing_key = SigningKey::generate();
        let canonical = payload.canonical_bytes()?;
        let signature = signing_key.sign(&canonical);
        let proof = MandateProof {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key: signing_key.public_key(),
            signature,
            signed_at: now,
        };

        let mandate = Mandate {
            payload,
            proof,
            status: MandateStatus::Active,
            created_at: now,
            updated_at: now,
            revoked_at: None,
            revoke_reason: None,
        };

        crate::audit::record_event(
            mandate.id().as_str(),
            &AuditEntry::new(
                "mandate_created",
                ActorRole::User,
                mandate.principal_id(),
                format!(
                    "max {} {}, scopes {:?}, key {}",
                    mandate.authorization().max_amount,
                    mandate.authorization().currency,
                    mandate.authorization().scopes,
                    mandate.proof().public_key.fingerprint(),
                ),
            ),
        );

        Ok(mandate)
    }
}
