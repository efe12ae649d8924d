//! External request shapes.
//!
//! These are the structures the booking/checkout flow and administrative
//! surface send in. Serde defaults fill the optional fields; `validate()`
//! runs before any side effect, so a malformed request never creates state.

use crate::amount::Amount;
use crate::error::{Error, Result};
use crate::mandate::{ConsentRecord, MandateId, PaymentMethod};
use crate::transaction::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounds for the mandate validity window, in hours.
pub const MIN_DURATION_HOURS: u32 = 1;
/// One week.
pub const MAX_DURATION_HOURS: u32 = 168;

const DEFAULT_DURATION_HOURS: u32 = 24;
const DEFAULT_SCOPE: &str = "flight-booking";

fn default_currency() -> String {
    "USD".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![DEFAULT_SCOPE.to_string()]
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_duration_hours() -> u32 {
    DEFAULT_DURATION_HOURS
}

/// Request to create a mandate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMandateRequest {
    pub principal_id: String,
    pub agent_id: String,
    pub max_amount: Amount,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Validity window from now, 1..=168 hours.
    #[serde(default = "default_duration_hours")]
    pub duration_hours: u32,
    #[serde(default)]
    pub transaction_limit: Option<u32>,
    pub payment_methods: Vec<PaymentMethod>,
    pub consent: ConsentRecord,
}

impl CreateMandateRequest {
    pub fn validate(&self) -> Result<()> {
        if self.principal_id.is_empty() {
            return Err(Error::Validation("principal_id must not be empty".into()));
        }
        if self.agent_id.is_empty() {
            return Err(Error::Validation("agent_id must not be empty".into()));
        }
        if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&self.duration_hours) {
            return Err(Error::Validation(format!(
                "duration_hours must be within {}..={}, got {}",
                MIN_DURATION_HOURS, MAX_DURATION_HOURS, self.duration_hours
            )));
        }
        if self.scopes.is_empty() {
            return Err(Error::Validation("scopes must not be empty".into()));
        }
        if self.payment_methods.is_empty() {
            return Err(Error::Validation("payment_methods must not be empty".into()));
        }
        Ok(())
    }
}

/// Request to spend against a mandate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentRequest {
    pub mandate_id: MandateId,
    pub agent_id: String,
    pub principal_id: String,
    pub amount: Amount,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Human-readable purpose, e.g. "LAX-JFK one way, AA123".
    pub description: String,
    /// Spend category checked against the mandate's scopes.
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Free-form context, e.g. a booking reference.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Consent context captured at checkout.
    pub consent: ConsentRecord,
}

impl ProcessPaymentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(Error::Validation("agent_id must not be empty".into()));
        }
        if self.principal_id.is_empty() {
            return Err(Error::Validation("principal_id must not be empty".into()));
        }
        if self.description.is_empty() {
            return Err(Error::Validation("description must not be empty".into()));
        }
        if self.scope.is_empty() {
            return Err(Error::Validation("scope must not be empty".into()));
        }
        Ok(())
    }
}

fn default_revoke_reason() -> String {
    "user_revoked".to_string()
}

/// Request to revoke a mandate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeMandateRequest {
    pub mandate_id: MandateId,
    #[serde(default = "default_revoke_reason")]
    pub reason: String,
}

/// Request to refund a completed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub transaction_id: TransactionId,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mandate::PaymentMethodType;

    fn create_request() -> CreateMandateRequest {
        CreateMandateRequest {
            principal_id: "u1".into(),
            agent_id: "a1".into(),
            max_amount: Amount::from_minor(500_00),
            currency: default_currency(),
            scopes: default_scopes(),
            duration_hours: 24,
            transaction_limit: None,
            payment_methods: vec![PaymentMethod::new(
                PaymentMethodType::Card,
                "pm_tok",
                "Visa",
                0,
            )],
            consent: ConsentRecord::new("c1"),
        }
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let json = r#"{
            "principal_id": "u1",
            "agent_id": "a1",
            "max_amount": 50000,
            "payment_methods": [
                {"method_type": "card", "provider_ref": "pm_tok", "display": "Visa", "priority": 0}
            ],
            "consent": {"consent_id": "c1", "captured_at": "2026-08-01T12:00:00Z"}
        }"#;
        let request: CreateMandateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.currency, "USD");
        assert_eq!(request.scopes, vec!["flight-booking".to_string()]);
        assert_eq!(request.duration_hours, 24);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_duration_bounds() {
        let mut request = create_request();
        request.duration_hours = 0;
        assert!(request.validate().is_err());
        request.duration_hours = 169;
        assert!(request.validate().is_err());
        request.duration_hours = 168;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_methods_rejected() {
        let mut request = create_request();
        request.payment_methods.clear();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_revoke_reason_defaults() {
        let id = MandateId::new();
        let json = format!(r#"{{"mandate_id": "{}"}}"#, id);
        let request: RevokeMandateRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.reason, "user_revoked");
    }

    #[test]
    fn test_payment_request_validation() {
        let request = ProcessPaymentRequest {
            mandate_id: MandateId::new(),
            agent_id: "a1".into(),
            principal_id: "u1".into(),
            amount: Amount::from_minor(350_00),
            currency: "USD".into(),
            description: "LAX-JFK one way".into(),
            scope: default_scope(),
            metadata: BTreeMap::new(),
            consent: ConsentRecord::new("c2"),
        };
        assert!(request.validate().is_ok());

        let mut bad = request.clone();
        bad.description.clear();
        assert!(bad.validate().is_err());
    }
}
