//! Wire format for mandates.
//!
//! Agents carry mandates across service boundaries (HTTP headers, queue
//! messages), so procura ships a compact CBOR encoding plus a base64 form
//! for text transports. Decoding is fail-closed: oversized inputs are
//! rejected before deserialization is attempted, and unknown payload
//! versions are rejected after.

use crate::error::{Error, Result};
use crate::mandate::Mandate;
use crate::PROTOCOL_VERSION;
use base64::Engine;

/// Maximum allowed size for a serialized mandate in bytes (16 KB).
///
/// Typical mandates are under a kilobyte; the cap protects deserialization
/// from memory-exhaustion payloads while leaving room for long scope lists
/// and several payment methods.
pub const MAX_MANDATE_SIZE: usize = 16 * 1024;

/// Header name for carrying mandates in HTTP requests.
pub const MANDATE_HEADER: &str = "X-Procura-Mandate";

/// Encode a mandate to compact binary CBOR.
pub fn encode(mandate: &Mandate) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(mandate, &mut buf)?;
    Ok(buf)
}

/// Decode a mandate from binary CBOR.
///
/// Returns `PayloadTooLarge` if the input exceeds [`MAX_MANDATE_SIZE`].
/// Decoding does not verify the signature; callers verify before trusting
/// the content.
pub fn decode(data: &[u8]) -> Result<Mandate> {
    if data.len() > MAX_MANDATE_SIZE {
        return Err(Error::PayloadTooLarge {
            size: data.len(),
            max: MAX_MANDATE_SIZE,
        });
    }

    let mandate: Mandate = ciborium::de::from_reader(data)?;

    if mandate.proof().algorithm != crate::crypto::SIGNATURE_ALGORITHM {
        return Err(Error::DeserializationError(format!(
            "unsupported signature algorithm: {}",
            mandate.proof().algorithm
        )));
    }
    if mandate.payload_version() != PROTOCOL_VERSION {
        return Err(Error::DeserializationError(format!(
            "unsupported mandate version: {}",
            mandate.payload_version()
        )));
    }

    Ok(mandate)
}

/// Encode a mandate to a base64 string (for HTTP headers).
pub fn encode_base64(mandate: &Mandate) -> Result<String> {
    let bytes = encode(mandate)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Decode a mandate from a base64 string.
pub fn decode_base64(s: &str) -> Result<Mandate> {
    // base64 encodes 3 bytes as 4 chars; reject oversized input before
    // allocating the decoded buffer.
    let estimated_size = (s.len() * 3) / 4;
    if estimated_size > MAX_MANDATE_SIZE {
        return Err(Error::PayloadTooLarge {
            size: estimated_size,
            max: MAX_MANDATE_SIZE,
        });
    }

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| Error::DeserializationError(e.to_string()))?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::mandate::{ConsentRecord, PaymentMethod, PaymentMethodType};
    use chrono::Duration;

    fn test_mandate() -> Mandate {
        Mandate::builder()
            .principal("u1")
            .agent("a1")
            .max_amount(Amount::from_minor(500_00))
            .scope("flight-booking")
            .valid_for(Duration::hours(24))
            .payment_method(PaymentMethod::new(
                PaymentMethodType::Card,
                "pm_tok_4242",
                "Visa ending 4242",
                0,
            ))
            .consent(ConsentRecord::new("consent-1"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mandate = test_mandate();
        let bytes = encode(&mandate).unwrap();
        assert!(bytes.len() < MAX_MANDATE_SIZE);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id(), mandate.id());
        assert!(decoded.verify_signature());
    }

    #[test]
    fn test_base64_roundtrip() {
        let mandate = test_mandate();
        let s = encode_base64(&mandate).unwrap();
        let decoded = decode_base64(&s).unwrap();
        assert_eq!(decoded.id(), mandate.id());
        assert!(decoded.verify_signature());
    }

    #[test]
    fn test_oversized_input_rejected_early() {
        let big = vec![0u8; MAX_MANDATE_SIZE + 1];
        assert!(matches!(
            decode(&big),
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_garbage_is_deserialization_error() {
        assert!(matches!(
            decode(b"not cbor at all"),
            Err(Error::DeserializationError(_))
        ));
        assert!(decode_base64("!!!not-base64!!!").is_err());
    }

    #[test]
    fn test_tampered_bytes_fail_signature() {
        let mandate = test_mandate();
        let mut bytes = encode(&mandate).unwrap();
        // Flip a byte somewhere in the middle of the payload region.
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;

        // Either the CBOR no longer parses, or it parses to content that no
        // longer matches the signature. Both are rejections.
        match decode(&bytes) {
            Ok(decoded) => assert!(!decoded.verify_signature()),
            Err(_) => {}
        }
    }
}
