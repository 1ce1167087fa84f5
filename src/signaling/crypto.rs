//! Ed25519 key helpers for the public-key registry.
//!
//! The broker never verifies signatures. Keys are checked for shape only
//! (standard base64 decoding to 32 raw bytes) and relayed opaquely.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;

use super::error::{Result, SignalingError};

/// Check that `public_key` is standard base64 decoding to exactly 32 bytes.
pub fn validate_public_key(public_key: &str) -> Result<()> {
    let bytes = STANDARD.decode(public_key).map_err(|e| {
        SignalingError::InvalidPublicKey(format!("invalid base64 encoding: {e}"))
    })?;

    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(SignalingError::InvalidPublicKey(format!(
            "invalid public key size: got {}, expected {}",
            bytes.len(),
            PUBLIC_KEY_LENGTH
        )));
    }

    Ok(())
}

/// Generate a fresh Ed25519 keypair as (public, private) base64 strings.
pub fn generate_keypair() -> (String, String) {
    let signing = SigningKey::generate(&mut OsRng);
    let public = STANDARD.encode(signing.verifying_key().to_bytes());
    let private = STANDARD.encode(signing.to_bytes());
    (public, private)
}

/// Parse a base64 public key into a typed verifying key.
pub fn parse_public_key(public_key: &str) -> Result<VerifyingKey> {
    let bytes = STANDARD.decode(public_key).map_err(|e| {
        SignalingError::InvalidPublicKey(format!("invalid base64 encoding: {e}"))
    })?;

    let arr: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        SignalingError::InvalidPublicKey(format!(
            "invalid public key size: got {}, expected {}",
            bytes.len(),
            PUBLIC_KEY_LENGTH
        ))
    })?;

    VerifyingKey::from_bytes(&arr).map_err(|e| SignalingError::InvalidPublicKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_validates() {
        let (public, private) = generate_keypair();
        assert!(validate_public_key(&public).is_ok());
        assert!(!private.is_empty());
        assert_ne!(public, private);
    }

    #[test]
    fn test_rejects_bad_base64() {
        let err = validate_public_key("not-base64!!!").unwrap_err();
        assert!(matches!(err, SignalingError::InvalidPublicKey(_)));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let short = STANDARD.encode([0u8; 16]);
        assert!(validate_public_key(&short).is_err());

        let long = STANDARD.encode([0u8; 64]);
        assert!(validate_public_key(&long).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        let (public, _) = generate_keypair();
        let key = parse_public_key(&public).unwrap();
        assert_eq!(STANDARD.encode(key.to_bytes()), public);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(parse_public_key("").is_err());
        assert!(parse_public_key(&STANDARD.encode([0u8; 31])).is_err());
    }
}
