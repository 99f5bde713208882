//! Approval signatures
//!
//! Every approval is signed with the service's Ed25519 key over
//! `payment_id|amount|approved_at`. The signature is stored on the payment
//! together with the verifying key and its fingerprint, and is checked again
//! under the account lock before any money moves.

use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::payment::sha256_hex;

/// Signature problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Malformed signature: {0}")]
    Malformed(String),

    #[error("Signed by key {actual}, expected {expected}")]
    UntrustedKey { expected: String, actual: String },

    #[error("Signature does not match the approval")]
    Mismatch,
}

/// Signature over an approval, as stored on the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSignature {
    /// Hex-encoded signature bytes
    pub signature: String,
    /// Hex-encoded verifying key
    pub public_key: String,
    /// SHA-256 of the verifying key
    pub key_fingerprint: String,
    pub signed_at: DateTime<Utc>,
}

/// Bytes covered by an approval signature
pub fn signing_payload(payment_id: Uuid, amount: Decimal, signed_at: DateTime<Utc>) -> String {
    format!(
        "{}|{}|{}",
        payment_id,
        amount,
        signed_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    )
}

/// Holds the approval signing key.
#[derive(Clone)]
pub struct ApprovalSigner {
    signing_key: SigningKey,
}

impl ApprovalSigner {
    /// Create from a 32-byte hex-encoded seed
    pub fn from_hex(hex_seed: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| SignatureError::InvalidKey(format!("invalid hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidKey("seed must be 32 bytes".to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Fresh random key, valid for the life of the process
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn fingerprint(&self) -> String {
        key_fingerprint(&self.signing_key.verifying_key())
    }

    pub fn sign(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        signed_at: DateTime<Utc>,
    ) -> ApprovalSignature {
        let payload = signing_payload(payment_id, amount, signed_at);
        let signature = self.signing_key.sign(payload.as_bytes());

        ApprovalSignature {
            signature: hex::encode(signature.to_bytes()),
            public_key: self.public_key_hex(),
            key_fingerprint: self.fingerprint(),
            signed_at,
        }
    }

    /// Check that `signature` was made by this key over the given approval.
    pub fn verify(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        signature: &ApprovalSignature,
    ) -> Result<(), SignatureError> {
        let expected = self.fingerprint();
        if signature.key_fingerprint != expected || signature.public_key != self.public_key_hex() {
            return Err(SignatureError::UntrustedKey {
                expected,
                actual: signature.key_fingerprint.clone(),
            });
        }

        let sig_bytes = hex::decode(&signature.signature)
            .map_err(|e| SignatureError::Malformed(format!("invalid hex: {e}")))?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| SignatureError::Malformed("signature must be 64 bytes".to_string()))?;

        let payload = signing_payload(payment_id, amount, signature.signed_at);
        self.signing_key
            .verifying_key()
            .verify(payload.as_bytes(), &Signature::from_bytes(&sig_array))
            .map_err(|_| SignatureError::Mismatch)
    }
}

impl PartialEq for ApprovalSigner {
    fn eq(&self, other: &Self) -> bool {
        self.signing_key.verifying_key().to_bytes() == other.signing_key.verifying_key().to_bytes()
    }
}

impl Eq for ApprovalSigner {}

// Never print key material
impl fmt::Debug for ApprovalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalSigner")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

fn key_fingerprint(key: &VerifyingKey) -> String {
    sha256_hex(&key.to_bytes())
}
