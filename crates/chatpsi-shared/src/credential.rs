//! Access tokens issued by the identity provider.
//!
//! The gateway never trusts an actor id found in a request body.  Clients
//! present an [`AccessToken`] signed with the identity provider's Ed25519 key;
//! the gateway verifies it and derives the actor from it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;
use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

// payload = user_id (16 bytes) || valid_until (rfc3339)
fn signed_payload(user_id: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(48);
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
    payload
}

impl AccessToken {
    pub fn issue(user_id: UserId, valid_until: DateTime<Utc>, provider_key: &SigningKey) -> Self {
        let signature = provider_key.sign(&signed_payload(&user_id, &valid_until));
        Self {
            user_id,
            valid_until,
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Check expiry and signature against the provider's public key.
    pub fn verify(&self, provider_pubkey: &[u8; 32]) -> Result<UserId, CredentialError> {
        if Utc::now() > self.valid_until {
            return Err(CredentialError::Expired);
        }

        let verifying_key =
            VerifyingKey::from_bytes(provider_pubkey).map_err(|_| CredentialError::InvalidKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| CredentialError::BadSignature)?;

        verifying_key
            .verify(&signed_payload(&self.user_id, &self.valid_until), &signature)
            .map_err(|_| CredentialError::BadSignature)?;

        Ok(self.user_id)
    }

    /// Bearer form: unpadded URL-safe base64 of the JSON token.
    pub fn encode(&self) -> String {
        // serializing a struct of plain fields cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(bearer: &str) -> Result<Self, CredentialError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(bearer.trim())
            .map_err(|_| CredentialError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| CredentialError::Malformed)
    }
}
