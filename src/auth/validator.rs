use std::sync::Arc;

use jsonwebtoken::jwk::{
    AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tokio::sync::watch;
use tracing::debug;

use super::BearerToken;
use crate::error::{GovnetError, Result};

/// Verifies bearer token signatures against the current signing-key snapshot.
///
/// Tokens are not matched to keys by `kid`: every key in the set is tried and
/// the token is accepted if any of them validates it.
#[derive(Clone, Debug)]
pub struct TokenValidator {
    keys: watch::Receiver<Arc<JwkSet>>,
}

impl TokenValidator {
    pub(crate) fn new(keys: watch::Receiver<Arc<JwkSet>>) -> Self {
        Self { keys }
    }

    /// Validator over a fixed key set, never refreshed
    pub fn with_static_keys(keys: JwkSet) -> Self {
        let (_cell, snapshot) = watch::channel(Arc::new(keys));
        Self::new(snapshot)
    }

    pub fn key_count(&self) -> usize {
        self.snapshot().keys.len()
    }

    fn snapshot(&self) -> Arc<JwkSet> {
        self.keys.borrow().clone()
    }

    pub fn verify(&self, token: &BearerToken) -> Result<()> {
        let keys = self.snapshot();
        for jwk in &keys.keys {
            let Some(algorithm) = signing_algorithm(jwk) else {
                continue;
            };
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    debug!("Skipping unusable signing key {:?}: {}", jwk.common.key_id, e);
                    continue;
                }
            };
            if decode::<serde_json::Value>(token.as_str(), &key, &signature_only(algorithm))
                .is_ok()
            {
                return Ok(());
            }
        }

        Err(GovnetError::InvalidSignature(format!(
            "token did not validate against any of {} signing keys",
            keys.keys.len()
        )))
    }
}

// Signature check only; claim policy is left to the storage nodes
fn signature_only(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation
}

fn signing_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return None;
    }
    match &jwk.common.key_algorithm {
        Some(KeyAlgorithm::HS256) => Some(Algorithm::HS256),
        Some(KeyAlgorithm::HS384) => Some(Algorithm::HS384),
        Some(KeyAlgorithm::HS512) => Some(Algorithm::HS512),
        Some(KeyAlgorithm::ES256) => Some(Algorithm::ES256),
        Some(KeyAlgorithm::ES384) => Some(Algorithm::ES384),
        Some(KeyAlgorithm::RS256) => Some(Algorithm::RS256),
        Some(KeyAlgorithm::RS384) => Some(Algorithm::RS384),
        Some(KeyAlgorithm::RS512) => Some(Algorithm::RS512),
        Some(KeyAlgorithm::PS256) => Some(Algorithm::PS256),
        Some(KeyAlgorithm::PS384) => Some(Algorithm::PS384),
        Some(KeyAlgorithm::PS512) => Some(Algorithm::PS512),
        Some(KeyAlgorithm::EdDSA) => Some(Algorithm::EdDSA),
        // key-encryption algorithms
        Some(_) => None,
        None => match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => Some(Algorithm::RS256),
            AlgorithmParameters::EllipticCurve(params) => match params.curve {
                EllipticCurve::P256 => Some(Algorithm::ES256),
                EllipticCurve::P384 => Some(Algorithm::ES384),
                _ => None,
            },
            AlgorithmParameters::OctetKeyPair(_) => Some(Algorithm::EdDSA),
            AlgorithmParameters::OctetKey(_) => Some(Algorithm::HS256),
        },
    }
}
