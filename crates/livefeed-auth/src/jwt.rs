//! HS256 access token verification.
//!
//! Tokens are issued by the account service with a shared secret. The viewer
//! id is read from the first usable claim of:
//!
//! 1. `userdetail.user_master_id`
//! 2. `user_master_id`
//! 3. `sub`
//!
//! Each may be a JSON number or a numeric string.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::JwtError;
use crate::principal::PrincipalId;
use crate::verifier::CredentialVerifier;

/// Minimum HS256 secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
struct AccessClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_master_id: Option<Value>,
    #[serde(default)]
    userdetail: Option<Value>,
}

impl AccessClaims {
    fn principal(&self) -> Result<PrincipalId, JwtError> {
        self.userdetail
            .as_ref()
            .and_then(|detail| detail.get("user_master_id"))
            .and_then(principal_from_value)
            .or_else(|| self.user_master_id.as_ref().and_then(principal_from_value))
            .or_else(|| self.sub.as_deref().and_then(|s| s.parse().ok()))
            .ok_or(JwtError::MissingPrincipal)
    }
}

fn principal_from_value(value: &Value) -> Option<PrincipalId> {
    match value {
        Value::Number(n) => n.as_i64().map(PrincipalId::new),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Verifies HS256 tokens against a fixed secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Build a verifier. Fails if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(JwtError::invalid_key(format!(
                "HS256 secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<PrincipalId, JwtError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(JwtError::malformed("empty token"));
        }

        let data = decode::<AccessClaims>(token, &self.key, &self.validation)?;
        data.claims.principal()
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}
