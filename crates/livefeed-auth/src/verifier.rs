use sha2::{Digest, Sha256};

use crate::error::JwtError;
use crate::principal::PrincipalId;

/// Resolves a raw credential to the principal it was issued for.
///
/// Verification is synchronous and CPU-bound; async callers should run it on
/// a blocking worker.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<PrincipalId, JwtError>;
}

/// Stable cache key for a raw credential: hex SHA-256 of its bytes.
///
/// Identical across processes, so it can key the shared cache.
pub fn credential_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key_is_stable_and_opaque() {
        let a = credential_key("header.payload.signature");
        let b = credential_key("header.payload.signature");
        let c = credential_key("header.payload.signaturE");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("payload"));
    }
}
