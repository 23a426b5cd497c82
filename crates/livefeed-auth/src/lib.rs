//! # livefeed-auth
//!
//! Credential verification for the Livefeed streaming service.
//!
//! - [`verifier`] - the [`CredentialVerifier`] interface and credential cache keys
//! - [`jwt`] - HS256 access token verification
//! - [`error`] - verification failure reasons

pub mod error;
pub mod jwt;
pub mod principal;
pub mod verifier;

pub use error::JwtError;
pub use jwt::{JwtVerifier, MIN_SECRET_LEN};
pub use principal::PrincipalId;
pub use verifier::{CredentialVerifier, credential_key};
