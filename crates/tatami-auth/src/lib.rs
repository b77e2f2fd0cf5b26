//! Tatami Auth - Bearer Token Verification
//!
//! Stateless verifier for the symmetric-key (HMAC-SHA256) tokens issued by
//! the external identity provider. The verifier never touches the network:
//! it checks the signature against the configured shared secret, pins the
//! issuer, enforces expiry against a caller-supplied clock, and extracts the
//! role set from the token's claims.
//!
//! Role extraction reads claims in priority order, first present source
//! wins: top-level `user_roles[]`, top-level `user_role`,
//! `app_metadata.roles`, `app_metadata.role`, `user_metadata.role`.
//! Unknown role strings are dropped.

mod claims;
mod error;
mod verifier;

pub use claims::VerifiedToken;
pub use error::{AuthError, AuthResult};
pub use verifier::{bearer_from_header, TokenVerifier, VerifierConfig};
