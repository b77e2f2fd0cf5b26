//! Verification error taxonomy.

use thiserror::Error;

/// Why a bearer token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Not a decodable JWT, or claims missing/ill-typed.
    #[error("malformed token")]
    Malformed,

    /// Signature does not verify against the shared secret.
    #[error("bad token signature")]
    BadSignature,

    /// `exp` is at or before the verification instant.
    #[error("token expired")]
    Expired,

    /// `iss` does not match the configured issuer.
    #[error("unknown token issuer")]
    UnknownIssuer,
}

pub type AuthResult<T> = Result<T, AuthError>;
