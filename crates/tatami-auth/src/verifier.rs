//! HS256 verification against the shared secret.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Validation};

use crate::claims::{RawClaims, VerifiedToken};
use crate::error::{AuthError, AuthResult};

/// Verifier configuration, sourced from `TOKEN_SHARED_SECRET` and
/// `TOKEN_ISSUER`.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub shared_secret: String,
    /// When set, tokens whose `iss` differs are rejected with
    /// `UnknownIssuer`.
    pub issuer: Option<String>,
}

/// Stateless bearer-token verifier.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    issuer: Option<String>,
}

impl TokenVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.shared_secret.as_bytes()),
            issuer: config.issuer.clone(),
        }
    }

    /// Verify a bearer token at instant `now`.
    ///
    /// Expiry is enforced here rather than by the JWT library so the
    /// boundary is exact: a token with `exp == now` is already expired.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> AuthResult<VerifiedToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<RawClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                _ => AuthError::Malformed,
            })?;
        let claims = data.claims;

        if let Some(expected) = self.issuer.as_deref() {
            if claims.iss.as_deref() != Some(expected) {
                return Err(AuthError::UnknownIssuer);
            }
        }

        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AuthError::Malformed)?;
        let issued_at = claims.iat.and_then(|t| Utc.timestamp_opt(t, 0).single());
        let roles = claims.extract_roles();

        Ok(VerifiedToken {
            subject_id: claims.sub,
            roles,
            issued_at,
            expires_at,
        })
    }
}

/// Pull the token out of an `Authorization: Bearer <t>` header value.
pub fn bearer_from_header(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}
