//! Session token verification.
//!
//! Tokens are JWTs issued by an external identity service and signed with a
//! single asymmetric key. The relay only ever verifies them.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// The only rejection text clients ever see, whatever check failed.
pub const REJECTION_MESSAGE: &str = "Unauthorized";

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Token missing")]
    MissingToken,

    /// The signature does not validate under the configured key.
    #[error("Token signature is invalid")]
    InvalidSignature,

    /// The token could not be decoded.
    #[error("Token is malformed: {0}")]
    Malformed(String),

    /// The issuer claim does not equal the configured issuer.
    #[error("Token issuer mismatch")]
    IssuerMismatch,

    /// The expiry claim is at or before the current time.
    #[error("Token expired")]
    Expired,

    /// The token is valid but asserts a different identity than the one
    /// stored for the connection.
    #[error("Token identity does not match connection")]
    IdentityMismatch,
}

impl AuthError {
    /// Short, stable label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::Malformed(_) => "malformed",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::Expired => "expired",
            AuthError::IdentityMismatch => "identity_mismatch",
        }
    }
}

/// Verifier configuration errors. Fatal for whoever tries to build a verifier.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No public key configured.
    #[error("Verifier public key is not configured")]
    MissingPublicKey,

    /// No issuer configured.
    #[error("Verifier issuer is not configured")]
    MissingIssuer,

    /// Symmetric algorithms need a shared secret, which the relay never holds.
    #[error("Unsupported verification algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// The public key could not be parsed for the configured algorithm.
    #[error("Invalid verifier public key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),
}

/// Verified session claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Authenticated principal.
    pub principal_id: String,
    /// Hash binding the token to the principal's current credentials.
    pub auth_hash: String,
    /// Host the session was opened from.
    #[serde(default)]
    pub origin_host: String,
    /// Client device fingerprint.
    #[serde(default)]
    pub device_fingerprint: String,
    /// Token issuer.
    #[serde(rename = "iss")]
    pub issuer: String,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

impl Claims {
    /// Whether these claims assert the same identity as `other`.
    #[must_use]
    pub fn same_identity(&self, principal_id: &str, auth_hash: &str) -> bool {
        self.principal_id == principal_id && self.auth_hash == auth_hash
    }
}

/// Verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// The single accepted signing algorithm.
    pub algorithm: Algorithm,
    /// PEM-encoded public key.
    pub public_key_pem: Option<String>,
    /// Expected issuer.
    pub issuer: Option<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RS256,
            public_key_pem: None,
            issuer: None,
        }
    }
}

/// Validates signed session tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl TokenVerifier {
    /// Build a verifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or issuer is missing, the algorithm is
    /// symmetric, or the key does not parse.
    pub fn new(config: &VerifierConfig) -> Result<Self, ConfigError> {
        let pem = config
            .public_key_pem
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingPublicKey)?;
        let issuer = config
            .issuer
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or(ConfigError::MissingIssuer)?;

        let decoding_key = match config.algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem.as_bytes()),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
            other => return Err(ConfigError::UnsupportedAlgorithm(other)),
        }
        .map_err(ConfigError::InvalidKey)?;

        // Expiry and issuer are checked after decoding: expiry must reject
        // `exp == now`, and the issuer claim may carry wrapping quotes.
        let mut validation = Validation::new(config.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss"]);

        Ok(Self {
            decoding_key,
            validation,
            issuer: issuer.to_string(),
        })
    }

    /// The configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify a token against the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, issuer, or expiry check fails.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, current_unix_timestamp())
    }

    /// Verify a token as of `now` (epoch seconds).
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, issuer, or expiry check fails.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed(e.to_string()),
            })?
            .claims;

        if strip_wrapping_quotes(&claims.issuer) != self.issuer {
            return Err(AuthError::IssuerMismatch);
        }

        if claims.exp <= now {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}

/// Remove one pair of wrapping double quotes, if present.
fn strip_wrapping_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Current wall-clock time in epoch seconds.
#[must_use]
pub fn current_unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
