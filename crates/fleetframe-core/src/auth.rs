//! Connection authentication.
//!
//! Every connection presents a signed credential (HS256 JWT) in its Hello
//! frame. Verification resolves the caller's identity and role and produces
//! the immutable [`ConnectionContext`] the rest of the core trusts. Failure
//! closes the connection before any session state exists - there is no
//! partially-authenticated connection.

use std::net::SocketAddr;

use fleetframe_proto::Role;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims encoded in the connection credential.
///
/// `role` deserializes through [`Role`], so a token carrying anything other
/// than the four known roles fails verification outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User id the credential was issued to
    pub sub: u64,
    /// Role granted to the user
    pub role: Role,
    /// Issued-at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// Whether the platform has verified this account's documents
    #[serde(default)]
    pub verified: bool,
}

/// Immutable per-connection identity, attached after a successful handshake.
///
/// Owned exclusively by the connection for its lifetime and destroyed on
/// disconnect; nothing mutates it after creation.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Server-assigned connection id
    pub connection_id: u64,
    /// Authenticated user id
    pub user_id: u64,
    /// Authenticated role
    pub role: Role,
    /// Originating address
    pub remote_addr: SocketAddr,
    /// Client software identifier from the Hello frame
    pub user_agent: Option<String>,
    /// Wall-clock connect time, Unix milliseconds
    pub connected_at_ms: u64,
    /// Account verification flag from the credential
    pub verified: bool,
}

/// Errors from credential verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credential has expired
    #[error("credential expired")]
    Expired,

    /// Credential is malformed, wrongly signed, or carries an unknown role
    #[error("invalid credential: {0}")]
    Invalid(String),
}

/// Verifies connection credentials and mints them for tests and tooling.
#[derive(Clone)]
pub struct TokenAuthenticator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl TokenAuthenticator {
    /// Create an authenticator from the shared HS256 secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify a presented credential and return its claims.
    ///
    /// # Errors
    ///
    /// - `AuthError::Expired` if the token's `exp` is in the past
    /// - `AuthError::Invalid` for signature mismatches, malformed tokens, or
    ///   unknown roles
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        Ok(data.claims)
    }

    /// Mint a signed credential for the given claims.
    ///
    /// Credential issuance belongs to the platform's login service; this
    /// exists for tests and local tooling.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Invalid` if signing fails.
    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator").finish_non_exhaustive()
    }
}
