//! Error types for DID-WBA authentication.
//!
//! All fallible operations in this crate return [`Result`]. Every variant of
//! [`AuthError`] corresponds to one failure kind of the protocol, and each
//! kind carries the HTTP status a server boundary should answer with
//! (see [`AuthError::status`]). Only the HTTP middleware translates kinds to
//! status codes; everything below it matches on variants.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for DID-WBA operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors produced while generating or verifying DID-WBA authentication.
///
/// Variants preserve the failure kind end to end: outer layers add context
/// to the message but never collapse one kind into another, so callers can
/// match on the variant to decide how to react.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum AuthError {
    /// The Authorization header was absent or empty.
    #[error("missing authorization header")]
    MissingAuthorization,

    /// The Authorization header did not parse as a `DIDWba` header.
    #[error("invalid authorization header: {0}")]
    InvalidAuthHeader(String),

    /// A bearer JWT failed verification (bad signature, expired, malformed).
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The DID-WBA signature did not verify against the resolved document.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The DID in the header does not match the resolved document's `id`.
    #[error("DID mismatch")]
    DidMismatch,

    /// The nonce was rejected as already used or otherwise invalid.
    #[error("invalid or expired nonce")]
    NonceReused,

    /// The nonce validator itself failed (store unreachable, etc.).
    ///
    /// This is an availability problem, not a replay verdict, and maps to 500.
    #[error("nonce validator error: {0}")]
    NonceValidatorFailure(String),

    /// The timestamp did not parse as RFC 3339.
    #[error("invalid timestamp format: {0}")]
    TimestampInvalid(String),

    /// The timestamp lies beyond the allowed future tolerance.
    #[error("timestamp is in the future")]
    TimestampFuture,

    /// The timestamp is older than the configured expiration window.
    #[error("timestamp expired")]
    TimestampExpired,

    /// The request domain is not in the verifier's allow-list.
    #[error("domain not allowed: {0}")]
    DomainNotAllowed(String),

    /// The DID document could not be resolved, or its `id` mismatched.
    #[error("failed to resolve DID document: {0}")]
    DidResolution(String),

    /// No verification method matches the requested fragment.
    #[error("verification method not found: {0}")]
    VerificationMethodNotFound(String),

    /// The verification method type has no registered signature suite.
    #[error("unsupported verification method type: {0}")]
    UnsupportedVerificationMethod(String),

    /// A JWT key required for this code path was not configured.
    #[error("JWT {0} not configured")]
    JwtConfigMissing(&'static str),

    /// Access-token creation failed.
    #[error("failed to create access token: {0}")]
    TokenCreation(String),

    /// Credential material (DID document or private key) could not be loaded.
    #[error("failed to load credentials: {0}")]
    KeyLoad(String),

    /// The DID identifier itself is malformed.
    #[error("invalid DID: {0}")]
    InvalidDid(String),

    /// The hostname is empty or an IP literal.
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    /// The target URL could not be parsed or has no host.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A low-level cryptographic operation failed.
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure shared out of a coalesced in-flight computation.
    ///
    /// All callers waiting on the same single-flight key receive the same
    /// underlying error; use [`AuthError::root`] to match on its kind.
    #[error("{0}")]
    Shared(Arc<AuthError>),
}

impl AuthError {
    /// Returns the HTTP status code a server boundary should answer with.
    ///
    /// The mapping is authoritative: the middleware applies it exactly once
    /// at the edge, handlers below never map kinds to status themselves.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingAuthorization
            | Self::InvalidAuthHeader(_)
            | Self::InvalidToken(_)
            | Self::TimestampExpired
            | Self::NonceReused
            | Self::DidResolution(_) => 401,
            Self::TimestampInvalid(_) | Self::TimestampFuture => 400,
            Self::DomainNotAllowed(_)
            | Self::InvalidSignature(_)
            | Self::DidMismatch
            | Self::VerificationMethodNotFound(_)
            | Self::UnsupportedVerificationMethod(_) => 403,
            Self::NonceValidatorFailure(_)
            | Self::JwtConfigMissing(_)
            | Self::TokenCreation(_) => 500,
            Self::Shared(inner) => inner.status(),
            _ => 500,
        }
    }

    /// Unwraps [`AuthError::Shared`] layers down to the originating error.
    #[must_use]
    pub fn root(&self) -> &AuthError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }
}
