//! DID-WBA payload construction, signing, and the two wire forms.
//!
//! The signing payload is always the four-field object
//! `{nonce, timestamp, service, did}`, canonicalized with JCS (RFC 8785)
//! before hashing. Signatures travel as fixed-width big-endian `R‖S`
//! (32 + 32 bytes for secp256k1), base64url-encoded without padding. DER
//! signatures and any other length are rejected.
//!
//! Two transports carry the same five fields: the `DIDWba` Authorization
//! header and a snake_case JSON object for non-HTTP channels.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use k256::SecretKey;
use k256::ecdsa::Signature;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::{self, CURVE_BYTE_SIZE};
use crate::did::{DidDocument, METHOD_TYPE_SECP256K1, select_authentication_method};
use crate::error::{AuthError, Result};
use crate::wba::method::create_suite;

/// Authorization scheme literal for DID-WBA headers.
pub const AUTH_SCHEME: &str = "DIDWba";

/// Prefix of bearer Authorization values, including the trailing space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Wire length of a signature in bytes: `R‖S`, each zero-padded to the
/// curve byte size.
pub const SIGNATURE_BYTE_SIZE: usize = 2 * CURVE_BYTE_SIZE;

const HEADER_KEYS: [&str; 5] = ["did", "nonce", "timestamp", "verification_method", "signature"];

/// The five fields of a DID-WBA authentication exchange.
///
/// Serializes directly as the JSON payload form; [`AuthParts::to_header`]
/// and [`AuthParts::parse_header`] convert to and from the Authorization
/// header form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParts {
    /// The client's DID.
    pub did: String,
    /// Fresh UUIDv4 per emission.
    pub nonce: String,
    /// RFC 3339 UTC timestamp of emission.
    pub timestamp: String,
    /// Bare fragment naming the verification method used to sign.
    pub verification_method: String,
    /// base64url `R‖S` signature, no padding.
    pub signature: String,
}

impl AuthParts {
    /// Renders the `DIDWba` Authorization header value.
    #[must_use]
    pub fn to_header(&self) -> String {
        format!(
            "{AUTH_SCHEME} did=\"{}\", nonce=\"{}\", timestamp=\"{}\", \
             verification_method=\"{}\", signature=\"{}\"",
            self.did, self.nonce, self.timestamp, self.verification_method, self.signature,
        )
    }

    /// Parses a `DIDWba` Authorization header value.
    ///
    /// Pair order is not significant; unknown keys are ignored. All five
    /// required keys must be present and non-empty, and
    /// `verification_method` must be a bare fragment (no `#`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingAuthorization`] for an empty value and
    /// [`AuthError::InvalidAuthHeader`] for everything else that fails.
    pub fn parse_header(header: &str) -> Result<Self> {
        let header = header.trim();
        if header.is_empty() {
            return Err(AuthError::MissingAuthorization);
        }

        let rest = header.strip_prefix(AUTH_SCHEME).ok_or_else(|| {
            AuthError::InvalidAuthHeader(format!("must start with '{AUTH_SCHEME}'"))
        })?;

        let mut fields = [const { String::new() }; 5];
        for pair in rest.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                return Err(AuthError::InvalidAuthHeader(format!("malformed pair '{pair}'")));
            };
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| {
                    AuthError::InvalidAuthHeader(format!("value for '{key}' is not quoted"))
                })?;
            if let Some(slot) = HEADER_KEYS.iter().position(|k| *k == key.trim()) {
                fields[slot] = value.to_owned();
            }
        }

        let [did, nonce, timestamp, verification_method, signature] = fields;
        let parts = Self { did, nonce, timestamp, verification_method, signature };
        parts.ensure_complete()?;
        Ok(parts)
    }

    /// Serializes the JSON payload form (snake_case keys, UTF-8).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses the JSON payload form, enforcing the same field requirements
    /// as [`AuthParts::parse_header`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidAuthHeader`] for empty input, missing
    /// fields, or a non-bare `verification_method`; [`AuthError::Json`] for
    /// malformed JSON.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(AuthError::InvalidAuthHeader("auth JSON payload is empty".to_owned()));
        }
        let parts: Self = serde_json::from_slice(data)?;
        parts.ensure_complete()?;
        Ok(parts)
    }

    fn ensure_complete(&self) -> Result<()> {
        for (key, value) in HEADER_KEYS.iter().zip([
            &self.did,
            &self.nonce,
            &self.timestamp,
            &self.verification_method,
            &self.signature,
        ]) {
            if value.is_empty() {
                return Err(AuthError::InvalidAuthHeader(format!("missing required key '{key}'")));
            }
        }
        if self.verification_method.contains('#') {
            return Err(AuthError::InvalidAuthHeader(
                "verification_method must be a bare fragment".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Builds the canonical (JCS) signing payload bytes.
///
/// # Errors
///
/// Returns [`AuthError::Json`] if canonicalization fails.
pub fn build_payload(nonce: &str, timestamp: &str, service: &str, did: &str) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct SigningPayload<'a> {
        nonce: &'a str,
        timestamp: &'a str,
        service: &'a str,
        did: &'a str,
    }

    serde_jcs::to_vec(&SigningPayload { nonce, timestamp, service, did })
        .map_err(AuthError::Json)
}

/// Computes the digest that is actually signed: `SHA-256(SHA-256(payload))`.
///
/// Interop requirement: the reference DID-WBA SDK feeds a SHA-256 digest
/// into an ECDSA-with-SHA-256 signer, which hashes its input once more. The
/// effective message is the double hash; collapsing the two rounds breaks
/// cross-implementation verification.
#[must_use]
pub fn signing_digest(payload: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(payload);
    Sha256::digest(first).into()
}

/// Encodes a signature as fixed-width `R‖S`, base64url without padding.
#[must_use]
pub fn encode_signature(signature: &Signature) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature.to_bytes())
}

/// Decodes a wire signature, rejecting anything that is not exactly
/// [`SIGNATURE_BYTE_SIZE`] bytes once base64url-decoded.
///
/// # Errors
///
/// Returns [`AuthError::InvalidSignature`] for bad base64, wrong length
/// (DER included), or out-of-range components.
pub fn decode_signature(signature: &str) -> Result<Signature> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| AuthError::InvalidSignature(format!("invalid base64url: {e}")))?;

    if bytes.len() != SIGNATURE_BYTE_SIZE {
        return Err(AuthError::InvalidSignature(format!(
            "invalid signature length: got {} want {SIGNATURE_BYTE_SIZE}",
            bytes.len()
        )));
    }

    Signature::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidSignature(format!("invalid signature components: {e}")))
}

/// Renders the current instant in the RFC 3339 form used on the wire.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Produces freshly signed [`AuthParts`] for `service_domain`.
///
/// Uses the document's first authentication method, which must be of type
/// [`METHOD_TYPE_SECP256K1`]; a fresh UUIDv4 nonce and the current UTC time
/// go into every emission.
///
/// # Errors
///
/// Returns [`AuthError::VerificationMethodNotFound`] /
/// [`AuthError::UnsupportedVerificationMethod`] for method selection
/// failures and [`AuthError::Crypto`] if signing fails.
pub fn generate_auth_parts(
    secret: &SecretKey,
    document: &DidDocument,
    service_domain: &str,
) -> Result<AuthParts> {
    let (method, fragment) = select_authentication_method(document)?;
    if method.method_type != METHOD_TYPE_SECP256K1 {
        return Err(AuthError::UnsupportedVerificationMethod(method.method_type.clone()));
    }

    let nonce = Uuid::new_v4().to_string();
    let timestamp = format_timestamp(Utc::now());

    let payload = build_payload(&nonce, &timestamp, service_domain, &document.id)?;
    let signature = crypto::sign_digest(secret, &signing_digest(&payload))?;

    Ok(AuthParts {
        did: document.id.clone(),
        nonce,
        timestamp,
        verification_method: fragment,
        signature: encode_signature(&signature),
    })
}

/// Verifies the signature of [`AuthParts`] against a DID document.
///
/// This checks only identity and signature; nonce and timestamp policy
/// belong to the verifier. Useful on its own for the JSON payload form on
/// non-HTTP transports.
///
/// # Errors
///
/// Returns [`AuthError::DidMismatch`],
/// [`AuthError::VerificationMethodNotFound`],
/// [`AuthError::UnsupportedVerificationMethod`], or
/// [`AuthError::InvalidSignature`].
pub fn verify_auth_parts(
    parts: &AuthParts,
    document: &DidDocument,
    service_domain: &str,
) -> Result<()> {
    if parts.did != document.id {
        return Err(AuthError::DidMismatch);
    }

    let method = crate::did::method_for_fragment(document, &parts.verification_method)?;
    let suite = create_suite(method)?;

    let payload = build_payload(&parts.nonce, &parts.timestamp, service_domain, &parts.did)?;
    if suite.verify(&payload, &parts.signature) {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature("signature verification failed".to_owned()))
    }
}
