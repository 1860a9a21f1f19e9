//! `did:wba` identifiers and DID documents.
//!
//! A `did:wba` identifier encodes an HTTPS-resolvable location:
//! `did:wba:<percent-escaped host[:port]>[:<seg1>[:<seg2>...]]`. Colons inside
//! the host (for ports) are percent-escaped so the identifier stays
//! colon-separated; any further segments become URL path components. The
//! document lives at `https://<host>/.well-known/did.json` for base DIDs, or
//! `https://<host>/<seg1>/.../did.json` when path segments are present.

pub mod resolver;

use std::net::IpAddr;

use base64::Engine;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto;
use crate::error::{AuthError, Result};

/// Prefix of every DID this crate understands.
pub const DID_WBA_PREFIX: &str = "did:wba:";

/// W3C DID v1 context URL.
pub const CONTEXT_DID_V1: &str = "https://www.w3.org/ns/did/v1";
/// JWS 2020 suite context URL.
pub const CONTEXT_JWS_2020: &str = "https://w3id.org/security/suites/jws-2020/v1";
/// secp256k1 2019 suite context URL.
pub const CONTEXT_SECP256K1_2019: &str = "https://w3id.org/security/suites/secp256k1-2019/v1";

/// The only signing-capable verification method type in this crate.
pub const METHOD_TYPE_SECP256K1: &str = "EcdsaSecp256k1VerificationKey2019";

/// Service type advertising an agent description document.
pub const SERVICE_TYPE_AGENT_DESCRIPTION: &str = "AgentDescription";

/// Fragment used for the key minted by [`create_did_document`].
pub const DEFAULT_KEY_FRAGMENT: &str = "key-1";

const WELL_KNOWN_DID_PATH: &str = "/.well-known/did.json";
const DID_DOCUMENT_FILENAME: &str = "did.json";

/// Characters escaped when embedding a host or path segment into a DID.
///
/// Everything outside RFC 3986 unreserved is escaped, which in particular
/// turns the port colon into `%3A`.
const DID_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// JSON Web Key for a secp256k1 public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, `"EC"` for this crate.
    pub kty: String,
    /// Curve name, `"secp256k1"`.
    pub crv: String,
    /// X coordinate, base64url without padding, zero-padded to 32 bytes.
    pub x: String,
    /// Y coordinate, base64url without padding, zero-padded to 32 bytes.
    pub y: String,
    /// Key id: base64url of SHA-256 over the 33-byte compressed point.
    #[serde(default)]
    pub kid: String,
}

/// A service advertised by a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Service id, `<did>#<fragment>`.
    pub id: String,
    /// Service type, e.g. [`SERVICE_TYPE_AGENT_DESCRIPTION`].
    #[serde(rename = "type")]
    pub service_type: String,
    /// Endpoint URL.
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// One verification method descriptor.
///
/// The set of method types is open-ended, so unknown fields are retained in
/// [`extra`](Self::extra); the signature-suite registry in
/// [`crate::wba::method`] decides which types can actually verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMethodEntry {
    /// Method id, `<did>#<fragment>`.
    pub id: String,
    /// Method type string, e.g. [`METHOD_TYPE_SECP256K1`].
    #[serde(rename = "type")]
    pub method_type: String,
    /// Controller DID.
    pub controller: String,
    /// Public key in JWK form, when the type carries one.
    #[serde(rename = "publicKeyJwk", skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<Jwk>,
    /// Fields of method types this crate does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A DID-WBA document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidDocument {
    /// Context URLs, in emission order.
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    /// The DID itself.
    pub id: String,
    /// Verification method descriptors.
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethodEntry>,
    /// References to methods usable for authentication: full
    /// `<did>#<fragment>` URIs or bare fragments.
    pub authentication: Vec<String>,
    /// Advertised services.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<ServiceEntry>,
}

/// Builds a `did:wba` identifier from its parts.
///
/// The port, when given, is percent-escaped into the host segment. Path
/// segments are trimmed, empty ones dropped, and the rest percent-escaped.
///
/// # Errors
///
/// Returns [`AuthError::InvalidHostname`] for an empty hostname or an IP
/// literal.
pub fn build_did(hostname: &str, port: Option<u16>, path_segments: &[&str]) -> Result<String> {
    validate_hostname(hostname)?;

    let mut did = format!("{DID_WBA_PREFIX}{hostname}");
    if let Some(port) = port {
        did.push_str(&utf8_percent_encode(&format!(":{port}"), DID_SEGMENT).to_string());
    }

    let cleaned: Vec<String> = path_segments
        .iter()
        .map(|segment| segment.trim())
        .filter(|segment| !segment.is_empty())
        .map(|segment| utf8_percent_encode(segment, DID_SEGMENT).to_string())
        .collect();
    if !cleaned.is_empty() {
        did.push(':');
        did.push_str(&cleaned.join(":"));
    }

    Ok(did)
}

/// Splits a DID into its unescaped domain and raw path segments.
///
/// # Errors
///
/// Returns [`AuthError::InvalidDid`] when the prefix is wrong, the domain is
/// missing, or the domain is not valid percent-encoded UTF-8.
pub fn parse_did(did: &str) -> Result<(String, Vec<String>)> {
    let rest = did
        .strip_prefix(DID_WBA_PREFIX)
        .ok_or_else(|| AuthError::InvalidDid("must start with 'did:wba:'".to_owned()))?;

    let (escaped_domain, tail) = match rest.split_once(':') {
        Some((domain, tail)) => (domain, Some(tail)),
        None => (rest, None),
    };

    let domain = percent_decode_str(escaped_domain)
        .decode_utf8()
        .map_err(|e| AuthError::InvalidDid(format!("failed to unescape domain: {e}")))?
        .into_owned();
    if domain.is_empty() {
        return Err(AuthError::InvalidDid("missing domain".to_owned()));
    }

    let segments = tail
        .map(|tail| tail.split(':').map(str::to_owned).collect())
        .unwrap_or_default();

    Ok((domain, segments))
}

/// Derives the HTTPS URL where a DID's document is published.
///
/// # Errors
///
/// Propagates [`parse_did`] failures.
///
/// # Examples
///
/// ```
/// use did_wba_auth::did::did_to_url;
///
/// assert_eq!(
///     did_to_url("did:wba:example.com").unwrap(),
///     "https://example.com/.well-known/did.json",
/// );
/// assert_eq!(
///     did_to_url("did:wba:example.com:user:alice").unwrap(),
///     "https://example.com/user/alice/did.json",
/// );
/// ```
pub fn did_to_url(did: &str) -> Result<String> {
    let (domain, segments) = parse_did(did)?;
    if segments.is_empty() {
        Ok(format!("https://{domain}{WELL_KNOWN_DID_PATH}"))
    } else {
        Ok(format!("https://{domain}/{}/{DID_DOCUMENT_FILENAME}", segments.join("/")))
    }
}

/// Creates a DID document and its private key for a freshly generated
/// secp256k1 key pair.
///
/// The document carries one verification method under
/// [`DEFAULT_KEY_FRAGMENT`], referenced by `authentication`, plus an
/// optional `AgentDescription` service entry.
///
/// # Errors
///
/// Returns [`AuthError::InvalidHostname`] for an empty hostname or an IP
/// literal.
pub fn create_did_document(
    hostname: &str,
    port: Option<u16>,
    path_segments: &[&str],
    agent_description_url: Option<&str>,
) -> Result<(DidDocument, SecretKey)> {
    let did = build_did(hostname, port, path_segments)?;
    let (secret, public) = crypto::generate_keypair();

    let method_id = format!("{did}#{DEFAULT_KEY_FRAGMENT}");
    let document = DidDocument {
        context: vec![
            CONTEXT_DID_V1.to_owned(),
            CONTEXT_JWS_2020.to_owned(),
            CONTEXT_SECP256K1_2019.to_owned(),
        ],
        id: did.clone(),
        verification_method: vec![VerificationMethodEntry {
            id: method_id.clone(),
            method_type: METHOD_TYPE_SECP256K1.to_owned(),
            controller: did.clone(),
            public_key_jwk: Some(public_key_jwk(&public)),
            extra: serde_json::Map::new(),
        }],
        authentication: vec![method_id],
        service: agent_description_url
            .map(|endpoint| {
                vec![ServiceEntry {
                    id: format!("{did}#ad"),
                    service_type: SERVICE_TYPE_AGENT_DESCRIPTION.to_owned(),
                    service_endpoint: endpoint.to_owned(),
                }]
            })
            .unwrap_or_default(),
    };

    Ok((document, secret))
}

/// Encodes a secp256k1 public key as a JWK.
///
/// The `kid` is the base64url of SHA-256 over the 33-byte compressed point.
#[must_use]
pub fn public_key_jwk(public: &PublicKey) -> Jwk {
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let point = public.to_encoded_point(false);
    let x = point.x().expect("uncompressed point carries x");
    let y = point.y().expect("uncompressed point carries y");

    let compressed = public.to_encoded_point(true);
    let kid = b64.encode(Sha256::digest(compressed.as_bytes()));

    Jwk {
        kty: "EC".to_owned(),
        crv: "secp256k1".to_owned(),
        x: b64.encode(x),
        y: b64.encode(y),
        kid,
    }
}

/// Picks the document's first authentication method.
///
/// The reference may be a full `<did>#<fragment>` URI or a bare fragment;
/// either way the bare fragment is returned alongside the resolved entry.
///
/// # Errors
///
/// Returns [`AuthError::VerificationMethodNotFound`] when the document lists
/// no authentication methods or the referenced method does not exist.
pub fn select_authentication_method(
    document: &DidDocument,
) -> Result<(&VerificationMethodEntry, String)> {
    let reference = document.authentication.first().ok_or_else(|| {
        AuthError::VerificationMethodNotFound("document has no authentication methods".to_owned())
    })?;

    let fragment = reference
        .split_once('#')
        .map(|(_, fragment)| fragment)
        .unwrap_or(reference);

    let entry = method_for_fragment(document, fragment)?;
    Ok((entry, fragment.to_owned()))
}

/// Looks up the verification method `<document.id>#<fragment>`.
///
/// # Errors
///
/// Returns [`AuthError::VerificationMethodNotFound`] for an empty fragment or
/// when no entry matches.
pub fn method_for_fragment<'a>(
    document: &'a DidDocument,
    fragment: &str,
) -> Result<&'a VerificationMethodEntry> {
    if fragment.is_empty() {
        return Err(AuthError::VerificationMethodNotFound(
            "verification method fragment cannot be empty".to_owned(),
        ));
    }

    let want = format!("{}#{fragment}", document.id);
    document
        .verification_method
        .iter()
        .find(|method| method.id == want)
        .ok_or_else(|| AuthError::VerificationMethodNotFound(fragment.to_owned()))
}

fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() {
        return Err(AuthError::InvalidHostname("hostname cannot be empty".to_owned()));
    }
    if hostname.parse::<IpAddr>().is_ok() {
        return Err(AuthError::InvalidHostname("hostname cannot be an IP address".to_owned()));
    }
    Ok(())
}
