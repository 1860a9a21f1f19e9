//! Signature suites for DID document verification methods.
//!
//! The `verificationMethod` entries of a document are open-ended; this
//! registry maps known `type` strings to suite constructors. Adding a new
//! suite means registering one more entry; the verifier state machine does
//! not change.

use base64::Engine;
use k256::elliptic_curve::sec1::{EncodedPoint, FromEncodedPoint};
use k256::{FieldBytes, PublicKey, Secp256k1};

use crate::crypto::{self, CURVE_BYTE_SIZE};
use crate::did::{Jwk, METHOD_TYPE_SECP256K1, VerificationMethodEntry};
use crate::error::{AuthError, Result};
use crate::wba::codec::{decode_signature, signing_digest};

/// Verifies DID-WBA signatures for one verification method.
pub trait SignatureSuite: Send + Sync {
    /// Checks `signature` (wire form) over `content` (canonical payload).
    fn verify(&self, content: &[u8], signature: &str) -> bool;
}

type SuiteFactory = fn(&VerificationMethodEntry) -> Result<Box<dyn SignatureSuite>>;

/// Known method types and their suite constructors.
const SUITE_REGISTRY: &[(&str, SuiteFactory)] = &[(METHOD_TYPE_SECP256K1, new_secp256k1_suite)];

/// Instantiates the suite registered for the entry's `type`.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedVerificationMethod`] for an unregistered
/// type and [`AuthError::InvalidSignature`] when the entry's key material is
/// unusable.
pub fn create_suite(entry: &VerificationMethodEntry) -> Result<Box<dyn SignatureSuite>> {
    let factory = SUITE_REGISTRY
        .iter()
        .find(|(method_type, _)| *method_type == entry.method_type)
        .map(|(_, factory)| factory)
        .ok_or_else(|| AuthError::UnsupportedVerificationMethod(entry.method_type.clone()))?;

    factory(entry)
}

/// `EcdsaSecp256k1VerificationKey2019`: JWK-carried secp256k1 point, ECDSA
/// over the double-SHA-256 payload digest.
struct Secp256k1Suite {
    public_key: PublicKey,
}

impl SignatureSuite for Secp256k1Suite {
    fn verify(&self, content: &[u8], signature: &str) -> bool {
        let Ok(signature) = decode_signature(signature) else {
            return false;
        };
        crypto::verify_digest(&self.public_key, &signing_digest(content), &signature)
    }
}

fn new_secp256k1_suite(entry: &VerificationMethodEntry) -> Result<Box<dyn SignatureSuite>> {
    let jwk = entry
        .public_key_jwk
        .as_ref()
        .ok_or_else(|| AuthError::InvalidSignature("publicKeyJwk not found".to_owned()))?;

    Ok(Box::new(Secp256k1Suite { public_key: public_key_from_jwk(jwk)? }))
}

/// Reconstructs a secp256k1 point from JWK coordinates.
///
/// Requires `kty="EC"`, `crv="secp256k1"`, and exactly 32-byte coordinates;
/// fails when the resulting point is not on the curve.
///
/// # Errors
///
/// Returns [`AuthError::InvalidSignature`] describing the defect.
pub fn public_key_from_jwk(jwk: &Jwk) -> Result<PublicKey> {
    if jwk.kty != "EC" || jwk.crv != "secp256k1" {
        return Err(AuthError::InvalidSignature(format!(
            "unsupported JWK parameters for secp256k1: kty={}, crv={}",
            jwk.kty, jwk.crv
        )));
    }

    let x = decode_coordinate(&jwk.x, "x")?;
    let y = decode_coordinate(&jwk.y, "y")?;

    let point = EncodedPoint::<Secp256k1>::from_affine_coordinates(
        FieldBytes::from_slice(&x),
        FieldBytes::from_slice(&y),
        false,
    );

    Option::<PublicKey>::from(PublicKey::from_encoded_point(&point)).ok_or_else(|| {
        AuthError::InvalidSignature("public key is not on the secp256k1 curve".to_owned())
    })
}

fn decode_coordinate(value: &str, name: &str) -> Result<[u8; CURVE_BYTE_SIZE]> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| AuthError::InvalidSignature(format!("invalid JWK '{name}' coordinate: {e}")))?;

    bytes.as_slice().try_into().map_err(|_| {
        AuthError::InvalidSignature(format!(
            "invalid JWK '{name}' coordinate length: got {} want {CURVE_BYTE_SIZE}",
            bytes.len()
        ))
    })
}
