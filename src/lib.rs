//! DID-WBA authentication for agent-to-agent HTTP.
//!
//! Two agents that share no PKI and no identity provider authenticate each
//! other with `did:wba` identities resolvable over the public web. The
//! client signs a canonical payload with its secp256k1 key and sends it as a
//! `DIDWba` Authorization header; the server checks the timestamp window,
//! enforces nonce uniqueness, resolves the client's DID document from
//! `https://<domain>/.well-known/did.json`, verifies the signature, and
//! answers with a short-lived bearer JWT the client reuses on subsequent
//! requests to that domain.
//!
//! # Client
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use did_wba_auth::{AuthClient, Authenticator};
//!
//! # async fn example() -> did_wba_auth::Result<()> {
//! let authenticator = Arc::new(Authenticator::from_paths("did.json", "key.pem")?);
//! let client = AuthClient::new(authenticator);
//!
//! // First request signs a DIDWba header; the response's bearer token is
//! // cached and reused for every later request to this domain.
//! let response = client.get("https://service.example.com/tools").await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Server
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::{Router, middleware, routing::get};
//! use did_wba_auth::middleware::authenticate;
//! use did_wba_auth::{MemoryNonceValidator, Verifier, VerifierConfig};
//!
//! # fn build(jwt_private_pem: String, jwt_public_pem: String) -> Router {
//! let verifier = Arc::new(
//!     Verifier::new(
//!         VerifierConfig {
//!             jwt_private_key_pem: Some(jwt_private_pem),
//!             jwt_public_key_pem: Some(jwt_public_pem),
//!             ..VerifierConfig::default()
//!         },
//!         Arc::new(MemoryNonceValidator::default()),
//!     )
//!     .expect("verifier configuration"),
//! );
//!
//! Router::new()
//!     .route("/tools", get(|| async { "hello" }))
//!     .layer(middleware::from_fn_with_state(verifier, authenticate))
//! # }
//! ```
//!
//! # Module organization
//!
//! - [`crypto`]: secp256k1 keys, PEM serialization, prehash ECDSA
//! - [`did`]: `did:wba` identifiers, documents, resolution
//! - [`wba`]: the protocol itself (codec, authenticator, verifier, nonces, tokens)
//! - [`transport`]: auth-injecting HTTP client with bounded 401 retry
//! - [`middleware`]: axum integration for servers
//! - [`error`]: the failure taxonomy and its HTTP status mapping
//!
//! # Identity bootstrap
//!
//! [`did::create_did_document`] mints a document plus private key; publish
//! the document at your domain's `.well-known/did.json` and keep the PEM
//! from [`crypto::private_key_to_pem`] private.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod crypto;
pub mod did;
pub mod error;
pub mod middleware;
pub mod transport;
pub mod wba;

pub use error::{AuthError, Result};
pub use transport::AuthClient;
pub use wba::authenticator::Authenticator;
pub use wba::codec::AuthParts;
pub use wba::nonce::{MemoryNonceValidator, NonceValidator};
pub use wba::verifier::{VerifiedAuth, Verifier, VerifierConfig};
