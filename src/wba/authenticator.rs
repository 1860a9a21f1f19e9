//! Client-side authenticator: credential loading and per-domain caches.
//!
//! One authenticator owns one identity (DID document + secp256k1 private
//! key) and serves Authorization values for any number of target domains.
//! Per domain it caches the last DID-WBA header and, once a server has
//! answered, the bearer token, which then wins until cleared. Concurrent
//! header generation for one domain is collapsed by a single-flight group,
//! so at most one credential load and one signature computation are in
//! flight per domain at any instant.
//!
//! The private key never leaves this type.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::crypto;
use crate::did::DidDocument;
use crate::error::{AuthError, Result};
use crate::wba::codec::{self, AuthParts, BEARER_PREFIX};
use crate::wba::singleflight;

struct Credentials {
    document: DidDocument,
    secret_key: k256::SecretKey,
}

enum CredentialSource {
    Memory,
    Paths { document: PathBuf, private_key: PathBuf },
}

#[derive(Default)]
struct DomainCache {
    tokens: HashMap<String, String>,
    headers: HashMap<String, String>,
}

/// Issues DID-WBA Authorization values for outbound requests.
pub struct Authenticator {
    source: CredentialSource,
    credentials: OnceCell<Credentials>,
    cache: Mutex<DomainCache>,
    flights: singleflight::Group,
}

impl Authenticator {
    /// Creates an authenticator from already-loaded material.
    #[must_use]
    pub fn from_material(document: DidDocument, secret_key: k256::SecretKey) -> Self {
        Self {
            source: CredentialSource::Memory,
            credentials: OnceCell::new_with(Some(Credentials { document, secret_key })),
            cache: Mutex::new(DomainCache::default()),
            flights: singleflight::Group::default(),
        }
    }

    /// Creates an authenticator that lazily loads a DID document (JSON) and
    /// a private key (PEM) from disk on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyLoad`] when either path is empty. The files
    /// themselves are only read on first use; call [`Authenticator::preload`]
    /// to surface loading problems at startup instead.
    pub fn from_paths(
        document_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let document = document_path.into();
        let private_key = private_key_path.into();
        if document.as_os_str().is_empty() {
            return Err(AuthError::KeyLoad("DID document path cannot be empty".to_owned()));
        }
        if private_key.as_os_str().is_empty() {
            return Err(AuthError::KeyLoad("private key path cannot be empty".to_owned()));
        }

        Ok(Self {
            source: CredentialSource::Paths { document, private_key },
            credentials: OnceCell::new(),
            cache: Mutex::new(DomainCache::default()),
            flights: singleflight::Group::default(),
        })
    }

    /// Loads credential material now rather than on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyLoad`] if reading or parsing fails.
    pub async fn preload(&self) -> Result<()> {
        self.credentials().await.map(|_| ())
    }

    /// Returns the authenticator's DID document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyLoad`] if lazy loading fails.
    pub async fn document(&self) -> Result<&DidDocument> {
        Ok(&self.credentials().await?.document)
    }

    /// Returns the Authorization value for a request to `target`.
    ///
    /// A cached bearer token for the target's domain wins; otherwise a
    /// cached DID-WBA header is reused; otherwise a fresh header is signed
    /// (deduplicated per domain) and cached.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidUrl`] for an unusable target (caches are
    /// left untouched) and propagates credential or signing failures,
    /// shared verbatim with every concurrent caller for the same domain.
    pub async fn generate_header(&self, target: &str) -> Result<String> {
        self.header(target, false).await
    }

    /// Like [`Authenticator::generate_header`], but always signs a fresh
    /// DID-WBA header, bypassing both caches.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Authenticator::generate_header`].
    pub async fn generate_header_force(&self, target: &str) -> Result<String> {
        self.header(target, true).await
    }

    #[instrument(skip(self))]
    async fn header(&self, target: &str, force: bool) -> Result<String> {
        let domain = domain_of(target)?;

        if !force && let Some(value) = self.cached_value(&domain) {
            return Ok(value);
        }

        self.flights
            .run(&domain, || {
                let domain = domain.clone();
                async move {
                    // A concurrent flight may have filled the cache while we
                    // queued for the slot.
                    if !force && let Some(value) = self.cached_value(&domain) {
                        return Ok(value);
                    }

                    let credentials = self.credentials().await?;
                    let parts = codec::generate_auth_parts(
                        &credentials.secret_key,
                        &credentials.document,
                        &domain,
                    )?;
                    let header = parts.to_header();

                    let mut cache = self.cache.lock().expect("domain cache lock poisoned");
                    cache.headers.insert(domain, header.clone());
                    Ok(header)
                }
            })
            .await
    }

    /// Produces a fresh JSON authentication payload for `target`.
    ///
    /// JSON payloads are never cached: every call signs anew.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Authenticator::generate_header`].
    pub async fn generate_json(&self, target: &str) -> Result<AuthParts> {
        let domain = domain_of(target)?;
        let credentials = self.credentials().await?;
        codec::generate_auth_parts(&credentials.secret_key, &credentials.document, &domain)
    }

    /// Promotes a bearer token out of a server response.
    ///
    /// When the response's Authorization header starts with `Bearer `, the
    /// remainder replaces any previous token cached for the target's domain.
    /// Anything else leaves the caches unchanged.
    pub fn update_from_response(&self, target: &str, headers: &reqwest::header::HeaderMap) {
        let Some(value) = headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return;
        };
        let Some(token) = value.strip_prefix(BEARER_PREFIX) else {
            return;
        };

        match domain_of(target) {
            Ok(domain) => {
                debug!(domain, "caching bearer token from response");
                let mut cache = self.cache.lock().expect("domain cache lock poisoned");
                cache.tokens.insert(domain, token.to_owned());
            }
            Err(err) => warn!(url = target, error = %err, "update token: invalid target"),
        }
    }

    /// Drops the cached bearer token and DID-WBA header for the target's
    /// domain.
    pub fn clear_token(&self, target: &str) {
        match domain_of(target) {
            Ok(domain) => {
                let mut cache = self.cache.lock().expect("domain cache lock poisoned");
                cache.tokens.remove(&domain);
                cache.headers.remove(&domain);
            }
            Err(err) => warn!(url = target, error = %err, "clear token: invalid target"),
        }
    }

    fn cached_value(&self, domain: &str) -> Option<String> {
        let cache = self.cache.lock().expect("domain cache lock poisoned");
        if let Some(token) = cache.tokens.get(domain) {
            debug!(domain, "using cached bearer token");
            return Some(format!("{BEARER_PREFIX}{token}"));
        }
        if let Some(header) = cache.headers.get(domain) {
            debug!(domain, "using cached DIDWba header");
            return Some(header.clone());
        }
        None
    }

    async fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .get_or_try_init(|| async {
                let CredentialSource::Paths { document, private_key } = &self.source else {
                    return Err(AuthError::KeyLoad("no credential source configured".to_owned()));
                };

                let document_bytes = tokio::fs::read(document).await.map_err(|e| {
                    AuthError::KeyLoad(format!("read DID document {}: {e}", document.display()))
                })?;
                let document: DidDocument =
                    serde_json::from_slice(&document_bytes).map_err(|e| {
                        AuthError::KeyLoad(format!("decode DID document: {e}"))
                    })?;

                let pem = tokio::fs::read_to_string(private_key).await.map_err(|e| {
                    AuthError::KeyLoad(format!(
                        "read private key {}: {e}",
                        private_key.display()
                    ))
                })?;
                let secret_key = crypto::private_key_from_pem(&pem)?;

                Ok(Credentials { document, secret_key })
            })
            .await
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

/// Extracts the URL authority the way it is signed: host, plus the port when
/// it is explicit and non-default.
fn domain_of(target: &str) -> Result<String> {
    let url = Url::parse(target).map_err(|e| AuthError::InvalidUrl(format!("{target}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| AuthError::InvalidUrl(format!("{target}: missing host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}
