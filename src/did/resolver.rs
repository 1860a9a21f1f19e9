//! DID document resolution over HTTPS.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::did::{DidDocument, did_to_url};
use crate::error::{AuthError, Result};

/// Resolves a DID to its document.
///
/// The verifier holds a `dyn DidResolver`, so deployments can swap in a
/// caching layer, a test double, or a non-HTTP source.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolves `did` to its document.
    ///
    /// # Errors
    ///
    /// Implementations report fetch and document failures as
    /// [`AuthError::DidResolution`]; a malformed DID surfaces as
    /// [`AuthError::InvalidDid`]. The verifier folds both into the
    /// resolution failure kind.
    async fn resolve(&self, did: &str) -> Result<DidDocument>;
}

/// Resolver that GETs the derived `.well-known` URL.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
}

impl HttpResolver {
    /// Creates a resolver on the process-shared HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self { client: crate::transport::shared_client() }
    }

    /// Creates a resolver on a caller-provided client (custom timeouts,
    /// proxies, TLS settings).
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DidResolver for HttpResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        let url = did_to_url(did)?;
        debug!(url, "resolving DID document");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::DidResolution(format!("failed to get DID document: {e}")))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AuthError::DidResolution(format!(
                "failed to get DID document: status code {}",
                response.status().as_u16()
            )));
        }

        let document: DidDocument = response
            .json()
            .await
            .map_err(|e| AuthError::DidResolution(format!("failed to decode DID document: {e}")))?;

        if document.id != did {
            return Err(AuthError::DidResolution("DID document ID mismatch".to_owned()));
        }

        Ok(document)
    }
}
