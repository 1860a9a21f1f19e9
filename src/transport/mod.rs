//! Auth-injecting HTTP client.
//!
//! [`AuthClient`] wraps a [`reqwest::Client`]: every outbound request gets
//! an Authorization value from the [`Authenticator`], a 401 answer triggers
//! one forced re-authentication and retry, and successful responses feed
//! bearer tokens back into the per-domain cache.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::{debug, instrument, warn};

use crate::error::{AuthError, Result};
use crate::wba::authenticator::Authenticator;

static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("default HTTP client construction is infallible with these options")
});

/// Process-shared HTTP client (30 s total timeout, 10 s connect timeout).
///
/// Cloning a `reqwest::Client` shares its connection pool, so every default
/// transport and resolver in the process reuses the same connections.
#[must_use]
pub(crate) fn shared_client() -> reqwest::Client {
    SHARED_CLIENT.clone()
}

/// HTTP client with automatic DID-WBA authentication.
#[derive(Debug, Clone)]
pub struct AuthClient {
    inner: reqwest::Client,
    authenticator: Arc<Authenticator>,
}

impl AuthClient {
    /// Creates a client on the process-shared connection pool.
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { inner: shared_client(), authenticator }
    }

    /// Creates a client on a caller-provided `reqwest::Client` (custom
    /// timeouts, proxies, TLS configuration).
    #[must_use]
    pub fn with_client(authenticator: Arc<Authenticator>, client: reqwest::Client) -> Self {
        Self { inner: client, authenticator }
    }

    /// The authenticator backing this client.
    #[must_use]
    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    /// Builds a request for this client; finish with [`AuthClient::execute`].
    #[must_use]
    pub fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.inner.request(method, url)
    }

    /// Convenience GET.
    ///
    /// # Errors
    ///
    /// Same conditions as [`AuthClient::execute`].
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let request = self.inner.get(url).build()?;
        self.execute(request).await
    }

    /// Executes a request with authentication and bounded retry.
    ///
    /// The request is cloned up front so the retry can replay it; a request
    /// with a streaming body cannot be cloned, so a 401 on one is returned
    /// as-is. On 401 the cached credentials for the target's domain are
    /// cleared, a fresh DID-WBA header is forced, and the request is retried
    /// exactly once. On any 2xx response the Authorization response header
    /// is offered to the authenticator for bearer promotion.
    ///
    /// # Errors
    ///
    /// Propagates header-generation failures and transport errors.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let target = request.url().to_string();
        let retry_request = request.try_clone();

        let authorization = self.authenticator.generate_header(&target).await?;
        let response = self.send_with_authorization(request, &authorization).await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(self.finish(&target, response));
        }

        let Some(retry_request) = retry_request else {
            warn!(url = target, "401 on a non-replayable request, surfacing as-is");
            return Ok(response);
        };

        debug!(url = target, "401 received, re-authenticating once");
        self.authenticator.clear_token(&target);
        let authorization = self.authenticator.generate_header_force(&target).await?;
        let response = self.send_with_authorization(retry_request, &authorization).await?;
        Ok(self.finish(&target, response))
    }

    async fn send_with_authorization(
        &self,
        mut request: reqwest::Request,
        authorization: &str,
    ) -> Result<reqwest::Response> {
        let value = HeaderValue::from_str(authorization)
            .map_err(|e| AuthError::InvalidAuthHeader(format!("unusable header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(self.inner.execute(request).await?)
    }

    fn finish(&self, target: &str, response: reqwest::Response) -> reqwest::Response {
        if response.status().is_success() {
            self.authenticator.update_from_response(target, response.headers());
        }
        response
    }
}
