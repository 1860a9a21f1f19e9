//! axum middleware installing DID-WBA authentication on a router.
//!
//! [`authenticate`] is the entry middleware: it reads the Authorization
//! header, verifies it for the request's host, and installs an
//! [`AuthContext`] into the request extensions. When a new access token was
//! minted, the response's Authorization header carries `Bearer <token>` so
//! clients can promote it. Failure kinds translate to HTTP status codes
//! here and nowhere else.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::{Extension, Router, middleware, routing::get};
//! use did_wba_auth::middleware::{authenticate, AuthContext, require_did};
//! use did_wba_auth::{MemoryNonceValidator, Verifier, VerifierConfig};
//!
//! async fn whoami(Extension(auth): Extension<AuthContext>) -> String {
//!     auth.did
//! }
//!
//! # fn build() -> Router {
//! let verifier = Arc::new(
//!     Verifier::new(VerifierConfig::default(), Arc::new(MemoryNonceValidator::default()))
//!         .expect("verifier configuration"),
//! );
//!
//! Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(middleware::from_fn(require_did))
//!     .layer(middleware::from_fn_with_state(verifier, authenticate))
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument};

use crate::error::AuthError;
use crate::wba::verifier::Verifier;

/// Authentication facts installed into the request extensions.
///
/// Handlers extract it with `axum::Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The authenticated DID.
    pub did: String,
    /// The access token minted for this request, when the DIDWba path ran.
    pub access_token: Option<String>,
}

/// Authenticates every request through the shared [`Verifier`].
///
/// Wire with `axum::middleware::from_fn_with_state(verifier, authenticate)`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn authenticate(
    State(verifier): State<Arc<Verifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    if authorization.is_empty() {
        return error_response(&AuthError::MissingAuthorization);
    }

    let domain = request_domain(&request);
    let verified = match verifier.verify(&authorization, &domain).await {
        Ok(verified) => verified,
        Err(err) => {
            debug!(domain, error = %err, "authentication rejected");
            return error_response(&err);
        }
    };

    let access_token = verified.access_token.clone();
    request.extensions_mut().insert(AuthContext {
        did: verified.did,
        access_token: access_token.clone(),
    });

    let mut response = next.run(request).await;
    if let Some(token) = access_token
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
    {
        response.headers_mut().insert(header::AUTHORIZATION, value);
    }
    response
}

/// Rejects requests that did not pass [`authenticate`] with 401.
///
/// Layer it *inside* (after) the auth middleware.
pub async fn require_did(request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthContext>().is_none() {
        return (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    }
    next.run(request).await
}

/// Rejects authenticated requests whose DID is not in the allow-set with
/// 403 (and unauthenticated ones with 401).
///
/// Wire with `axum::middleware::from_fn_with_state(allowed, require_specific_did)`
/// where `allowed: Arc<HashSet<String>>`.
pub async fn require_specific_did(
    State(allowed): State<Arc<HashSet<String>>>,
    request: Request,
    next: Next,
) -> Response {
    match request.extensions().get::<AuthContext>() {
        None => (StatusCode::UNAUTHORIZED, "authentication required").into_response(),
        Some(context) if !allowed.contains(&context.did) => {
            (StatusCode::FORBIDDEN, "access denied").into_response()
        }
        Some(_) => next.run(request).await,
    }
}

/// The domain a request was addressed to: the Host header, falling back to
/// the URI authority (HTTP/2 requests carry it there).
fn request_domain(request: &Request) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| request.uri().authority().map(ToString::to_string))
        .unwrap_or_default()
}

fn error_response(err: &AuthError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::routing::get;
    use axum::{Extension, Router, middleware};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::did::create_did_document;
    use crate::wba::codec::generate_auth_parts;
    use crate::wba::nonce::MemoryNonceValidator;
    use crate::wba::token::test_keys;
    use crate::wba::verifier::VerifierConfig;

    use async_trait::async_trait;

    struct StaticResolver(crate::did::DidDocument);

    #[async_trait]
    impl crate::did::resolver::DidResolver for StaticResolver {
        async fn resolve(&self, _did: &str) -> crate::error::Result<crate::did::DidDocument> {
            Ok(self.0.clone())
        }
    }

    async fn whoami(Extension(auth): Extension<AuthContext>) -> String {
        auth.did
    }

    fn app() -> (Router, crate::did::DidDocument, k256::SecretKey) {
        let (document, secret) = create_did_document("example.com", None, &[], None).unwrap();
        let verifier = Arc::new(
            Verifier::new(
                VerifierConfig {
                    jwt_private_key_pem: Some(test_keys::RSA_PRIVATE_PEM.to_owned()),
                    jwt_public_key_pem: Some(test_keys::RSA_PUBLIC_PEM.to_owned()),
                    ..VerifierConfig::default()
                },
                Arc::new(MemoryNonceValidator::default()),
            )
            .unwrap()
            .with_resolver(Arc::new(StaticResolver(document.clone()))),
        );

        let router = Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn_with_state(verifier, authenticate));
        (router, document, secret)
    }

    fn signed_request(document: &crate::did::DidDocument, secret: &k256::SecretKey) -> Request {
        let header = generate_auth_parts(secret, document, "example.com").unwrap().to_header();
        HttpRequest::builder()
            .uri("/whoami")
            .header(header::HOST, "example.com")
            .header(header::AUTHORIZATION, header)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn missing_authorization_is_401() {
        let (app, _, _) = app();
        let response = app
            .oneshot(HttpRequest::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authenticated_request_reaches_handler_with_context() {
        let (app, document, secret) = app();
        let response = app.oneshot(signed_request(&document, &secret)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bearer = response
            .headers()
            .get(header::AUTHORIZATION)
            .expect("response must expose the minted token")
            .to_str()
            .unwrap()
            .to_owned();
        assert!(bearer.starts_with("Bearer "));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"did:wba:example.com");
    }

    #[tokio::test]
    async fn bearer_requests_do_not_remint() {
        let (app, document, secret) = app();
        let response = app
            .clone()
            .oneshot(signed_request(&document, &secret))
            .await
            .unwrap();
        let bearer = response.headers()[header::AUTHORIZATION].to_str().unwrap().to_owned();

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .header(header::HOST, "example.com")
                    .header(header::AUTHORIZATION, &bearer)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers().get(header::AUTHORIZATION).is_none(),
            "no new token on the bearer path"
        );
    }

    #[tokio::test]
    async fn replay_is_rejected_with_401_and_message() {
        let (app, document, secret) = app();
        let header_value = generate_auth_parts(&secret, &document, "example.com")
            .unwrap()
            .to_header();
        let build = |value: &str| {
            HttpRequest::builder()
                .uri("/whoami")
                .header(header::HOST, "example.com")
                .header(header::AUTHORIZATION, value)
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(
            app.clone().oneshot(build(&header_value)).await.unwrap().status(),
            StatusCode::OK
        );

        let response = app.oneshot(build(&header_value)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"invalid or expired nonce");
    }

    #[tokio::test]
    async fn require_specific_did_filters() {
        let (document, secret) = create_did_document("example.com", None, &[], None).unwrap();
        let verifier = Arc::new(
            Verifier::new(
                VerifierConfig {
                    jwt_private_key_pem: Some(test_keys::RSA_PRIVATE_PEM.to_owned()),
                    ..VerifierConfig::default()
                },
                Arc::new(MemoryNonceValidator::default()),
            )
            .unwrap()
            .with_resolver(Arc::new(StaticResolver(document.clone()))),
        );
        let allowed: Arc<HashSet<String>> =
            Arc::new(["did:wba:someone-else.com".to_owned()].into());

        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn_with_state(allowed, require_specific_did))
            .layer(middleware::from_fn_with_state(verifier, authenticate));

        let response = app.oneshot(signed_request(&document, &secret)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn require_did_guards_unauthenticated_routes() {
        let app = Router::new()
            .route("/open", get(|| async { "ok" }))
            .layer(middleware::from_fn(require_did));

        let response = app
            .oneshot(HttpRequest::builder().uri("/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
