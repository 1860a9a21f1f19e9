//! Server-side verification of Authorization headers.
//!
//! One [`Verifier`] handles both schemes: `Bearer` JWTs minted earlier by
//! the same verifier, and `DIDWba` headers, which run the full pipeline:
//! allow-list, header parse, timestamp window, nonce uniqueness, DID
//! resolution (cached), signature verification, and finally access-token
//! issuance.
//!
//! Construction requires a [`NonceValidator`]: replay defense is the one
//! guarantee the verifier cannot provide on its own, so its absence is a
//! configuration error by type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::did::DidDocument;
use crate::did::resolver::{DidResolver, HttpResolver};
use crate::error::{AuthError, Result};
use crate::wba::codec::{self, AuthParts, BEARER_PREFIX};
use crate::wba::nonce::NonceValidator;
use crate::wba::token;

/// Default DID-document cache lifetime.
pub const DEFAULT_DID_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
/// Default age beyond which a header timestamp is rejected.
pub const DEFAULT_TIMESTAMP_EXPIRATION: Duration = Duration::from_secs(5 * 60);
/// Default tolerance for timestamps ahead of the verifier's clock.
pub const DEFAULT_FUTURE_TOLERANCE: Duration = Duration::from_secs(60);

/// Injectable time source.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Verifier configuration. `Default` fills every field with the documented
/// defaults and no JWT keys, no allow-list.
#[derive(Clone)]
pub struct VerifierConfig {
    /// PEM private key for access-token issuance. Without it the DIDWba
    /// path fails with a configuration error after signature verification.
    pub jwt_private_key_pem: Option<String>,
    /// PEM public key for bearer-token verification. Without it the Bearer
    /// path fails with a configuration error.
    pub jwt_public_key_pem: Option<String>,
    /// JWT signing algorithm, RS256 by default.
    pub jwt_algorithm: Algorithm,
    /// Lifetime of issued access tokens.
    pub access_token_ttl: Duration,
    /// Maximum accepted header-timestamp age.
    pub timestamp_expiration: Duration,
    /// Accepted clock skew into the future.
    pub timestamp_future_tolerance: Duration,
    /// DID-document cache lifetime.
    pub did_cache_ttl: Duration,
    /// When non-empty, only these domains (case-insensitive) may
    /// authenticate via DIDWba.
    pub allowed_domains: Vec<String>,
}

impl std::fmt::Debug for VerifierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierConfig")
            .field("jwt_private_key_pem", &self.jwt_private_key_pem.as_ref().map(|_| "<pem>"))
            .field("jwt_public_key_pem", &self.jwt_public_key_pem.as_ref().map(|_| "<pem>"))
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("timestamp_expiration", &self.timestamp_expiration)
            .field("timestamp_future_tolerance", &self.timestamp_future_tolerance)
            .field("did_cache_ttl", &self.did_cache_ttl)
            .field("allowed_domains", &self.allowed_domains)
            .finish()
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            jwt_private_key_pem: None,
            jwt_public_key_pem: None,
            jwt_algorithm: token::DEFAULT_JWT_ALGORITHM,
            access_token_ttl: token::DEFAULT_ACCESS_TOKEN_TTL,
            timestamp_expiration: DEFAULT_TIMESTAMP_EXPIRATION,
            timestamp_future_tolerance: DEFAULT_FUTURE_TOLERANCE,
            did_cache_ttl: DEFAULT_DID_CACHE_TTL,
            allowed_domains: Vec::new(),
        }
    }
}

/// Successful verification result.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedAuth {
    /// The authenticated DID.
    pub did: String,
    /// Freshly minted access token (DIDWba path only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// `"bearer"` whenever `access_token` is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

struct CacheEntry {
    document: Arc<DidDocument>,
    expires_at: DateTime<Utc>,
}

/// Verifies Authorization headers and issues access tokens.
pub struct Verifier {
    jwt_encoding: Option<EncodingKey>,
    jwt_decoding: Option<DecodingKey>,
    jwt_algorithm: Algorithm,
    access_token_ttl: Duration,
    timestamp_expiration: Duration,
    timestamp_future_tolerance: Duration,
    did_cache_ttl: Duration,
    allowed_domains: Vec<String>,
    nonce_validator: Arc<dyn NonceValidator>,
    resolver: Arc<dyn DidResolver>,
    clock: Clock,
    did_cache: Mutex<HashMap<String, CacheEntry>>,
}

impl Verifier {
    /// Builds a verifier from configuration plus the mandatory nonce
    /// validator.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyLoad`] when a configured JWT PEM does not
    /// parse for the configured algorithm.
    pub fn new(config: VerifierConfig, nonce_validator: Arc<dyn NonceValidator>) -> Result<Self> {
        let jwt_encoding = config
            .jwt_private_key_pem
            .as_deref()
            .map(|pem| token::encoding_key_from_pem(pem.as_bytes(), config.jwt_algorithm))
            .transpose()?;
        let jwt_decoding = config
            .jwt_public_key_pem
            .as_deref()
            .map(|pem| token::decoding_key_from_pem(pem.as_bytes(), config.jwt_algorithm))
            .transpose()?;

        Ok(Self {
            jwt_encoding,
            jwt_decoding,
            jwt_algorithm: config.jwt_algorithm,
            access_token_ttl: config.access_token_ttl,
            timestamp_expiration: config.timestamp_expiration,
            timestamp_future_tolerance: config.timestamp_future_tolerance,
            did_cache_ttl: config.did_cache_ttl,
            allowed_domains: config.allowed_domains,
            nonce_validator,
            resolver: Arc::new(HttpResolver::new()),
            clock: Arc::new(Utc::now),
            did_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Installs pre-parsed JWT keys, replacing any PEM-derived ones.
    #[must_use]
    pub fn with_jwt_keys(
        mut self,
        encoding: Option<EncodingKey>,
        decoding: Option<DecodingKey>,
    ) -> Self {
        self.jwt_encoding = encoding;
        self.jwt_decoding = decoding;
        self
    }

    /// Replaces the DID resolver (caching layers, test doubles).
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn DidResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the time source; timestamp windows and cache TTLs follow it.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Verifies an Authorization value presented for `domain`.
    ///
    /// `Bearer` tokens short-circuit to JWT verification; everything else is
    /// treated as a `DIDWba` header and runs the full pipeline.
    ///
    /// # Errors
    ///
    /// Every failure maps to one taxonomy kind; see
    /// [`AuthError::status`] for the HTTP translation.
    #[instrument(skip(self, authorization))]
    pub async fn verify(&self, authorization: &str, domain: &str) -> Result<VerifiedAuth> {
        let authorization = authorization.trim();
        if authorization.is_empty() {
            return Err(AuthError::MissingAuthorization);
        }

        if let Some(bearer_token) = authorization.strip_prefix(BEARER_PREFIX) {
            return self.verify_bearer(bearer_token);
        }

        self.verify_did_wba(authorization, domain).await
    }

    fn verify_bearer(&self, bearer_token: &str) -> Result<VerifiedAuth> {
        let decoding = self
            .jwt_decoding
            .as_ref()
            .ok_or(AuthError::JwtConfigMissing("public key"))?;
        let did = token::verify_access_token(bearer_token, decoding, self.jwt_algorithm)?;
        debug!(did, "bearer token accepted");
        Ok(VerifiedAuth { did, access_token: None, token_type: None })
    }

    async fn verify_did_wba(&self, authorization: &str, domain: &str) -> Result<VerifiedAuth> {
        self.ensure_domain_allowed(domain)?;

        let parts = AuthParts::parse_header(authorization)?;
        self.check_timestamp(&parts.timestamp)?;

        match self.nonce_validator.validate(&parts.did, &parts.nonce).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(did = parts.did, "nonce rejected");
                return Err(AuthError::NonceReused);
            }
            Err(err) => return Err(AuthError::NonceValidatorFailure(err.to_string())),
        }

        let document = self.resolve_and_cache(&parts.did).await?;
        codec::verify_auth_parts(&parts, &document, domain)?;

        let encoding = self
            .jwt_encoding
            .as_ref()
            .ok_or(AuthError::JwtConfigMissing("private key"))?;
        let access_token = token::create_access_token(
            &parts.did,
            encoding,
            self.jwt_algorithm,
            self.access_token_ttl,
            (self.clock)(),
        )?;

        debug!(did = parts.did, "DIDWba exchange accepted");
        Ok(VerifiedAuth {
            did: parts.did,
            access_token: Some(access_token),
            token_type: Some("bearer".to_owned()),
        })
    }

    fn ensure_domain_allowed(&self, domain: &str) -> Result<()> {
        if self.allowed_domains.is_empty() {
            return Ok(());
        }
        if self
            .allowed_domains
            .iter()
            .any(|allowed| allowed.trim().eq_ignore_ascii_case(domain))
        {
            return Ok(());
        }
        Err(AuthError::DomainNotAllowed(domain.to_owned()))
    }

    fn check_timestamp(&self, raw: &str) -> Result<()> {
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| AuthError::TimestampInvalid(e.to_string()))?
            .with_timezone(&Utc);
        let now = (self.clock)();

        if timestamp > now + delta(self.timestamp_future_tolerance) {
            return Err(AuthError::TimestampFuture);
        }
        if now - timestamp >= delta(self.timestamp_expiration) {
            return Err(AuthError::TimestampExpired);
        }
        Ok(())
    }

    /// Double-checked cache around DID resolution. The mutex is never held
    /// across the network call; a concurrent miss may resolve twice, the
    /// re-check keeps the cache consistent. Expired entries are replaced on
    /// the access that finds them expired.
    async fn resolve_and_cache(&self, did: &str) -> Result<Arc<DidDocument>> {
        {
            let cache = self.did_cache.lock().expect("did cache lock poisoned");
            if let Some(entry) = cache.get(did)
                && (self.clock)() < entry.expires_at
            {
                return Ok(Arc::clone(&entry.document));
            }
        }

        let document = self.resolver.resolve(did).await.map_err(|err| match err {
            err @ AuthError::DidResolution(_) => err,
            other => AuthError::DidResolution(other.to_string()),
        })?;
        let document = Arc::new(document);

        let mut cache = self.did_cache.lock().expect("did cache lock poisoned");
        if let Some(entry) = cache.get(did)
            && (self.clock)() < entry.expires_at
        {
            return Ok(Arc::clone(&entry.document));
        }
        cache.insert(
            did.to_owned(),
            CacheEntry {
                document: Arc::clone(&document),
                expires_at: (self.clock)() + delta(self.did_cache_ttl),
            },
        );
        Ok(document)
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("allowed_domains", &self.allowed_domains)
            .finish_non_exhaustive()
    }
}

fn delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365_000))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::crypto;
    use crate::did::create_did_document;
    use crate::wba::codec::{build_payload, encode_signature, format_timestamp, signing_digest};
    use crate::wba::nonce::MemoryNonceValidator;
    use crate::wba::token::test_keys;

    struct StaticResolver {
        document: DidDocument,
        calls: AtomicUsize,
    }

    impl StaticResolver {
        fn new(document: DidDocument) -> Arc<Self> {
            Arc::new(Self { document, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl DidResolver for StaticResolver {
        async fn resolve(&self, _did: &str) -> Result<DidDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.document.clone())
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl DidResolver for FailingResolver {
        async fn resolve(&self, did: &str) -> Result<DidDocument> {
            Err(AuthError::DidResolution(format!("no route to {did}")))
        }
    }

    struct BrokenValidator;

    #[async_trait]
    impl NonceValidator for BrokenValidator {
        async fn validate(&self, _did: &str, _nonce: &str) -> Result<bool> {
            Err(AuthError::NonceValidatorFailure("store unreachable".to_owned()))
        }
    }

    struct Fixture {
        document: DidDocument,
        secret: k256::SecretKey,
        resolver: Arc<StaticResolver>,
    }

    fn fixture() -> Fixture {
        let (document, secret) = create_did_document("example.com", None, &[], None).unwrap();
        let resolver = StaticResolver::new(document.clone());
        Fixture { document, secret, resolver }
    }

    fn config_with_keys() -> VerifierConfig {
        VerifierConfig {
            jwt_private_key_pem: Some(test_keys::RSA_PRIVATE_PEM.to_owned()),
            jwt_public_key_pem: Some(test_keys::RSA_PUBLIC_PEM.to_owned()),
            ..VerifierConfig::default()
        }
    }

    fn verifier(fixture: &Fixture) -> Verifier {
        Verifier::new(config_with_keys(), Arc::new(MemoryNonceValidator::default()))
            .unwrap()
            .with_resolver(fixture.resolver.clone())
    }

    /// Signs a header for `domain` with an explicit timestamp.
    fn header_at(fixture: &Fixture, domain: &str, timestamp: DateTime<Utc>) -> String {
        let nonce = Uuid::new_v4().to_string();
        let rendered = format_timestamp(timestamp);
        let payload = build_payload(&nonce, &rendered, domain, &fixture.document.id).unwrap();
        let signature =
            crypto::sign_digest(&fixture.secret, &signing_digest(&payload)).unwrap();
        AuthParts {
            did: fixture.document.id.clone(),
            nonce,
            timestamp: rendered,
            verification_method: "key-1".to_owned(),
            signature: encode_signature(&signature),
        }
        .to_header()
    }

    #[tokio::test]
    async fn happy_path_mints_bearer_token() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let header = header_at(&fx, "example.com", Utc::now());

        let auth = verifier.verify(&header, "example.com").await.unwrap();
        assert_eq!(auth.did, "did:wba:example.com");
        assert_eq!(auth.token_type.as_deref(), Some("bearer"));
        let access_token = auth.access_token.expect("token must be minted");

        let bearer = verifier
            .verify(&format!("Bearer {access_token}"), "example.com")
            .await
            .unwrap();
        assert_eq!(bearer.did, "did:wba:example.com");
        assert!(bearer.access_token.is_none());
    }

    #[tokio::test]
    async fn empty_authorization_is_missing_auth() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let err = verifier.verify("", "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingAuthorization));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn malformed_header_is_invalid_auth() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let err = verifier.verify("DIDWba did=\"x\"", "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidAuthHeader(_)));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn replayed_header_is_rejected() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let header = header_at(&fx, "example.com", Utc::now());

        verifier.verify(&header, "example.com").await.unwrap();
        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::NonceReused));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn timestamp_window_boundaries() {
        let fx = fixture();
        let now = Utc::now();
        let expiration = chrono::Duration::from_std(DEFAULT_TIMESTAMP_EXPIRATION).unwrap();
        let tolerance = chrono::Duration::from_std(DEFAULT_FUTURE_TOLERANCE).unwrap();

        let verifier = verifier(&fx).with_clock(move || now);

        // Exactly `expiration` old: reject. One second younger: accept.
        let header = header_at(&fx, "example.com", now - expiration);
        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::TimestampExpired), "{err}");

        let header = header_at(&fx, "example.com", now - expiration + chrono::Duration::seconds(1));
        verifier.verify(&header, "example.com").await.unwrap();

        // Exactly at the future tolerance: accept. One second past: reject.
        let header = header_at(&fx, "example.com", now + tolerance);
        verifier.verify(&header, "example.com").await.unwrap();

        let header = header_at(&fx, "example.com", now + tolerance + chrono::Duration::seconds(1));
        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::TimestampFuture), "{err}");
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn stale_header_after_clock_advance() {
        let fx = fixture();
        let minted_at = Utc::now();
        let header = header_at(&fx, "example.com", minted_at);

        let later = minted_at
            + chrono::Duration::from_std(DEFAULT_TIMESTAMP_EXPIRATION).unwrap()
            + chrono::Duration::seconds(1);
        let verifier = verifier(&fx).with_clock(move || later);

        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::TimestampExpired));
    }

    #[tokio::test]
    async fn unparsable_timestamp_is_bad_request() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let header = "DIDWba did=\"did:wba:example.com\", nonce=\"n\", \
                      timestamp=\"yesterday\", verification_method=\"key-1\", \
                      signature=\"c2ln\"";
        let err = verifier.verify(header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::TimestampInvalid(_)));
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn allow_list_blocks_before_any_work() {
        let fx = fixture();
        let config = VerifierConfig {
            allowed_domains: vec!["example.com".to_owned()],
            ..config_with_keys()
        };
        let verifier = Verifier::new(config, Arc::new(MemoryNonceValidator::default()))
            .unwrap()
            .with_resolver(fx.resolver.clone());

        let header = header_at(&fx, "intruder.com", Utc::now());
        let err = verifier.verify(&header, "intruder.com").await.unwrap_err();
        assert!(matches!(err, AuthError::DomainNotAllowed(_)));
        assert_eq!(err.status(), 403);
        assert_eq!(fx.resolver.calls.load(Ordering::SeqCst), 0, "no resolution happened");

        // The allow-listed domain still works.
        let header = header_at(&fx, "example.com", Utc::now());
        verifier.verify(&header, "example.com").await.unwrap();
    }

    #[tokio::test]
    async fn wrong_service_domain_fails_signature() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let header = header_at(&fx, "example.com", Utc::now());

        let err = verifier.verify(&header, "other.com").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature(_)));
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn header_did_must_match_document() {
        let fx = fixture();
        let verifier = verifier(&fx);

        // Signed honestly, then the DID swapped out.
        let header = header_at(&fx, "example.com", Utc::now())
            .replace("did=\"did:wba:example.com\"", "did=\"did:wba:evil.com\"");
        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::DidMismatch));
    }

    #[tokio::test]
    async fn unknown_fragment_is_reported() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let header = header_at(&fx, "example.com", Utc::now())
            .replace("verification_method=\"key-1\"", "verification_method=\"key-9\"");

        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::VerificationMethodNotFound(_)));
    }

    #[tokio::test]
    async fn resolution_failure_is_401() {
        let fx = fixture();
        let verifier = verifier(&fx).with_resolver(Arc::new(FailingResolver));
        let header = header_at(&fx, "example.com", Utc::now());

        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::DidResolution(_)));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn broken_nonce_validator_is_500() {
        let fx = fixture();
        let verifier = Verifier::new(config_with_keys(), Arc::new(BrokenValidator))
            .unwrap()
            .with_resolver(fx.resolver.clone());
        let header = header_at(&fx, "example.com", Utc::now());

        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::NonceValidatorFailure(_)));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn missing_jwt_private_key_is_500_after_signature() {
        let fx = fixture();
        let config = VerifierConfig {
            jwt_public_key_pem: Some(test_keys::RSA_PUBLIC_PEM.to_owned()),
            ..VerifierConfig::default()
        };
        let verifier = Verifier::new(config, Arc::new(MemoryNonceValidator::default()))
            .unwrap()
            .with_resolver(fx.resolver.clone());
        let header = header_at(&fx, "example.com", Utc::now());

        let err = verifier.verify(&header, "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::JwtConfigMissing("private key")));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn bearer_without_public_key_is_500() {
        let fx = fixture();
        let verifier = Verifier::new(
            VerifierConfig::default(),
            Arc::new(MemoryNonceValidator::default()),
        )
        .unwrap()
        .with_resolver(fx.resolver.clone());

        let err = verifier.verify("Bearer abc", "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::JwtConfigMissing("public key")));
    }

    #[tokio::test]
    async fn invalid_bearer_token_is_401() {
        let fx = fixture();
        let verifier = verifier(&fx);
        let err = verifier.verify("Bearer not-a-jwt", "example.com").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn did_documents_are_cached_until_expiry() {
        let fx = fixture();
        let now = Utc::now();
        let clock_value = Arc::new(Mutex::new(now));
        let clock = Arc::clone(&clock_value);
        let verifier = verifier(&fx).with_clock(move || *clock.lock().unwrap());

        for _ in 0..3 {
            let header = header_at(&fx, "example.com", now);
            verifier.verify(&header, "example.com").await.unwrap();
        }
        assert_eq!(fx.resolver.calls.load(Ordering::SeqCst), 1, "warm cache resolves once");

        // Push the clock past the cache TTL; the next access re-resolves.
        *clock_value.lock().unwrap() =
            now + chrono::Duration::from_std(DEFAULT_DID_CACHE_TTL).unwrap()
                + chrono::Duration::seconds(1);
        let later = *clock_value.lock().unwrap();
        let header = header_at(&fx, "example.com", later);
        verifier.verify(&header, "example.com").await.unwrap();
        assert_eq!(fx.resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_cold_cache_converges() {
        let fx = fixture();
        let verifier = Arc::new(verifier(&fx));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let verifier = Arc::clone(&verifier);
            let header = header_at(&fx, "example.com", Utc::now());
            handles.push(tokio::spawn(async move {
                verifier.verify(&header, "example.com").await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let calls = fx.resolver.calls.load(Ordering::SeqCst);
        assert!((1..=8).contains(&calls), "at most one resolution per caller: {calls}");

        // The cache has converged: one more verify resolves nothing new.
        let header = header_at(&fx, "example.com", Utc::now());
        verifier.verify(&header, "example.com").await.unwrap();
        assert_eq!(fx.resolver.calls.load(Ordering::SeqCst), calls);
    }
}
