//! Replay defense: the nonce validator seam and its in-memory reference.
//!
//! The validator is the only component that guarantees replay defense, which
//! is why [`crate::wba::verifier::Verifier`] cannot be constructed without
//! one. Distributed deployments swap in a Redis- or database-backed
//! implementation of [`NonceValidator`]; the in-memory one here is for
//! single-process services and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Default sliding window for nonce uniqueness.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(6 * 60);

/// Decides whether a `(did, nonce)` pair has been seen before.
#[async_trait]
pub trait NonceValidator: Send + Sync {
    /// Returns `Ok(true)` for a fresh nonce, `Ok(false)` for a replay or
    /// otherwise invalid nonce, and `Err` only when the validator itself is
    /// unavailable; the verifier surfaces that as a 500.
    async fn validate(&self, did: &str, nonce: &str) -> Result<bool>;
}

/// In-memory sliding-window validator.
///
/// Entries are keyed `did:nonce`, so the same nonce under different DIDs
/// occupies separate key space. Expired entries are evicted inline on every
/// call; all map access is serialized under a single mutex.
#[derive(Debug)]
pub struct MemoryNonceValidator {
    used: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: chrono::Duration,
}

impl MemoryNonceValidator {
    /// Creates a validator whose nonces expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            used: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        }
    }
}

impl Default for MemoryNonceValidator {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL)
    }
}

#[async_trait]
impl NonceValidator for MemoryNonceValidator {
    async fn validate(&self, did: &str, nonce: &str) -> Result<bool> {
        let key = format!("{did}:{nonce}");
        let now = Utc::now();

        let mut used = self.used.lock().expect("nonce map lock poisoned");
        used.retain(|_, inserted_at| now - *inserted_at <= self.ttl);

        if used.contains_key(&key) {
            return Ok(false);
        }

        used.insert(key, now);
        Ok(true)
    }
}
