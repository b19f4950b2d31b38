//! Single-slot credential cache.
//!
//! Holds at most one [`Credential`] and decides between reuse and refresh.
//! The cache is the only state shared between callers that open sessions;
//! it is mutated only through [`CredentialCache::get`] and
//! [`CredentialCache::invalidate`].

use std::sync::Arc;

use parking_lot::RwLock;
use time::Duration;

use super::credential::{
    Clock, Credential, DEFAULT_SAFETY_MARGIN, IssuanceError, SystemClock, TokenRequest,
};
use super::issuer::TokenIssuer;

/// Explicitly owned credential cache, shared by handle (`Arc`).
pub struct CredentialCache {
    issuer: Arc<dyn TokenIssuer>,
    request: TokenRequest,
    safety_margin: Duration,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<Credential>>,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>, request: TokenRequest) -> Self {
        Self {
            issuer,
            request,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            clock: Arc::new(SystemClock),
            cached: RwLock::new(None),
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Return the cached credential when it is still usable, otherwise issue
    /// a new one.
    ///
    /// On failure the cache is left untouched.
    pub async fn get(&self, force_refresh: bool) -> Result<Credential, IssuanceError> {
        if !force_refresh && let Some(credential) = self.current() {
            tracing::debug!("Using cached credential {}", credential.redacted());
            return Ok(credential);
        }

        tracing::debug!(force_refresh, "Fetching new credential");
        let credential = self.issuer.issue(&self.request).await?;
        *self.cached.write() = Some(credential.clone());
        Ok(credential)
    }

    /// `get` for callers that only need "credential or nothing".
    pub async fn fetch_credential(&self, force_refresh: bool) -> Option<Credential> {
        match self.get(force_refresh).await {
            Ok(credential) => Some(credential),
            Err(e) => {
                tracing::error!("Error fetching credential: {}", e);
                None
            }
        }
    }

    /// Same expiry check `get` uses, without side effects.
    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    /// Drop the cached credential.
    ///
    /// An issuance already in flight is not affected and will still populate
    /// the cache when it completes.
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            tracing::debug!("Cached credential invalidated");
        }
    }

    fn current(&self) -> Option<Credential> {
        let now = self.clock.now();
        self.cached
            .read()
            .as_ref()
            .filter(|c| c.is_valid_at(now, self.safety_margin))
            .cloned()
    }
}
