//! Shared bearer-token cache with single-flight refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::{Credential, SessionFile, SsoClient};
use crate::api::ApiError;
use crate::utils::mask_token;

/// Hands out a valid bearer token to every vendor call in the process.
///
/// Readers take the shared lock and return the cached token while it is
/// unexpired. A caller that finds the cache empty or stale takes the
/// exclusive lock and checks again before logging in, so a crowd of callers
/// racing on an expired token produces exactly one SSO round-trip.
///
/// The login runs in its own task that owns the write guard. If the caller
/// that started it goes away, the login still finishes and fills the cache
/// for whoever comes next.
pub struct CredentialManager {
    sso: SsoClient,
    ttl: Duration,
    state: Arc<RwLock<Option<Credential>>>,
    refreshes: Arc<AtomicU64>,
    session: Option<Arc<SessionFile>>,
}

impl CredentialManager {
    pub fn new(sso: SsoClient, ttl: Duration) -> Self {
        Self {
            sso,
            ttl,
            state: Arc::new(RwLock::new(None)),
            refreshes: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    /// Like [`CredentialManager::new`], but seeded from `session` and saving
    /// every refreshed token back to it. An unreadable session file is
    /// logged and treated as empty.
    pub fn with_session(sso: SsoClient, ttl: Duration, session: SessionFile) -> Self {
        let seed = match session.load() {
            Ok(seed) => seed,
            Err(e) => {
                warn!(path = %session.path().display(), error = %e, "Ignoring unreadable session file");
                None
            }
        };
        if let Some(ref cred) = seed {
            debug!(
                token = %mask_token(&cred.token),
                minutes_left = cred.minutes_until_expiry(),
                "Reusing saved bearer token"
            );
        }

        Self {
            state: Arc::new(RwLock::new(seed)),
            session: Some(Arc::new(session)),
            ..Self::new(sso, ttl)
        }
    }

    /// Return a token whose cached expiry is still in the future, logging in
    /// first if there is none.
    pub async fn acquire(&self) -> Result<String, ApiError> {
        {
            let guard = self.state.read().await;
            if let Some(cred) = guard.as_ref().filter(|c| !c.is_expired()) {
                return Ok(cred.token.clone());
            }
        }

        let mut guard = Arc::clone(&self.state).write_owned().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(cred) = guard.as_ref().filter(|c| !c.is_expired()) {
            debug!("Token refreshed by a concurrent caller");
            return Ok(cred.token.clone());
        }

        let sso = self.sso.clone();
        let ttl = self.ttl;
        let refreshes = Arc::clone(&self.refreshes);
        let session = self.session.clone();

        let refresh = tokio::spawn(async move {
            let started = Utc::now();
            let token = sso.login().await?;
            let cred = Credential::issued(token, started, ttl);
            info!(
                token = %mask_token(&cred.token),
                expires_at = %cred.expires_at,
                "Bearer token refreshed"
            );
            if let Some(session) = session {
                if let Err(e) = session.save(&cred) {
                    warn!(error = %e, "Failed to save session file");
                }
            }
            let token = cred.token.clone();
            *guard = Some(cred);
            refreshes.fetch_add(1, Ordering::Relaxed);
            Ok::<_, AuthError>(token)
        });

        match refresh.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(e)) => {
                warn!(error = %e, "Bearer token refresh failed");
                Err(ApiError::AuthFailure(e))
            }
            Err(e) => Err(ApiError::AuthFailure(AuthError::Interrupted(e.to_string()))),
        }
    }

    /// Drop the cached token so the next `acquire` logs in again.
    pub async fn invalidate(&self) {
        let mut guard = self.state.write().await;
        if guard.take().is_some() {
            debug!("Cached bearer token invalidated");
        }
        self.forget_session();
    }

    /// Drop the cached token only if it is still `rejected`.
    ///
    /// Several calls can be turned away with the same stale token. The first
    /// one clears it and the rest find a newer token already in place, which
    /// they keep. Returns whether the cache was cleared.
    pub async fn invalidate_if_current(&self, rejected: &str) -> bool {
        let mut guard = self.state.write().await;
        match guard.as_ref() {
            Some(cred) if cred.token == rejected => {
                *guard = None;
                debug!(token = %mask_token(rejected), "Rejected bearer token invalidated");
                self.forget_session();
                true
            }
            _ => false,
        }
    }

    /// Consistent copy of the cached token and its expiry.
    pub async fn snapshot(&self) -> Option<Credential> {
        self.state.read().await.clone()
    }

    /// Number of completed SSO logins since startup.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn forget_session(&self) {
        if let Some(ref session) = self.session {
            if let Err(e) = session.clear() {
                warn!(error = %e, "Failed to remove session file");
            }
        }
    }
}
