use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A bearer token together with the instant it stops being usable.
///
/// The two fields only ever change together: the manager replaces the whole
/// value, so a reader can never pair a new token with an old expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Issue a credential valid for `ttl` starting at `issued_at`. An expiry
    /// past the representable range is clamped to the latest instant.
    pub fn issued(token: impl Into<String>, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(token, expires_at)
    }

    /// A credential is usable while its expiry is strictly in the future.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}
