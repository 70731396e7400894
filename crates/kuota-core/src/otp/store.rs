use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::utils::normalize_phone;

/// Default lifetime of an OTP session
const OTP_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpSession {
    pub phone: String,
    pub auth_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtpSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OtpError {
    #[error("OTP session not found. Please request OTP first.")]
    NotFound,

    #[error("OTP session expired. Please request a new OTP.")]
    Expired,
}

pub struct OtpSessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, OtpSession>>,
}

impl Default for OtpSessionStore {
    fn default() -> Self {
        Self::new(Duration::minutes(OTP_TTL_MINUTES))
    }
}

impl OtpSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, OtpSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start (or restart) the session for `phone`.
    pub fn create(&self, phone: &str, auth_id: &str) -> OtpSession {
        let phone = normalize_phone(phone);
        let now = Utc::now();
        let session = OtpSession {
            phone: phone.clone(),
            auth_id: auth_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions().insert(phone, session.clone());
        debug!(phone = %session.phone, "OTP session created");
        session
    }

    /// Look up the live session for `phone`. An expired session is removed.
    pub fn get(&self, phone: &str) -> Result<OtpSession, OtpError> {
        let phone = normalize_phone(phone);
        let mut sessions = self.sessions();
        match sessions.get(&phone) {
            None => Err(OtpError::NotFound),
            Some(session) if session.is_expired() => {
                sessions.remove(&phone);
                Err(OtpError::Expired)
            }
            Some(session) => Ok(session.clone()),
        }
    }

    pub fn remove(&self, phone: &str) -> Option<OtpSession> {
        self.sessions().remove(&normalize_phone(phone))
    }

    /// Drop every expired session, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed = removed, "Swept expired OTP sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}
