use thiserror::Error;

use crate::auth::AuthError;
use crate::utils::truncate_body;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The vendor answered with a status the caller can't use, including a
    /// `401` that outlived every retry.
    #[error("Upstream error (status {status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No usable bearer token could be obtained from the SSO provider.
    #[error("Authentication failed: {0}")]
    AuthFailure(#[source] AuthError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Upstream {
            status: status.as_u16(),
            body: truncate_body(body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Upstream { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
