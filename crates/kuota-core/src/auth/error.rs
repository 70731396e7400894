use thiserror::Error;

use crate::utils::truncate_body;

/// Which leg of the SSO login failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    SessionToken,
    Login,
}

impl std::fmt::Display for LoginStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginStep::SessionToken => write!(f, "session token request"),
            LoginStep::Login => write!(f, "account login"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{step} failed with status {status}: {body}")]
    Upstream {
        step: LoginStep,
        status: u16,
        body: String,
    },

    #[error("{step} rejected: {message}")]
    Rejected { step: LoginStep, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Refresh task did not complete: {0}")]
    Interrupted(String),
}

impl AuthError {
    pub fn from_status(step: LoginStep, status: reqwest::StatusCode, body: &str) -> Self {
        AuthError::Upstream {
            step,
            status: status.as_u16(),
            body: truncate_body(body),
        }
    }
}
