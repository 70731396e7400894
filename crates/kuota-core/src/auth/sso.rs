//! Client for the SSO identity provider.
//!
//! Logging in takes two calls that must share one cookie session:
//!
//! 1. `GET /oauth/request_token` with the static client key in `access-key`
//!    returns a short-lived session token.
//! 2. `POST /user/login` with that session token in `access-token` and the
//!    account credentials in the body returns the long-lived bearer token.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{AuthError, LoginStep};
use crate::utils::truncate_body;

const SESSION_TOKEN_PATH: &str = "/oauth/request_token";
const LOGIN_PATH: &str = "/user/login";

const CLIENT_KEY_HEADER: &str = "access-key";
const SESSION_TOKEN_HEADER: &str = "access-token";

#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct LoginPayload<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    token: String,
    #[serde(default)]
    message: String,
}

/// Performs the SSO login flow. Clone is cheap; every login builds its own
/// cookie-bearing HTTP session so concurrent logins never share cookies.
#[derive(Clone)]
pub struct SsoClient {
    base_url: String,
    client_key: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl std::fmt::Debug for SsoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SsoClient {
    pub fn new(
        base_url: impl Into<String>,
        client_key: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_key: client_key.into(),
            username: username.into(),
            password: password.into(),
            timeout,
        }
    }

    /// Run both login steps and return the bearer token.
    pub async fn login(&self) -> Result<String, AuthError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()?;

        let session_token = self.request_session_token(&client).await?;
        debug!("SSO session token obtained");

        let token = self.exchange(&client, &session_token).await?;
        info!(username = %self.username, "SSO login succeeded");
        Ok(token)
    }

    async fn request_session_token(&self, client: &Client) -> Result<String, AuthError> {
        let url = format!("{}{}", self.base_url, SESSION_TOKEN_PATH);
        let response = client
            .get(&url)
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .header(CLIENT_KEY_HEADER, &self.client_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(AuthError::from_status(LoginStep::SessionToken, status, &body));
        }

        let parsed: SessionTokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::InvalidResponse(format!(
                "{}: {} ({})",
                LoginStep::SessionToken,
                e,
                truncate_body(&body)
            ))
        })?;

        if !parsed.success || parsed.access_token.is_empty() {
            return Err(AuthError::Rejected {
                step: LoginStep::SessionToken,
                message: parsed.message,
            });
        }
        Ok(parsed.access_token)
    }

    async fn exchange(&self, client: &Client, session_token: &str) -> Result<String, AuthError> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        let response = client
            .post(&url)
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .header(SESSION_TOKEN_HEADER, session_token)
            .json(&LoginPayload {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK {
            return Err(AuthError::from_status(LoginStep::Login, status, &body));
        }

        let parsed: LoginResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::InvalidResponse(format!(
                "{}: {} ({})",
                LoginStep::Login,
                e,
                truncate_body(&body)
            ))
        })?;

        if !parsed.success || parsed.token.is_empty() {
            return Err(AuthError::Rejected {
                step: LoginStep::Login,
                message: parsed.message,
            });
        }
        Ok(parsed.token)
    }
}
