//! API client for the data package vendor.
//!
//! `VendorClient::call` is the single way out to the vendor: it attaches the
//! shared bearer token, and when the vendor answers `401` it drops that token
//! and tries again with a fresh one. Nothing else is retried. Transport
//! failures and every non-`401` response go straight back to the caller.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::{header, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::CredentialManager;
use crate::config::Config;
use crate::models::{
    OtpLoginData, OtpRequestData, Package, PriceEntry, PurchaseData, PurchaseRequest,
    RequestMetric, VendorEnvelope,
};
use crate::monitoring::RequestSampler;
use crate::utils::truncate_body;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the bearer token on vendor calls
const VENDOR_TOKEN_HEADER: &str = "x-token";

const PACKAGE_LIST_PATH: &str = "/limited/xl/package-list-all.json";
const PRICE_LIST_PATH: &str = "/limited/xl/price-list-all.json";
const STOCK_PATH: &str = "/limited/xl/check-stock-package-global.json";
const REQUEST_OTP_PATH: &str = "/limited/xl/request-otp.json";
const LOGIN_OTP_PATH: &str = "/limited/xl/request-login.json";
const PURCHASE_PATH: &str = "/limited/xl/beli-paket-otp.json";
const CARD_STATUS_PATH: &str = "/limited/xl/status-kartu.json";
const ACTIVE_PACKAGES_PATH: &str = "/limited/xl/package-active-list.json";
const CHECK_TRANSACTION_PATH: &str = "/limited/xl/check-transaction.json";
const BALANCE_PATH: &str = "/wallet/balance.json";
const PAYMENT_METHODS_PATH: &str = "/wallet/payment-methods.json";

/// Vendor API client.
/// Clone is cheap - the HTTP client and credential manager are shared.
#[derive(Clone)]
pub struct VendorClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
    max_auth_retries: u32,
    sampler: Option<Arc<RequestSampler>>,
}

impl VendorClient {
    /// Client for `base_url` with the default timeout and retry ceiling.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<CredentialManager>,
    ) -> Result<Self, ApiError> {
        let config = Config {
            vendor_base_url: base_url.into(),
            ..Config::default()
        };
        Self::from_config(&config, credentials)
    }

    /// With the default ceiling a vendor that always answers 401 sees three
    /// attempts in total.
    pub fn from_config(config: &Config, credentials: Arc<CredentialManager>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.vendor_base_url.trim_end_matches('/').to_string(),
            credentials,
            max_auth_retries: config.max_auth_retries,
            sampler: None,
        })
    }

    /// Record one sample per attempt into `sampler`.
    pub fn with_sampler(mut self, sampler: Arc<RequestSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Execute one vendor call, refreshing the bearer token on `401`.
    ///
    /// Any response other than `401` is returned unmodified, including
    /// vendor business failures. Once the retry ceiling is reached the final
    /// `401` is reported as [`ApiError::Upstream`].
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;

        loop {
            let token = self.credentials.acquire().await?;

            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json")
                .header(VENDOR_TOKEN_HEADER, &token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let started_at = Utc::now();
            let started = Instant::now();
            let result = request.send().await;
            self.sample(&method, path, started_at, started, &result);

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(method = %method, path = path, error = %e, "Vendor request failed");
                    return Err(ApiError::Network(e));
                }
            };

            if response.status() != StatusCode::UNAUTHORIZED {
                debug!(method = %method, path = path, status = %response.status(), "Vendor responded");
                return Ok(response);
            }

            if retries >= self.max_auth_retries {
                let status = response.status();
                let text = response.text().await?;
                warn!(
                    method = %method,
                    path = path,
                    attempts = retries + 1,
                    "Vendor kept rejecting the bearer token"
                );
                return Err(ApiError::from_status(status, &text));
            }

            retries += 1;
            warn!(
                method = %method,
                path = path,
                retry = retries,
                max = self.max_auth_retries,
                "Received 401 from vendor, refreshing bearer token"
            );
            self.credentials.invalidate_if_current(&token).await;
        }
    }

    fn sample(
        &self,
        method: &Method,
        path: &str,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        result: &Result<Response, reqwest::Error>,
    ) {
        if let Some(ref sampler) = self.sampler {
            sampler.record(RequestMetric {
                started_at,
                method: method.to_string(),
                path: path.to_string(),
                status_code: result.as_ref().ok().map(|r| r.status().as_u16()),
                response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                client: None,
            });
        }
    }

    /// Read a response body and decode it, mapping non-success statuses to
    /// [`ApiError::Upstream`].
    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::from_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {} ({})",
                path,
                e,
                truncate_body(&text)
            ))
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.call(Method::GET, path, None).await?;
        Self::decode(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))?;
        let response = self.call(Method::POST, path, Some(&body)).await?;
        Self::decode(response, path).await
    }

    // ===== Catalog =====

    /// Fetch every package the vendor currently sells
    pub async fn package_list(&self) -> Result<VendorEnvelope<Vec<Package>>, ApiError> {
        self.get_json(PACKAGE_LIST_PATH).await
    }

    pub async fn price_list(&self) -> Result<VendorEnvelope<Vec<PriceEntry>>, ApiError> {
        let response = self.call(Method::POST, PRICE_LIST_PATH, None).await?;
        Self::decode(response, PRICE_LIST_PATH).await
    }

    /// Vendor price for one package code, `None` if the code isn't listed
    pub async fn price_of(&self, package_code: &str) -> Result<Option<i64>, ApiError> {
        let prices = self.price_list().await?;
        let price = prices
            .data
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.package_code == package_code)
            .map(|p| p.price);
        if price.is_none() {
            debug!(package_code = package_code, "Package price not found");
        }
        Ok(price)
    }

    pub async fn stock(&self) -> Result<VendorEnvelope<Value>, ApiError> {
        self.get_json(STOCK_PATH).await
    }

    // ===== Wallet =====

    pub async fn balance(&self) -> Result<VendorEnvelope<Value>, ApiError> {
        self.get_json(BALANCE_PATH).await
    }

    pub async fn payment_methods(&self) -> Result<VendorEnvelope<Value>, ApiError> {
        self.get_json(PAYMENT_METHODS_PATH).await
    }

    // ===== Subscriber =====

    /// Ask the carrier to text an OTP to `phone`
    pub async fn request_otp(&self, phone: &str) -> Result<VendorEnvelope<OtpRequestData>, ApiError> {
        self.post_json(REQUEST_OTP_PATH, &json!({ "phone": phone })).await
    }

    /// Trade an OTP for a subscriber access token
    pub async fn login_otp(
        &self,
        phone: &str,
        auth_id: &str,
        otp: &str,
    ) -> Result<VendorEnvelope<OtpLoginData>, ApiError> {
        self.post_json(
            LOGIN_OTP_PATH,
            &json!({ "phone": phone, "auth_id": auth_id, "otp": otp }),
        )
        .await
    }

    pub async fn purchase(&self, request: &PurchaseRequest) -> Result<VendorEnvelope<PurchaseData>, ApiError> {
        self.post_json(PURCHASE_PATH, request).await
    }

    pub async fn card_status(&self, access_token: &str) -> Result<VendorEnvelope<Value>, ApiError> {
        self.post_json(CARD_STATUS_PATH, &json!({ "access_token": access_token }))
            .await
    }

    pub async fn active_packages(&self, access_token: &str) -> Result<VendorEnvelope<Value>, ApiError> {
        self.post_json(ACTIVE_PACKAGES_PATH, &json!({ "access_token": access_token }))
            .await
    }

    pub async fn check_transaction(&self, trx_id: &str) -> Result<VendorEnvelope<Value>, ApiError> {
        self.post_json(CHECK_TRANSACTION_PATH, &json!({ "trx_id": trx_id }))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::SsoClient;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mount a working SSO login on `server` that hands out `tokens` in order,
    /// repeating the last one.
    pub(crate) async fn mount_sso(server: &MockServer, tokens: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/oauth/request_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "access_token": "session-123"
            })))
            .mount(server)
            .await;

        for (i, token) in tokens.iter().enumerate() {
            let mock = Mock::given(method("POST"))
                .and(path("/user/login"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "success": true,
                    "token": token
                })));
            if i + 1 < tokens.len() {
                mock.up_to_n_times(1).mount(server).await;
            } else {
                mock.mount(server).await;
            }
        }
    }

    pub(crate) fn client_for(server: &MockServer) -> VendorClient {
        let sso = SsoClient::new(
            server.uri(),
            "client-key",
            "reseller",
            "hunter2",
            std::time::Duration::from_secs(5),
        );
        let credentials = Arc::new(CredentialManager::new(sso, chrono::Duration::hours(8)));
        VendorClient::new(server.uri(), credentials).unwrap()
    }

    #[tokio::test]
    async fn attaches_bearer_token_header() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "bearer-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "statusCode": 200, "message": "ok", "success": true, "data": {"balance": 150000}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let balance = client.balance().await.unwrap();
        assert!(balance.success);
        assert_eq!(balance.data.unwrap()["balance"], 150000);
    }

    #[tokio::test]
    async fn retries_once_after_401_then_succeeds() {
        let server = MockServer::start().await;
        mount_sso(&server, &["stale", "fresh"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "data": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // One login for the first attempt, one after the invalidation.
        assert_eq!(client.credentials().refresh_count(), 2);
        assert_eq!(client.credentials().snapshot().await.unwrap().token, "fresh");
    }

    #[tokio::test]
    async fn concurrent_401s_on_same_token_share_one_relogin() {
        let server = MockServer::start().await;
        mount_sso(&server, &["stale", "fresh"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "data": {}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let (a, b) = tokio::join!(
            client.call(Method::GET, "/wallet/balance.json", None),
            client.call(Method::GET, "/wallet/balance.json", None),
        );

        assert_eq!(a.unwrap().status(), StatusCode::OK);
        assert_eq!(b.unwrap().status(), StatusCode::OK);
        assert_eq!(client.credentials().refresh_count(), 2);
    }

    #[tokio::test]
    async fn always_401_gives_three_attempts_then_upstream_error() {
        let server = MockServer::start().await;
        mount_sso(&server, &["t1", "t2", "t3"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap_err();

        match err {
            ApiError::Upstream { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "token revoked");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.credentials().refresh_count(), 3);
    }

    #[tokio::test]
    async fn configured_retry_ceiling_is_honored() {
        let server = MockServer::start().await;
        mount_sso(&server, &["t1"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            vendor_base_url: format!("{}/", server.uri()),
            max_auth_retries: 0,
            ..Config::default()
        };
        let credentials = client_for(&server).credentials().clone();
        let client = VendorClient::from_config(&config, credentials).unwrap();

        let err = client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn business_failure_is_returned_without_retry() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;

        let payload = serde_json::json!({
            "statusCode": 200, "message": "OTP salah", "success": false, "data": null
        });
        Mock::given(method("POST"))
            .and(path("/limited/xl/request-login.json"))
            .and(body_json(serde_json::json!({
                "phone": "08123456789", "auth_id": "auth-1", "otp": "000000"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let body = payload.clone();
        let response = client
            .call(Method::POST, "/limited/xl/request-login.json", Some(&serde_json::json!({
                "phone": "08123456789", "auth_id": "auth-1", "otp": "000000"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let returned: Value = response.json().await.unwrap();
        assert_eq!(returned, body);
        assert_eq!(client.credentials().refresh_count(), 1);
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .respond_with(ResponseTemplate::new(403).set_body_string("blocked"))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let err = client.balance().await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(client.credentials().snapshot().await.is_some());
    }

    #[tokio::test]
    async fn network_error_is_not_retried() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        let credentials = Arc::clone(client_for(&server).credentials());

        // Nothing listens on port 9 locally, so the connect fails.
        let client = VendorClient::new("http://127.0.0.1:9", credentials).unwrap();
        let err = client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(client.credentials().refresh_count(), 1);
    }

    #[tokio::test]
    async fn auth_failure_stops_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/request_token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthFailure(_)));
    }

    #[tokio::test]
    async fn price_of_finds_package() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;

        Mock::given(method("POST"))
            .and(path("/limited/xl/price-list-all.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [
                    {"package_code": "XLC_10GB", "package_name": "Xtra Combo", "price": 25000},
                    {"package_code": "XLC_20GB", "package_name": "Xtra Combo+", "price": 45000}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.price_of("XLC_20GB").await.unwrap(), Some(45000));
        assert_eq!(client.price_of("NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sampler_records_each_attempt() {
        let server = MockServer::start().await;
        mount_sso(&server, &["stale", "fresh"]).await;

        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wallet/balance.json"))
            .and(header("x-token", "fresh"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sampler = Arc::new(RequestSampler::new());
        let client = client_for(&server).with_sampler(Arc::clone(&sampler));
        client
            .call(Method::GET, "/wallet/balance.json", None)
            .await
            .unwrap();

        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.unauthorized, 1);
        assert_eq!(snapshot.total_errors, 0);
    }
}
