//! The OTP → purchase workflow.
//!
//! `PurchaseService` is what a front end talks to: it asks the vendor to
//! send an OTP, remembers the vendor's `auth_id` for that number, trades the
//! OTP for a subscriber access token, and journals every purchase attempt.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, VendorClient};
use crate::ledger::{Completion, TransactionLedger};
use crate::models::{
    OtpLoginData, OtpRequestData, Package, PackageSearch, PurchaseData, PurchaseRequest, SourceStats, SystemStats,
    TransactionRecord, TransactionStatus, VendorEnvelope,
};
use crate::otp::{OtpError, OtpSessionStore};
use crate::utils::phone_with_country_code;

/// Source recorded when the caller doesn't name one
const DEFAULT_SOURCE: &str = "api_direct";

/// Number of transactions shown on the dashboard
const DASHBOARD_RECENT_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone)]
pub struct PurchaseOrder {
    pub phone: String,
    pub package_code: String,
    pub payment_method: String,
    /// Subscriber access token from [`PurchaseService::verify_otp`]
    pub access_token: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub record: TransactionRecord,
    pub envelope: VendorEnvelope<PurchaseData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub stats: SystemStats,
    pub recent_transactions: Vec<TransactionRecord>,
    pub source_breakdown: Vec<SourceStats>,
}

pub struct PurchaseService {
    vendor: VendorClient,
    otp: Arc<OtpSessionStore>,
    ledger: Arc<TransactionLedger>,
}

impl PurchaseService {
    pub fn new(
        vendor: VendorClient,
        otp: Arc<OtpSessionStore>,
        ledger: Arc<TransactionLedger>,
    ) -> Self {
        Self { vendor, otp, ledger }
    }

    pub fn vendor(&self) -> &VendorClient {
        &self.vendor
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn otp_sessions(&self) -> &Arc<OtpSessionStore> {
        &self.otp
    }

    /// Have the vendor text an OTP to `phone` and remember its `auth_id`.
    pub async fn request_otp(&self, phone: &str) -> Result<VendorEnvelope<OtpRequestData>, ServiceError> {
        let envelope = self.vendor.request_otp(phone).await?;
        if let (true, Some(data)) = (envelope.success, envelope.data.as_ref()) {
            self.otp.create(phone, &data.auth_id);
            info!(phone = phone, "OTP requested");
        }
        Ok(envelope)
    }

    /// Trade the OTP the subscriber received for an access token.
    pub async fn verify_otp(&self, phone: &str, otp: &str) -> Result<VendorEnvelope<OtpLoginData>, ServiceError> {
        let session = self.otp.get(phone)?;
        Ok(self.vendor.login_otp(phone, &session.auth_id, otp).await?)
    }

    /// Access token the card endpoints expect: `<otp>:<auth_id>`.
    fn card_token(&self, phone: &str, otp: &str) -> Result<String, OtpError> {
        let session = self.otp.get(phone)?;
        Ok(format!("{}:{}", otp, session.auth_id))
    }

    pub async fn card_status(&self, phone: &str, otp: &str) -> Result<VendorEnvelope<Value>, ServiceError> {
        let token = self.card_token(phone, otp)?;
        Ok(self.vendor.card_status(&token).await?)
    }

    pub async fn active_packages(&self, phone: &str, otp: &str) -> Result<VendorEnvelope<Value>, ServiceError> {
        let token = self.card_token(phone, otp)?;
        Ok(self.vendor.active_packages(&token).await?)
    }

    /// Buy a package, journaling the attempt whatever the outcome.
    ///
    /// A transport or authentication failure marks the transaction failed
    /// and is returned as an error. A vendor refusal also marks it failed but
    /// comes back as `Ok` with the vendor's envelope.
    pub async fn purchase(&self, order: PurchaseOrder) -> Result<PurchaseOutcome, ServiceError> {
        let source = order
            .source
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE);
        let record = self.ledger.record(
            &order.phone,
            &order.package_code,
            "",
            &order.payment_method,
            source,
        );

        let request = PurchaseRequest {
            package_code: order.package_code.clone(),
            phone: phone_with_country_code(&order.phone),
            access_token: order.access_token.clone(),
            payment_method: order.payment_method.clone(),
        };

        let envelope = match self.vendor.purchase(&request).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Purchase call failed");
                self.ledger.update_status(
                    &record.id,
                    TransactionStatus::Failed,
                    Completion {
                        error_message: e.to_string(),
                        ..Completion::default()
                    },
                );
                return Err(e.into());
            }
        };

        if envelope.success {
            let amount = match self.vendor.price_of(&order.package_code).await {
                Ok(price) => price.unwrap_or(0),
                Err(e) => {
                    warn!(package_code = %order.package_code, error = %e, "Price lookup failed");
                    0
                }
            };
            let data = envelope.data.clone().unwrap_or_default();

            self.ledger.update_status(
                &record.id,
                TransactionStatus::Success,
                Completion {
                    trx_id: data.trx_id.clone(),
                    amount,
                    processing_fee: data.processing_fee,
                    ..Completion::default()
                },
            );
            if !data.package_name.is_empty() {
                self.ledger.update_package_name(&record.id, &data.package_name);
            }
            self.otp.remove(&order.phone);
            info!(id = %record.id, trx_id = %data.trx_id, amount = amount, "Purchase succeeded");
        } else {
            self.ledger.update_status(
                &record.id,
                TransactionStatus::Failed,
                Completion {
                    error_message: envelope.message.clone(),
                    ..Completion::default()
                },
            );
            info!(id = %record.id, message = %envelope.message, "Purchase refused by vendor");
        }

        let record = self.ledger.get(&record.id).unwrap_or(record);
        Ok(PurchaseOutcome { record, envelope })
    }

    /// The vendor's package list narrowed to `search`. A vendor refusal is
    /// passed through untouched.
    pub async fn search_packages(
        &self,
        search: &PackageSearch,
    ) -> Result<VendorEnvelope<Vec<Package>>, ServiceError> {
        let mut envelope = self.vendor.package_list().await?;
        envelope.data = envelope
            .data
            .map(|packages| packages.into_iter().filter(|p| search.matches(p)).collect());
        Ok(envelope)
    }

    pub fn dashboard(&self) -> Dashboard {
        Dashboard {
            stats: self.ledger.system_stats(),
            recent_transactions: self.ledger.recent(DASHBOARD_RECENT_LIMIT),
            source_breakdown: self.ledger.source_stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::{client_for, mount_sso};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_for(server: &MockServer) -> PurchaseService {
        PurchaseService::new(
            client_for(server),
            Arc::new(OtpSessionStore::default()),
            Arc::new(TransactionLedger::in_memory()),
        )
    }

    fn order(access_token: &str) -> PurchaseOrder {
        PurchaseOrder {
            phone: "0812-3456-789".to_string(),
            package_code: "XLC_10GB".to_string(),
            payment_method: "BALANCE".to_string(),
            access_token: access_token.to_string(),
            source: None,
        }
    }

    async fn mount_otp(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/limited/xl/request-otp.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "statusCode": 200, "message": "OTP sent", "success": true,
                "data": {"auth_id": "auth-42"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn otp_request_then_verify_uses_stored_auth_id() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        mount_otp(&server).await;

        Mock::given(method("POST"))
            .and(path("/limited/xl/request-login.json"))
            .and(body_json(serde_json::json!({
                "phone": "08123456789", "auth_id": "auth-42", "otp": "123456"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "data": {"access_token": "sub-token"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server);
        service.request_otp("08123456789").await.unwrap();
        assert_eq!(service.otp_sessions().len(), 1);

        let login = service.verify_otp("08123456789", "123456").await.unwrap();
        assert_eq!(login.data.unwrap().access_token, "sub-token");
    }

    #[tokio::test]
    async fn verify_without_session_fails_before_vendor_call() {
        let server = MockServer::start().await;
        let service = service_for(&server);

        let err = service.verify_otp("08123456789", "123456").await.unwrap_err();
        assert!(matches!(err, ServiceError::Otp(OtpError::NotFound)));
    }

    #[tokio::test]
    async fn failed_otp_request_stores_nothing() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        Mock::given(method("POST"))
            .and(path("/limited/xl/request-otp.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false, "message": "Nomor tidak valid", "data": null
            })))
            .mount(&server)
            .await;

        let service = service_for(&server);
        let envelope = service.request_otp("0800").await.unwrap();
        assert!(!envelope.success);
        assert!(service.otp_sessions().is_empty());
    }

    #[tokio::test]
    async fn successful_purchase_is_journaled() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        mount_otp(&server).await;

        Mock::given(method("POST"))
            .and(path("/limited/xl/beli-paket-otp.json"))
            .and(body_json(serde_json::json!({
                "package_code": "XLC_10GB",
                "phone": "628123456789",
                "access_token": "sub-token",
                "payment_method": "BALANCE"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "message": "ok",
                "data": {"trx_id": "TRX-1", "package_name": "Xtra Combo 10GB", "package_processing_fee": 1500}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/limited/xl/price-list-all.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [{"package_code": "XLC_10GB", "price": 25000}]
            })))
            .mount(&server)
            .await;

        let service = service_for(&server);
        service.request_otp("08123456789").await.unwrap();
        let outcome = service.purchase(order("sub-token")).await.unwrap();

        assert!(outcome.envelope.success);
        let tx = outcome.record;
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.trx_id, "TRX-1");
        assert_eq!(tx.amount, 25000);
        assert_eq!(tx.processing_fee, 1500);
        assert_eq!(tx.package_name, "Xtra Combo 10GB");
        assert_eq!(tx.source, "api_direct");
        assert!(service.otp_sessions().is_empty());
    }

    #[tokio::test]
    async fn refused_purchase_records_vendor_message() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        Mock::given(method("POST"))
            .and(path("/limited/xl/beli-paket-otp.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false, "message": "Saldo tidak cukup", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server);
        let outcome = service.purchase(order("sub-token")).await.unwrap();

        assert!(!outcome.envelope.success);
        assert_eq!(outcome.record.status, TransactionStatus::Failed);
        assert_eq!(outcome.record.error_message, "Saldo tidak cukup");
        assert_eq!(service.dashboard().stats.failed_transactions, 1);
    }

    #[tokio::test]
    async fn purchase_transport_error_marks_failed() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        Mock::given(method("POST"))
            .and(path("/limited/xl/beli-paket-otp.json"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let service = service_for(&server);
        let err = service.purchase(order("sub-token")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::Upstream { status: 502, .. })));

        let recent = service.ledger().recent(1);
        assert_eq!(recent[0].status, TransactionStatus::Failed);
        assert!(recent[0].error_message.contains("502"));
    }

    #[tokio::test]
    async fn card_status_builds_token_from_session() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        mount_otp(&server).await;
        Mock::given(method("POST"))
            .and(path("/limited/xl/status-kartu.json"))
            .and(body_json(serde_json::json!({"access_token": "654321:auth-42"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "data": {"active_until": "2026-12-31"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server);
        service.request_otp("08123456789").await.unwrap();
        let status = service.card_status("08123456789", "654321").await.unwrap();
        assert!(status.success);
    }

    #[tokio::test]
    async fn search_filters_vendor_package_list() {
        let server = MockServer::start().await;
        mount_sso(&server, &["bearer-1"]).await;
        Mock::given(method("GET"))
            .and(path("/limited/xl/package-list-all.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": [
                    {"package_code": "XLC_10GB", "package_name": "Xtra Combo 10GB", "package_harga_int": 25000,
                     "available_payment_methods": [{"payment_method": "BALANCE"}]},
                    {"package_code": "XLC_50GB", "package_name": "Xtra Combo 50GB", "package_harga_int": 90000,
                     "available_payment_methods": [{"payment_method": "BALANCE"}]},
                    {"package_code": "EDU_5GB", "package_name": "Edukasi 5GB", "package_harga_int": 10000,
                     "available_payment_methods": [{"payment_method": "DANA"}]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(&server);
        let found = service
            .search_packages(&PackageSearch {
                query: "combo".to_string(),
                payment_method: "balance".to_string(),
                max_price: 50000,
                ..PackageSearch::default()
            })
            .await
            .unwrap()
            .into_result()
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].package_code, "XLC_10GB");
    }
}
