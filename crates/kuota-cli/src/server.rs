//! HTTP API for `kuota serve`.
//!
//! Every route except `/api/health` requires the configured API key, sent
//! either as `X-API-Key` or as `Authorization: Bearer <key>`. Rejected
//! clients are counted and noted as threats in the request sampler, and
//! every request (rejected or not) is recorded as one sample.
//!
//! Responses use the same `{statusCode, message, success, data}` envelope
//! the vendor answers with; vendor envelopes are passed through as-is.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use kuota_core::api::ApiError;
use kuota_core::models::{
    DailyStats, Package, PackageSearch, PurchaseData, RequestMetric, TransactionFilter,
    TransactionRecord, VendorEnvelope,
};
use kuota_core::service::{PurchaseOrder, ServiceError};
use kuota_core::utils::mask_token;
use kuota_core::{PurchaseService, RequestSampler};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::{App, OTP_SWEEP_INTERVAL};

const API_KEY_HEADER: &str = "x-api-key";

/// Listing size when the client doesn't pass `limit`
const DEFAULT_LIST_LIMIT: usize = 100;

const DAILY_STATS_DAYS: u32 = 30;

/// Window served by `/api/monitoring/metrics/realtime`
const REALTIME_WINDOW_MINUTES: i64 = 10;

const RECENT_SAMPLE_LIMIT: usize = 100;

/// Source recorded for purchases made over HTTP without one
const HTTP_SOURCE: &str = "api_direct";

pub struct AppState {
    pub service: PurchaseService,
    pub sampler: Arc<RequestSampler>,
    pub api_key: String,
}

/// A failed request, rendered as an unsuccessful envelope.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized: Invalid API key or token")
    }

    fn internal(error: anyhow::Error) -> Self {
        warn!(error = %error, "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl From<ApiError> for HttpError {
    fn from(error: ApiError) -> Self {
        warn!(error = %error, "Vendor call failed");
        Self::new(StatusCode::BAD_GATEWAY, error.to_string())
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Otp(e) => Self::bad_request(e.to_string()),
            ServiceError::Api(e) => e.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = VendorEnvelope::<()> {
            status_code: self.status.as_u16(),
            message: self.message,
            success: false,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<VendorEnvelope<T>>, HttpError>;

fn ok<T>(message: &str, data: T) -> ApiResult<T> {
    Ok(Json(VendorEnvelope {
        status_code: StatusCode::OK.as_u16(),
        message: message.to_string(),
        success: true,
        data: Some(data),
    }))
}

fn require(field: &str, value: &str) -> Result<(), HttpError> {
    if value.trim().is_empty() {
        return Err(HttpError::bad_request(format!("{} is required", field)));
    }
    Ok(())
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/packages", get(list_packages))
        .route("/api/packages/search", post(search_packages))
        .route("/api/packages/stock", get(package_stock))
        .route("/api/otp/request", post(request_otp))
        .route("/api/otp/verify", post(verify_otp))
        .route("/api/purchase", post(purchase))
        .route("/api/card/status", post(card_status))
        .route("/api/card/packages", post(card_packages))
        .route("/api/balance", get(balance))
        .route("/api/payment-methods", get(payment_methods))
        .route("/api/transaction/check", post(check_transaction))
        .route("/api/transactions", get(list_transactions))
        .route("/api/transactions/:id", get(get_transaction))
        .route("/api/stats/daily", get(daily_stats))
        .route("/api/export/transactions", get(export_transactions))
        .route("/api/dashboard", get(dashboard))
        .route("/api/monitoring/metrics", get(monitoring_metrics))
        .route("/api/monitoring/metrics/realtime", get(monitoring_realtime))
        .route("/api/monitoring/security", get(monitoring_security))
        .route("/api/monitoring/uptime", get(monitoring_uptime))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_api_key));

    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .layer(middleware::from_fn_with_state(Arc::clone(&state), record_request))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the API until Ctrl-C.
pub async fn serve(app: App, bind_address: &str, api_key: String) -> Result<()> {
    let (service, sampler) = app.into_parts();
    let sweeper = Arc::clone(service.otp_sessions()).spawn_sweeper(OTP_SWEEP_INTERVAL);
    let state = Arc::new(AppState {
        service,
        sampler,
        api_key,
    });

    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!(address = %listener.local_addr()?, "kuota API listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    })
    .await?;

    sweeper.abort();
    info!("kuota API stopped");
    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Peer address, falling back to the first `X-Forwarded-For` hop when the
/// server was not started with connection info (tests).
fn client_addr(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

async fn require_api_key(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided {
        Some(key) if key == state.api_key => next.run(req).await,
        provided => {
            let client = client_addr(&req);
            // Never log the full key a client sent.
            warn!(
                client = %client,
                path = %req.uri().path(),
                key = %provided.map(mask_token).unwrap_or_else(|| "<none>".to_string()),
                "Rejected API request"
            );
            state.sampler.record_unauthorized(
                &client,
                format!("Invalid API key or token attempt from {}", client),
            );
            HttpError::unauthorized().into_response()
        }
    }
}

async fn record_request(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let started_at = Utc::now();
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let client = client_addr(&req);

    let response = next.run(req).await;

    state.sampler.record(RequestMetric {
        started_at,
        method,
        path,
        status_code: Some(response.status().as_u16()),
        response_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        client: Some(client),
    });
    response
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
}

async fn health() -> ApiResult<Health> {
    ok(
        "Service is healthy",
        Health {
            status: "ok",
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn list_packages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<VendorEnvelope<Vec<Package>>>, HttpError> {
    let mut envelope = state.service.vendor().package_list().await?;
    if let Some(ref mut packages) = envelope.data {
        packages.truncate(query.limit.unwrap_or(DEFAULT_LIST_LIMIT));
    }
    Ok(Json(envelope))
}

async fn search_packages(
    State(state): State<Arc<AppState>>,
    Json(search): Json<PackageSearch>,
) -> Result<Json<VendorEnvelope<Vec<Package>>>, HttpError> {
    Ok(Json(state.service.search_packages(&search).await?))
}

async fn package_stock(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VendorEnvelope<serde_json::Value>>, HttpError> {
    Ok(Json(state.service.vendor().stock().await?))
}

#[derive(Debug, Deserialize)]
struct PhoneRequest {
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct OtpCodeRequest {
    phone_number: String,
    otp_code: String,
}

async fn request_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PhoneRequest>,
) -> Result<Response, HttpError> {
    require("phone_number", &body.phone_number)?;
    Ok(Json(state.service.request_otp(&body.phone_number).await?).into_response())
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpCodeRequest>,
) -> Result<Response, HttpError> {
    require("phone_number", &body.phone_number)?;
    require("otp_code", &body.otp_code)?;
    let envelope = state
        .service
        .verify_otp(&body.phone_number, &body.otp_code)
        .await?;
    Ok(Json(envelope).into_response())
}

#[derive(Debug, Deserialize)]
struct PurchaseBody {
    phone_number: String,
    package_code: String,
    payment_method: String,
    access_token: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Serialize)]
struct PurchaseResult {
    transaction: TransactionRecord,
    purchase: Option<PurchaseData>,
}

async fn purchase(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PurchaseBody>,
) -> Result<Json<VendorEnvelope<PurchaseResult>>, HttpError> {
    require("phone_number", &body.phone_number)?;
    require("package_code", &body.package_code)?;
    require("payment_method", &body.payment_method)?;
    require("access_token", &body.access_token)?;

    let outcome = state
        .service
        .purchase(PurchaseOrder {
            phone: body.phone_number,
            package_code: body.package_code,
            payment_method: body.payment_method,
            access_token: body.access_token,
            source: body.source.or_else(|| Some(HTTP_SOURCE.to_string())),
        })
        .await?;

    Ok(Json(VendorEnvelope {
        status_code: outcome.envelope.status_code,
        message: outcome.envelope.message,
        success: outcome.envelope.success,
        data: Some(PurchaseResult {
            transaction: outcome.record,
            purchase: outcome.envelope.data,
        }),
    }))
}

async fn card_status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpCodeRequest>,
) -> Result<Json<VendorEnvelope<serde_json::Value>>, HttpError> {
    require("phone_number", &body.phone_number)?;
    require("otp_code", &body.otp_code)?;
    Ok(Json(
        state
            .service
            .card_status(&body.phone_number, &body.otp_code)
            .await?,
    ))
}

async fn card_packages(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OtpCodeRequest>,
) -> Result<Json<VendorEnvelope<serde_json::Value>>, HttpError> {
    require("phone_number", &body.phone_number)?;
    require("otp_code", &body.otp_code)?;
    Ok(Json(
        state
            .service
            .active_packages(&body.phone_number, &body.otp_code)
            .await?,
    ))
}

async fn balance(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VendorEnvelope<serde_json::Value>>, HttpError> {
    Ok(Json(state.service.vendor().balance().await?))
}

async fn payment_methods(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VendorEnvelope<serde_json::Value>>, HttpError> {
    Ok(Json(state.service.vendor().payment_methods().await?))
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    trx_id: String,
}

async fn check_transaction(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<VendorEnvelope<serde_json::Value>>, HttpError> {
    require("trx_id", &body.trx_id)?;
    Ok(Json(state.service.vendor().check_transaction(&body.trx_id).await?))
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(mut filter): Query<TransactionFilter>,
) -> ApiResult<Vec<TransactionRecord>> {
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));
    ok(
        "Transactions retrieved successfully",
        state.service.ledger().list(&filter),
    )
}

async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TransactionRecord> {
    match state.service.ledger().get(&id) {
        Some(tx) => ok("Transaction retrieved successfully", tx),
        None => Err(HttpError::new(
            StatusCode::NOT_FOUND,
            format!("Transaction {} not found", id),
        )),
    }
}

async fn daily_stats(State(state): State<Arc<AppState>>) -> ApiResult<Vec<DailyStats>> {
    ok(
        "Daily statistics retrieved successfully",
        state.service.ledger().daily_stats(DAILY_STATS_DAYS),
    )
}

async fn export_transactions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<TransactionFilter>,
) -> Result<Response, HttpError> {
    let mut body = Vec::new();
    state
        .service
        .ledger()
        .export_csv(&filter, &mut body)
        .map_err(HttpError::internal)?;

    let disposition = format!(
        "attachment; filename=transactions_{}.csv",
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<kuota_core::service::Dashboard> {
    ok("Dashboard data retrieved successfully", state.service.dashboard())
}

#[derive(Debug, Serialize)]
struct MetricsReport {
    #[serde(flatten)]
    snapshot: kuota_core::models::MonitoringSnapshot,
    recent_requests: Vec<RequestMetric>,
}

async fn monitoring_metrics(State(state): State<Arc<AppState>>) -> ApiResult<MetricsReport> {
    ok(
        "System metrics retrieved successfully",
        MetricsReport {
            snapshot: state.sampler.snapshot(),
            recent_requests: state.sampler.recent(RECENT_SAMPLE_LIMIT),
        },
    )
}

#[derive(Debug, Serialize)]
struct RealtimeReport {
    recent_requests: Vec<RequestMetric>,
    timestamp: DateTime<Utc>,
    window_minutes: i64,
}

async fn monitoring_realtime(State(state): State<Arc<AppState>>) -> ApiResult<RealtimeReport> {
    ok(
        "Realtime metrics retrieved successfully",
        RealtimeReport {
            recent_requests: state
                .sampler
                .realtime(chrono::Duration::minutes(REALTIME_WINDOW_MINUTES)),
            timestamp: Utc::now(),
            window_minutes: REALTIME_WINDOW_MINUTES,
        },
    )
}

#[derive(Debug, Serialize)]
struct SecurityReport {
    unauthorized: u64,
    threats: Vec<kuota_core::models::SecurityThreat>,
}

async fn monitoring_security(State(state): State<Arc<AppState>>) -> ApiResult<SecurityReport> {
    let snapshot = state.sampler.snapshot();
    ok(
        "Security metrics retrieved successfully",
        SecurityReport {
            unauthorized: snapshot.unauthorized,
            threats: snapshot.recent_threats,
        },
    )
}

#[derive(Debug, Serialize)]
struct Uptime {
    status: &'static str,
    uptime_seconds: f64,
    started_at: DateTime<Utc>,
    current_time: DateTime<Utc>,
    version: &'static str,
}

async fn monitoring_uptime(State(state): State<Arc<AppState>>) -> ApiResult<Uptime> {
    let uptime_seconds = state.sampler.snapshot().uptime_seconds;
    let now = Utc::now();
    let started_at = chrono::Duration::try_milliseconds((uptime_seconds * 1000.0) as i64)
        .and_then(|up| now.checked_sub_signed(up))
        .unwrap_or(now);
    ok(
        "Uptime status retrieved successfully",
        Uptime {
            status: "healthy",
            uptime_seconds,
            started_at,
            current_time: now,
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}
