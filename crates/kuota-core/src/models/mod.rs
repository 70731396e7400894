//! Data models for vendor payloads and local bookkeeping.
//!
//! - `VendorEnvelope` and the package/OTP/purchase payloads returned by the vendor
//! - `TransactionRecord` and the aggregate stats derived from the ledger
//! - `RequestMetric`, `ResponseTimeStats`, `SecurityThreat` for monitoring

pub mod metrics;
pub mod transaction;
pub mod vendor;

pub use metrics::{MonitoringSnapshot, RequestMetric, ResponseTimeStats, SecurityThreat, ThreatSeverity};
pub use transaction::{
    DailyStats, SourceStats, SystemStats, TransactionFilter, TransactionRecord, TransactionStatus,
};
pub use vendor::{
    OtpLoginData, OtpRequestData, Package, PackageSearch, PaymentMethod, PriceEntry, PurchaseData,
    PurchaseRequest, VendorEnvelope,
};
