//! Core library for kuota.
//!
//! kuota resells mobile data packages through a third-party vendor API. The
//! vendor authenticates every call with a bearer token obtained from an SSO
//! provider; this crate owns that token, retries calls that fail because the
//! token went stale, and keeps the local bookkeeping around purchases:
//!
//! - [`auth`]: the shared [`CredentialManager`] and the two-step SSO login
//! - [`api`]: the retrying [`VendorClient`] and typed vendor operations
//! - [`otp`]: short-lived OTP sessions keyed by phone number
//! - [`ledger`]: the transaction journal used for reporting
//! - [`monitoring`]: a sliding window of request samples
//! - [`service`]: the OTP → purchase workflow tying the above together

pub mod api;
pub mod auth;
pub mod config;
pub mod ledger;
pub mod models;
pub mod monitoring;
pub mod otp;
pub mod service;
pub mod utils;

pub use api::{ApiError, VendorClient};
pub use auth::{Credential, CredentialManager, SessionFile, SsoClient};
pub use config::Config;
pub use ledger::TransactionLedger;
pub use monitoring::RequestSampler;
pub use otp::OtpSessionStore;
pub use service::PurchaseService;
