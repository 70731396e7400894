//! Vendor API client module.
//!
//! This module provides the `VendorClient` for calling the data package
//! vendor. Every call carries the shared bearer token in the `x-token`
//! header; a `401` drops the token and the call is retried with a fresh one,
//! at most twice.

pub mod client;
pub mod error;

pub use client::VendorClient;
pub use error::ApiError;
pub use reqwest::Method;
