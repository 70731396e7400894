//! Transaction journal for reporting.
//!
//! This module provides the `TransactionLedger`, an in-memory index of
//! purchase attempts mirrored to a JSON journal on disk after every change.
//! The journal is a convenience for reporting: a failed write is logged and
//! the in-memory state stays authoritative for the running process.
//! Filtered listings can also be exported as CSV for spreadsheets.

mod export;
pub mod journal;
pub mod store;

pub use journal::Journal;
pub use store::{Completion, TransactionLedger};
