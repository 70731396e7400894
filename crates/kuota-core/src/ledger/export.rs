//! CSV rendering of ledger records.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::TransactionRecord;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column names, matching the `CsvRow` renames
const HEADERS: [&str; 13] = [
    "ID",
    "Phone Number",
    "Package Code",
    "Package Name",
    "Payment Method",
    "Source",
    "Status",
    "Amount",
    "Processing Fee",
    "TrxID",
    "Created At",
    "Completed At",
    "Error Message",
];

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Phone Number")]
    phone_number: &'a str,
    #[serde(rename = "Package Code")]
    package_code: &'a str,
    #[serde(rename = "Package Name")]
    package_name: &'a str,
    #[serde(rename = "Payment Method")]
    payment_method: &'a str,
    #[serde(rename = "Source")]
    source: &'a str,
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Amount")]
    amount: i64,
    #[serde(rename = "Processing Fee")]
    processing_fee: i64,
    #[serde(rename = "TrxID")]
    trx_id: &'a str,
    #[serde(rename = "Created At")]
    created_at: String,
    #[serde(rename = "Completed At")]
    completed_at: String,
    #[serde(rename = "Error Message")]
    error_message: &'a str,
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.format(TIME_FORMAT).to_string()
}

impl<'a> From<&'a TransactionRecord> for CsvRow<'a> {
    fn from(tx: &'a TransactionRecord) -> Self {
        Self {
            id: &tx.id,
            phone_number: &tx.phone_number,
            package_code: &tx.package_code,
            package_name: &tx.package_name,
            payment_method: &tx.payment_method,
            source: &tx.source,
            status: tx.status.as_str(),
            amount: tx.amount,
            processing_fee: tx.processing_fee,
            trx_id: &tx.trx_id,
            created_at: format_time(&tx.created_at),
            completed_at: tx.completed_at.as_ref().map(format_time).unwrap_or_default(),
            error_message: &tx.error_message,
        }
    }
}

/// Write `records` with a header row, in the order given.
pub fn write_csv<W: Write>(records: &[TransactionRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    if records.is_empty() {
        // serialize() only emits headers alongside the first row
        wtr.write_record(HEADERS)?;
    }
    for tx in records {
        wtr.serialize(CsvRow::from(tx))
            .with_context(|| format!("Failed to write CSV row for {}", tx.id))?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
