use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            _ => Err(format!("unknown transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchase attempt as journaled by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub phone_number: String,
    pub package_code: String,
    #[serde(default)]
    pub package_name: String,
    pub payment_method: String,
    #[serde(default)]
    pub source: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub processing_fee: i64,
    #[serde(default)]
    pub trx_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_transactions: usize,
    pub successful_transactions: usize,
    pub failed_transactions: usize,
    pub total_revenue: i64,
    /// Percentage of all transactions that succeeded
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub count: usize,
    pub revenue: i64,
    pub success_rate: f64,
}

/// Selects ledger records for listing and export. Every set field must
/// match; dates compare against the UTC day a transaction was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub source: Option<String>,
    /// First day included
    pub from: Option<NaiveDate>,
    /// Last day included
    pub to: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &TransactionRecord) -> bool {
        let day = tx.created_at.date_naive();
        self.status.map_or(true, |s| tx.status == s)
            && self
                .source
                .as_deref()
                .filter(|s| !s.is_empty())
                .map_or(true, |s| tx.source == s)
            && self.from.map_or(true, |from| day >= from)
            && self.to.map_or(true, |to| day <= to)
    }
}

/// Totals for one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub revenue: i64,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            successful: 0,
            failed: 0,
            revenue: 0,
        }
    }
}
