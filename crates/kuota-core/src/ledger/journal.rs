use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::TransactionRecord;

/// Journal file name in the data directory
const JOURNAL_FILE: &str = "transactions.json";

#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    records: Vec<TransactionRecord>,
    saved_at: DateTime<Utc>,
}

/// The on-disk copy of the ledger.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(Self {
            path: data_dir.join(JOURNAL_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every journaled record. A missing file is an empty journal.
    pub fn load(&self) -> Result<Vec<TransactionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read journal: {}", self.path.display()))?;
        let file: JournalFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse journal: {}", self.path.display()))?;

        debug!(count = file.records.len(), "Loaded transactions from journal");
        Ok(file.records)
    }

    /// Replace the journal with `records`. Written to a sibling temp file and
    /// renamed so readers never see a half-written journal.
    pub fn save(&self, records: &[TransactionRecord]) -> Result<()> {
        let file = JournalFile {
            records: records.to_vec(),
            saved_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write journal: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace journal: {}", self.path.display()))?;
        Ok(())
    }
}
