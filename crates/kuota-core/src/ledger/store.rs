use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use super::{export, Journal};
use crate::models::{
    DailyStats, SourceStats, SystemStats, TransactionFilter, TransactionRecord, TransactionStatus,
};

/// Source label for transactions recorded without one
const UNKNOWN_SOURCE: &str = "unknown";

/// Fields written when a purchase attempt finishes.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub trx_id: String,
    pub amount: i64,
    pub processing_fee: i64,
    pub error_message: String,
}

pub struct TransactionLedger {
    records: RwLock<HashMap<String, TransactionRecord>>,
    journal: Option<Journal>,
}

fn generate_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: u16 = rand::thread_rng().gen();
    format!("TXN_{}_{:04x}", nanos, suffix)
}

impl TransactionLedger {
    /// Open the ledger journaled in `data_dir`, loading any earlier records.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let journal = Journal::new(data_dir)?;
        let records: HashMap<String, TransactionRecord> = journal
            .load()?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        info!(count = records.len(), path = %journal.path().display(), "Transaction ledger opened");

        Ok(Self {
            records: RwLock::new(records),
            journal: Some(journal),
        })
    }

    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TransactionRecord>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TransactionRecord>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mirror the current records to disk while the write guard is held, so
    /// journal writes land in mutation order.
    fn persist(&self, records: &HashMap<String, TransactionRecord>) {
        if let Some(ref journal) = self.journal {
            let mut all: Vec<TransactionRecord> = records.values().cloned().collect();
            all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            if let Err(e) = journal.save(&all) {
                warn!(error = %e, "Failed to write transaction journal");
            }
        }
    }

    /// Start a pending transaction.
    pub fn record(
        &self,
        phone_number: &str,
        package_code: &str,
        package_name: &str,
        payment_method: &str,
        source: &str,
    ) -> TransactionRecord {
        let record = TransactionRecord {
            id: generate_id(),
            phone_number: phone_number.to_string(),
            package_code: package_code.to_string(),
            package_name: package_name.to_string(),
            payment_method: payment_method.to_string(),
            source: source.to_string(),
            status: TransactionStatus::Pending,
            amount: 0,
            processing_fee: 0,
            trx_id: String::new(),
            created_at: Utc::now(),
            completed_at: None,
            error_message: String::new(),
        };

        let mut records = self.write();
        records.insert(record.id.clone(), record.clone());
        self.persist(&records);
        record
    }

    /// Finish a transaction. Returns `false` if `id` is unknown.
    pub fn update_status(&self, id: &str, status: TransactionStatus, completion: Completion) -> bool {
        let mut records = self.write();
        let Some(record) = records.get_mut(id) else {
            warn!(id = id, "Status update for unknown transaction");
            return false;
        };

        record.status = status;
        record.trx_id = completion.trx_id;
        record.amount = completion.amount;
        record.processing_fee = completion.processing_fee;
        record.error_message = completion.error_message;
        record.completed_at = Some(Utc::now());

        self.persist(&records);
        true
    }

    pub fn update_package_name(&self, id: &str, package_name: &str) -> bool {
        let mut records = self.write();
        let Some(record) = records.get_mut(id) else {
            return false;
        };
        record.package_name = package_name.to_string();
        self.persist(&records);
        true
    }

    pub fn get(&self, id: &str) -> Option<TransactionRecord> {
        self.read().get(id).cloned()
    }

    /// Up to `limit` transactions, newest first
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        self.list(&TransactionFilter {
            limit: Some(limit),
            ..TransactionFilter::default()
        })
    }

    /// Transactions matching `filter`, newest first
    pub fn list(&self, filter: &TransactionFilter) -> Vec<TransactionRecord> {
        let mut matched: Vec<TransactionRecord> = self
            .read()
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Write the transactions matching `filter` as CSV. Returns the number of
    /// rows written.
    pub fn export_csv<W: Write>(&self, filter: &TransactionFilter, writer: W) -> Result<usize> {
        let records = self.list(filter);
        export::write_csv(&records, writer)?;
        debug!(rows = records.len(), "Exported transactions");
        Ok(records.len())
    }

    /// One entry per day for the last `days` days up to today, oldest first.
    /// Days without transactions are included with zero counts.
    pub fn daily_stats(&self, days: u32) -> Vec<DailyStats> {
        self.daily_stats_until(Utc::now().date_naive(), days)
    }

    fn daily_stats_until(&self, today: NaiveDate, days: u32) -> Vec<DailyStats> {
        let mut by_day: BTreeMap<NaiveDate, DailyStats> = (0..days)
            .filter_map(|back| today.checked_sub_days(Days::new(back.into())))
            .map(|date| (date, DailyStats::empty(date)))
            .collect();

        for tx in self.read().values() {
            let Some(day) = by_day.get_mut(&tx.created_at.date_naive()) else {
                continue;
            };
            day.total += 1;
            match tx.status {
                TransactionStatus::Success => {
                    day.successful += 1;
                    day.revenue += tx.amount;
                }
                TransactionStatus::Failed => day.failed += 1,
                TransactionStatus::Pending => {}
            }
        }

        by_day.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn system_stats(&self) -> SystemStats {
        let records = self.read();
        let total = records.len();
        let mut successful = 0;
        let mut failed = 0;
        let mut revenue = 0;

        for tx in records.values() {
            match tx.status {
                TransactionStatus::Success => {
                    successful += 1;
                    revenue += tx.amount;
                }
                TransactionStatus::Failed => failed += 1,
                TransactionStatus::Pending => {}
            }
        }

        SystemStats {
            total_transactions: total,
            successful_transactions: successful,
            failed_transactions: failed,
            total_revenue: revenue,
            success_rate: percentage(successful, total),
            last_updated: Utc::now(),
        }
    }

    /// Per-source counts, revenue and success rate, ordered by source name
    pub fn source_stats(&self) -> Vec<SourceStats> {
        // (count, successes, revenue)
        let mut by_source: BTreeMap<String, (usize, usize, i64)> = BTreeMap::new();

        for tx in self.read().values() {
            let source = if tx.source.is_empty() {
                UNKNOWN_SOURCE
            } else {
                tx.source.as_str()
            };
            let entry = by_source.entry(source.to_string()).or_default();
            entry.0 += 1;
            if tx.status == TransactionStatus::Success {
                entry.1 += 1;
                entry.2 += tx.amount;
            }
        }

        by_source
            .into_iter()
            .map(|(source, (count, successes, revenue))| SourceStats {
                source,
                count,
                revenue,
                success_rate: percentage(successes, count),
            })
            .collect()
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn succeed(ledger: &TransactionLedger, id: &str, amount: i64) {
        assert!(ledger.update_status(
            id,
            TransactionStatus::Success,
            Completion {
                trx_id: format!("TRX-{}", id),
                amount,
                processing_fee: 500,
                ..Completion::default()
            },
        ));
    }

    fn fail(ledger: &TransactionLedger, id: &str) {
        assert!(ledger.update_status(
            id,
            TransactionStatus::Failed,
            Completion {
                error_message: "stok habis".to_string(),
                ..Completion::default()
            },
        ));
    }

    #[test]
    fn test_record_starts_pending() {
        let ledger = TransactionLedger::in_memory();
        let tx = ledger.record("08123456789", "XLC_10GB", "", "BALANCE", "cli");

        assert!(tx.id.starts_with("TXN_"));
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.completed_at.is_none());
        assert_eq!(ledger.get(&tx.id), Some(tx));
    }

    #[test]
    fn test_ids_are_unique() {
        let ledger = TransactionLedger::in_memory();
        let a = ledger.record("0811", "A", "", "BALANCE", "cli");
        let b = ledger.record("0811", "A", "", "BALANCE", "cli");
        assert_ne!(a.id, b.id);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_update_status_sets_completion() {
        let ledger = TransactionLedger::in_memory();
        let tx = ledger.record("08123456789", "XLC_10GB", "", "BALANCE", "cli");
        succeed(&ledger, &tx.id, 25000);

        let updated = ledger.get(&tx.id).unwrap();
        assert_eq!(updated.status, TransactionStatus::Success);
        assert_eq!(updated.amount, 25000);
        assert_eq!(updated.processing_fee, 500);
        assert!(updated.completed_at.is_some());

        assert!(!ledger.update_status("missing", TransactionStatus::Failed, Completion::default()));
        assert!(!ledger.update_package_name("missing", "x"));
    }

    #[test]
    fn test_recent_is_newest_first() {
        let ledger = TransactionLedger::in_memory();
        let first = ledger.record("0811", "A", "", "BALANCE", "cli");
        let second = ledger.record("0822", "B", "", "BALANCE", "cli");
        {
            let mut records = ledger.write();
            records.get_mut(&first.id).unwrap().created_at = Utc::now() - Duration::minutes(5);
        }

        let recent = ledger.recent(10);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
        assert_eq!(ledger.recent(1).len(), 1);
    }

    #[test]
    fn test_list_applies_filter_and_limit() {
        let ledger = TransactionLedger::in_memory();
        let web_ok = ledger.record("0811", "A", "", "BALANCE", "web");
        let web_failed = ledger.record("0822", "B", "", "BALANCE", "web");
        let cli_ok = ledger.record("0833", "C", "", "BALANCE", "cli");
        succeed(&ledger, &web_ok.id, 10000);
        fail(&ledger, &web_failed.id);
        succeed(&ledger, &cli_ok.id, 5000);
        {
            let mut records = ledger.write();
            records.get_mut(&web_ok.id).unwrap().created_at = Utc::now() - Duration::days(3);
        }

        let web = ledger.list(&TransactionFilter {
            source: Some("web".to_string()),
            ..TransactionFilter::default()
        });
        assert_eq!(
            web.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec![web_failed.id.as_str(), web_ok.id.as_str()]
        );

        let successes = ledger.list(&TransactionFilter {
            status: Some(TransactionStatus::Success),
            limit: Some(1),
            ..TransactionFilter::default()
        });
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].id, cli_ok.id);

        let today = Utc::now().date_naive();
        let recent_days = ledger.list(&TransactionFilter {
            from: today.pred_opt(),
            ..TransactionFilter::default()
        });
        assert_eq!(recent_days.len(), 2);
        assert!(recent_days.iter().all(|t| t.id != web_ok.id));
    }

    #[test]
    fn test_daily_stats_fills_empty_days() {
        let ledger = TransactionLedger::in_memory();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let at = |date: NaiveDate| date.and_hms_opt(12, 0, 0).unwrap().and_utc();

        let a = ledger.record("0811", "A", "", "BALANCE", "web");
        let b = ledger.record("0822", "B", "", "BALANCE", "web");
        let c = ledger.record("0833", "C", "", "BALANCE", "web");
        let old = ledger.record("0844", "D", "", "BALANCE", "web");
        succeed(&ledger, &a.id, 25000);
        fail(&ledger, &b.id);
        succeed(&ledger, &c.id, 10000);
        {
            let mut records = ledger.write();
            records.get_mut(&a.id).unwrap().created_at = at(today);
            records.get_mut(&b.id).unwrap().created_at = at(today);
            records.get_mut(&c.id).unwrap().created_at = at(today - Days::new(2));
            records.get_mut(&old.id).unwrap().created_at = at(today - Days::new(30));
        }

        let stats = ledger.daily_stats_until(today, 30);
        assert_eq!(stats.len(), 30);
        assert_eq!(stats[0].date, today - Days::new(29));
        assert_eq!(stats[29].date, today);

        assert_eq!(
            stats[29],
            DailyStats {
                date: today,
                total: 2,
                successful: 1,
                failed: 1,
                revenue: 25000,
            }
        );
        assert_eq!(stats[27].revenue, 10000);
        assert_eq!(stats[28], DailyStats::empty(today - Days::new(1)));
        // The 31-day-old record falls outside the window.
        assert_eq!(stats.iter().map(|d| d.total).sum::<usize>(), 3);

        assert!(ledger.daily_stats_until(today, 0).is_empty());
    }

    #[test]
    fn test_system_stats() {
        let ledger = TransactionLedger::in_memory();
        let a = ledger.record("0811", "A", "", "BALANCE", "cli");
        let b = ledger.record("0822", "B", "", "BALANCE", "cli");
        let c = ledger.record("0833", "C", "", "BALANCE", "cli");
        ledger.record("0844", "D", "", "BALANCE", "cli");
        succeed(&ledger, &a.id, 25000);
        succeed(&ledger, &b.id, 15000);
        fail(&ledger, &c.id);

        let stats = ledger.system_stats();
        assert_eq!(stats.total_transactions, 4);
        assert_eq!(stats.successful_transactions, 2);
        assert_eq!(stats.failed_transactions, 1);
        assert_eq!(stats.total_revenue, 40000);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[test]
    fn test_source_stats_groups_unknown() {
        let ledger = TransactionLedger::in_memory();
        let a = ledger.record("0811", "A", "", "BALANCE", "web");
        ledger.record("0822", "B", "", "BALANCE", "web");
        let c = ledger.record("0833", "C", "", "BALANCE", "");
        succeed(&ledger, &a.id, 10000);
        succeed(&ledger, &c.id, 5000);

        let stats = ledger.source_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].source, "unknown");
        assert_eq!(stats[0].count, 1);
        assert_eq!(stats[0].success_rate, 100.0);
        assert_eq!(stats[1].source, "web");
        assert_eq!(stats[1].count, 2);
        assert_eq!(stats[1].revenue, 10000);
        assert_eq!(stats[1].success_rate, 50.0);
    }

    #[test]
    fn test_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let ledger = TransactionLedger::open(dir.path()).unwrap();
            let tx = ledger.record("08123456789", "XLC_10GB", "", "BALANCE", "cli");
            succeed(&ledger, &tx.id, 25000);
            ledger.update_package_name(&tx.id, "Xtra Combo 10GB");
            tx.id
        };

        let reopened = TransactionLedger::open(dir.path()).unwrap();
        let tx = reopened.get(&id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.package_name, "Xtra Combo 10GB");
        assert_eq!(reopened.system_stats().total_revenue, 25000);
    }
}
