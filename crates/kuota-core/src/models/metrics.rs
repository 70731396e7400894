use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    pub started_at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    /// `None` when the request never got a response
    pub status_code: Option<u16>,
    pub response_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl RequestMetric {
    pub fn is_error(&self) -> bool {
        self.status_code.map_or(true, |s| s >= 500)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub average_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityThreat {
    pub source: String,
    pub kind: String,
    pub severity: ThreatSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

/// Aggregate view of the sampler, suitable for printing as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub response_time: ResponseTimeStats,
    pub total_requests: u64,
    pub total_errors: u64,
    pub unauthorized: u64,
    pub error_rate: f64,
    pub throughput_rps: f64,
    pub uptime_seconds: f64,
    pub recent_threats: Vec<SecurityThreat>,
    pub timestamp: DateTime<Utc>,
}
