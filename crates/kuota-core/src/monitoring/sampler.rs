use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::models::{
    MonitoringSnapshot, RequestMetric, ResponseTimeStats, SecurityThreat, ThreatSeverity,
};

/// Number of request samples kept in the sliding window
const SAMPLE_CAPACITY: usize = 1000;

/// Number of security notes kept
const THREAT_CAPACITY: usize = 100;

/// Responses slower than this are noted as a low-severity threat
const SLOW_RESPONSE_MS: f64 = 5000.0;

#[derive(Default)]
struct Counters {
    total: u64,
    errors: u64,
    unauthorized: u64,
}

pub struct RequestSampler {
    samples: Mutex<VecDeque<RequestMetric>>,
    threats: Mutex<VecDeque<SecurityThreat>>,
    counters: Mutex<Counters>,
    started: Instant,
}

impl Default for RequestSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a mutex, carrying on with the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RequestSampler {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(SAMPLE_CAPACITY)),
            threats: Mutex::new(VecDeque::with_capacity(THREAT_CAPACITY)),
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    pub fn record(&self, metric: RequestMetric) {
        {
            let mut counters = lock(&self.counters);
            counters.total += 1;
            if metric.is_error() {
                counters.errors += 1;
            }
        }

        if metric.response_time_ms > SLOW_RESPONSE_MS {
            self.log_threat(
                metric.client.as_deref().unwrap_or("vendor"),
                "slow_response",
                ThreatSeverity::Low,
                format!(
                    "Slow response time: {:.2}ms for {}",
                    metric.response_time_ms, metric.path
                ),
            );
        }

        let mut samples = lock(&self.samples);
        if samples.len() == SAMPLE_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(metric);
    }

    /// Note a client turned away for a missing or wrong API key.
    pub fn record_unauthorized(&self, client: &str, details: String) {
        lock(&self.counters).unauthorized += 1;
        self.log_threat(client, "unauthorized_access", ThreatSeverity::Medium, details);
    }

    pub fn log_threat(&self, source: &str, kind: &str, severity: ThreatSeverity, details: String) {
        warn!(source = source, kind = kind, severity = ?severity, "{}", details);

        let mut threats = lock(&self.threats);
        if threats.len() == THREAT_CAPACITY {
            threats.pop_front();
        }
        threats.push_back(SecurityThreat {
            source: source.to_string(),
            kind: kind.to_string(),
            severity,
            timestamp: Utc::now(),
            details,
        });
    }

    /// Average, extremes and nearest-rank p95/p99 over the window.
    pub fn response_time_stats(&self) -> ResponseTimeStats {
        let mut times: Vec<f64> = lock(&self.samples)
            .iter()
            .map(|m| m.response_time_ms)
            .collect();

        if times.is_empty() {
            return ResponseTimeStats::default();
        }

        times.sort_by(|a, b| a.total_cmp(b));
        let n = times.len();
        let at = |q: f64| times[((n as f64 * q) as usize).min(n - 1)];

        ResponseTimeStats {
            average_ms: times.iter().sum::<f64>() / n as f64,
            p95_ms: at(0.95),
            p99_ms: at(0.99),
            min_ms: times[0],
            max_ms: times[n - 1],
        }
    }

    /// Percentage of all recorded requests that failed
    pub fn error_rate(&self) -> f64 {
        let counters = lock(&self.counters);
        if counters.total == 0 {
            0.0
        } else {
            counters.errors as f64 / counters.total as f64 * 100.0
        }
    }

    /// Requests per second since the sampler was created
    pub fn throughput(&self) -> f64 {
        let uptime = self.started.elapsed().as_secs_f64();
        if uptime <= 0.0 {
            return 0.0;
        }
        lock(&self.counters).total as f64 / uptime
    }

    /// The last `n` samples, oldest first
    pub fn recent(&self, n: usize) -> Vec<RequestMetric> {
        let samples = lock(&self.samples);
        let skip = samples.len().saturating_sub(n);
        samples.iter().skip(skip).cloned().collect()
    }

    /// Samples started within the last `window`
    pub fn realtime(&self, window: Duration) -> Vec<RequestMetric> {
        let cutoff = Utc::now() - window;
        lock(&self.samples)
            .iter()
            .filter(|m| m.started_at > cutoff)
            .cloned()
            .collect()
    }

    pub fn threats(&self) -> Vec<SecurityThreat> {
        lock(&self.threats).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.samples).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> MonitoringSnapshot {
        let (total, errors, unauthorized) = {
            let c = lock(&self.counters);
            (c.total, c.errors, c.unauthorized)
        };
        MonitoringSnapshot {
            response_time: self.response_time_stats(),
            total_requests: total,
            total_errors: errors,
            unauthorized,
            error_rate: self.error_rate(),
            throughput_rps: self.throughput(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            recent_threats: self.threats(),
            timestamp: Utc::now(),
        }
    }
}
