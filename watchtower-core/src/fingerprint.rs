//! # Fingerprint — Content hashing and the summarizer change gate
//!
//! The per-cycle snapshot is reduced to three simplified projections
//! (alerts, symptoms, metric triggers), each stably sorted and hashed
//! independently. The gate fires the summarizer only when a count or a hash
//! differs from the last committed state, or when a forced-refresh interval
//! has elapsed while alerts are active.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const DEFAULT_FORCE_UPDATE_SECS: i64 = 30 * 60;

/// Sha256 over the JSON serialization of `data`, hex-encoded.
pub fn hash_data<T: Serialize>(data: &T) -> String {
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// First eight characters, for log lines.
pub fn short_hash(hash: &str) -> &str {
    if hash.len() >= 8 {
        &hash[..8]
    } else {
        hash
    }
}

// ── Simplified projections ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SimplifiedAlert {
    pub service: String,
    pub alert_name: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SimplifiedSymptom {
    pub service: String,
    pub pattern: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimplifiedMetric {
    pub service: String,
    pub check_name: String,
    pub value: f64,
    pub operator: String,
    pub threshold: f64,
}

// ── Gate state ──────────────────────────────────────────────────────────────

/// Counts plus content hashes describing one cycle's snapshot, together with
/// the time of the last summarizer run.
#[derive(Debug, Clone)]
pub struct SnapshotState {
    pub alert_count: usize,
    pub symptom_count: usize,
    pub metric_count: usize,
    pub alerts_hash: String,
    pub symptoms_hash: String,
    pub metrics_hash: String,
    pub last_summary_at: DateTime<Utc>,
}

impl SnapshotState {
    /// Initial state: empty snapshot, clock started now so a quiet boot does
    /// not immediately trip the forced-refresh timer.
    pub fn initial() -> Self {
        Self {
            alert_count: 0,
            symptom_count: 0,
            metric_count: 0,
            alerts_hash: String::new(),
            symptoms_hash: String::new(),
            metrics_hash: String::new(),
            last_summary_at: Utc::now(),
        }
    }

    /// Build the state for the current cycle. Projections are sorted before
    /// hashing so map iteration order can never fake a change.
    pub fn capture(
        mut alerts: Vec<SimplifiedAlert>,
        mut symptoms: Vec<SimplifiedSymptom>,
        mut metrics: Vec<SimplifiedMetric>,
        last_summary_at: DateTime<Utc>,
    ) -> Self {
        alerts.sort();
        symptoms.sort();
        metrics.sort_by(|a, b| {
            (&a.service, &a.check_name).cmp(&(&b.service, &b.check_name))
        });

        Self {
            alert_count: alerts.len(),
            symptom_count: symptoms.len(),
            metric_count: metrics.len(),
            alerts_hash: hash_data(&alerts),
            symptoms_hash: hash_data(&symptoms),
            metrics_hash: hash_data(&metrics),
            last_summary_at,
        }
    }

    pub fn has_changed(&self, previous: &SnapshotState) -> bool {
        self.alert_count != previous.alert_count
            || self.symptom_count != previous.symptom_count
            || self.metric_count != previous.metric_count
            || self.alerts_hash != previous.alerts_hash
            || self.symptoms_hash != previous.symptoms_hash
            || self.metrics_hash != previous.metrics_hash
    }

    pub fn should_force_update(&self, max_age: Duration) -> bool {
        Utc::now() - self.last_summary_at > max_age
    }
}

/// The gate decision: summarize only when there is something to explain and
/// either the content moved or the last explanation has gone stale.
pub fn should_summarize(
    correlation_count: usize,
    current: &SnapshotState,
    last: &SnapshotState,
    max_age: Duration,
) -> bool {
    correlation_count > 0 && (current.has_changed(last) || last.should_force_update(max_age))
}
