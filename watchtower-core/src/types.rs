//! Shared types for the correlation core.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A firing alert pulled from the metrics backend, reduced to the labels the
/// correlator cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    pub instance: String,
    pub severity: String,
    /// Logical service this alert belongs to, resolved against the profile
    /// table's alert patterns.
    pub service: String,
    pub starts_at: DateTime<Utc>,
}

/// A service currently tracked as at-risk. One entry per service; a newer
/// alert for the same service refreshes `last_seen` and overwrites
/// `alert_name`/`severity`.
#[derive(Debug, Clone)]
pub struct RiskItem {
    pub service: String,
    pub alert_name: String,
    pub severity: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub ttl: Duration,
}

/// A log pattern that matched within the scan window, aggregated per
/// `(service, pattern)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomMatch {
    pub service: String,
    pub pattern: String,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

/// A metric check whose comparison held against the live value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTrigger {
    pub service: String,
    pub check_name: String,
    pub value: f64,
    pub operator: String,
    pub threshold: f64,
    pub weight: u32,
}

/// One service's bundle handed to the summarizer oracle.
#[derive(Debug, Clone, Serialize)]
pub struct Correlation {
    pub alert: CorrelatedAlert,
    pub symptoms: Vec<SymptomMatch>,
    pub metrics: Vec<MetricTrigger>,
}

/// The alert half of a correlation, flattened from the tracked risk item so
/// the bundle serializes cleanly for hashing.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelatedAlert {
    pub service: String,
    pub alert_name: String,
    pub severity: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<&RiskItem> for CorrelatedAlert {
    fn from(item: &RiskItem) -> Self {
        Self {
            service: item.service.clone(),
            alert_name: item.alert_name.clone(),
            severity: item.severity.clone(),
            first_seen: item.first_seen,
            last_seen: item.last_seen,
        }
    }
}

/// The oracle's structured reply for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub immediate_actions: Vec<String>,
    #[serde(default, rename = "investigation_steps")]
    pub investigation: Vec<String>,
    #[serde(default)]
    pub prevention: String,
    #[serde(default)]
    pub summary: String,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            risk: "Unknown".into(),
            confidence: 0.0,
            root_cause: String::new(),
            immediate_actions: Vec::new(),
            investigation: Vec::new(),
            prevention: String::new(),
            summary: String::new(),
        }
    }
}

/// A symptom as published to the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSymptom {
    pub pattern: String,
    pub count: u64,
}

/// A triggered metric as published to the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetric {
    pub name: String,
    pub value: f64,
    pub operator: String,
    pub threshold: f64,
}

/// One row of the published snapshot: correlation flattened together with the
/// oracle verdict and the derived score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRecord {
    pub service: String,
    pub alert: String,
    pub severity: String,
    pub score: i64,
    pub symptoms: Vec<RecordSymptom>,
    pub metrics: Vec<RecordMetric>,
    pub summary: String,
    pub risk: String,
    pub confidence: f64,
    pub root_cause: String,
    pub immediate_actions: Vec<String>,
    pub investigation_steps: Vec<String>,
    pub prevention: String,
    pub timestamp: String,
}

impl RiskRecord {
    /// Overlay a verdict onto this record, recomputing the score.
    pub fn apply_verdict(&mut self, verdict: &Verdict) {
        self.summary = verdict.summary.clone();
        self.risk = verdict.risk.clone();
        self.confidence = verdict.confidence;
        self.root_cause = verdict.root_cause.clone();
        self.immediate_actions = verdict.immediate_actions.clone();
        self.investigation_steps = verdict.investigation.clone();
        self.prevention = verdict.prevention.clone();
        self.score = risk_score(&verdict.risk, verdict.confidence);
    }
}

/// Format used for the `timestamp` field of published records.
pub const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Derive a 0-100 risk score from a verdict's risk level and confidence.
/// Unrecognized levels score zero.
pub fn risk_score(risk: &str, confidence: f64) -> i64 {
    match risk.to_ascii_lowercase().as_str() {
        "critical" => 90 + (confidence * 10.0) as i64,
        "high" => 70 + (confidence * 20.0) as i64,
        "medium" => 40 + (confidence * 30.0) as i64,
        "low" => 10 + (confidence * 30.0) as i64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_table() {
        assert_eq!(risk_score("Critical", 1.0), 100);
        assert_eq!(risk_score("critical", 0.85), 98);
        assert_eq!(risk_score("High", 0.5), 80);
        assert_eq!(risk_score("Medium", 0.99), 69);
        assert_eq!(risk_score("low", 0.0), 10);
        assert_eq!(risk_score("Unknown", 0.9), 0);
        assert_eq!(risk_score("", 1.0), 0);
    }

    #[test]
    fn test_score_floors_confidence() {
        // 0.37 * 10 = 3.7 truncates to 3
        assert_eq!(risk_score("Critical", 0.37), 93);
        assert_eq!(risk_score("High", 0.99), 89);
    }

    #[test]
    fn test_apply_verdict_recomputes_score() {
        let mut record = RiskRecord {
            service: "cart".into(),
            alert: "CartDown".into(),
            severity: "critical".into(),
            score: 0,
            symptoms: vec![],
            metrics: vec![],
            summary: String::new(),
            risk: "Unknown".into(),
            confidence: 0.0,
            root_cause: String::new(),
            immediate_actions: vec![],
            investigation_steps: vec![],
            prevention: String::new(),
            timestamp: "2025-01-01 00:00:00 UTC".into(),
        };
        let verdict = Verdict {
            risk: "High".into(),
            confidence: 0.8,
            root_cause: "OOM kill loop".into(),
            summary: "Pod restarting".into(),
            ..Verdict::default()
        };
        record.apply_verdict(&verdict);
        assert_eq!(record.score, 86);
        assert_eq!(record.risk, "High");
        assert_eq!(record.root_cause, "OOM kill loop");
    }

    #[test]
    fn test_verdict_deserializes_oracle_field_names() {
        let v: Verdict = serde_json::from_str(
            r#"{"risk":"High","confidence":0.7,"root_cause":"x",
                "immediate_actions":["a"],"investigation_steps":["b"],
                "prevention":"p","summary":"s"}"#,
        )
        .unwrap();
        assert_eq!(v.investigation, vec!["b"]);
        assert_eq!(v.risk, "High");
    }
}
