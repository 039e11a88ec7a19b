//! End-to-end scenarios across the correlation core:
//! alert intake → risk tracking → correlation → change gate → summary cache
//! → snapshot publishing. Backends point at unreachable addresses so the
//! degraded paths (empty scans, file fallback) are the ones under test; the
//! oracle is a counting mock.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use watchtower_core::correlator::Correlator;
use watchtower_core::fingerprint::{should_summarize, SnapshotState};
use watchtower_core::log_store::LogStoreClient;
use watchtower_core::profiles::load_profiles;
use watchtower_core::prometheus::{parse_alerts, PromClient};
use watchtower_core::publisher::SnapshotPublisher;
use watchtower_core::risk_tracker::RiskTracker;
use watchtower_core::summarizer::Summarize;
use watchtower_core::summary_cache::SummaryCache;
use watchtower_core::types::{Correlation, Verdict};
use watchtower_core::WatchtowerResult;

/// Nothing listens on port 9; every backend call fails fast.
const DEAD_BACKEND: &str = "http://127.0.0.1:9";

struct CountingOracle {
    calls: AtomicUsize,
}

impl CountingOracle {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }
    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarize for CountingOracle {
    async fn summarize(&self, _: &[Correlation]) -> WatchtowerResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Verdict {
            risk: "Critical".into(),
            confidence: 0.9,
            root_cause: "service crashed".into(),
            summary: "panic loop detected".into(),
            ..Verdict::default()
        })
    }
}

struct Harness {
    tracker: RiskTracker,
    correlator: Correlator,
    cache: SummaryCache,
    publisher: Arc<SnapshotPublisher>,
    oracle: CountingOracle,
    pattern_index: HashMap<String, String>,
    valid_services: HashSet<String>,
    last_state: SnapshotState,
    last_verdicts: HashMap<String, Verdict>,
}

impl Harness {
    fn new(profile_dir: &std::path::Path) -> Self {
        let profiles = load_profiles(profile_dir).unwrap();
        let pattern_index = watchtower_core::profiles::alert_pattern_index(&profiles);
        let valid_services = profiles.keys().cloned().collect();
        let correlator = Correlator::new(
            Arc::new(profiles),
            Arc::new(PromClient::new(DEAD_BACKEND)),
            Arc::new(LogStoreClient::new(DEAD_BACKEND, "logs-*")),
        );
        Self {
            tracker: RiskTracker::new(Duration::minutes(2)),
            correlator,
            cache: SummaryCache::new(Duration::minutes(15)),
            publisher: Arc::new(SnapshotPublisher::new()),
            oracle: CountingOracle::new(),
            pattern_index,
            valid_services,
            last_state: SnapshotState::initial(),
            last_verdicts: HashMap::new(),
        }
    }

    /// One orchestrator tick over a canned alerts payload.
    async fn tick(&mut self, alerts_body: &serde_json::Value) {
        let alerts = parse_alerts(alerts_body, &self.pattern_index, &self.valid_services);
        self.tracker.update_from_alerts(&alerts);
        self.tracker.cleanup_expired();

        let cycle = self.correlator.run_cycle(&self.tracker.items()).await;
        let mut records = cycle.records;

        let current = SnapshotState::capture(
            cycle.simplified_alerts,
            cycle.simplified_symptoms,
            cycle.simplified_metrics,
            self.last_state.last_summary_at,
        );

        let mut applied_fresh = false;
        if should_summarize(
            cycle.correlations.len(),
            &current,
            &self.last_state,
            Duration::minutes(30),
        ) {
            self.cache.cleanup_expired();
            if let Ok(verdicts) = self
                .cache
                .get_or_summarize(&self.oracle, &cycle.correlations)
                .await
            {
                for record in records.iter_mut() {
                    if let Some(v) = verdicts.get(&record.service) {
                        record.apply_verdict(v);
                    }
                }
                self.last_verdicts.extend(verdicts);
                let mut committed = current.clone();
                committed.last_summary_at = Utc::now();
                self.last_state = committed;
                applied_fresh = true;
            }
        }

        if !applied_fresh {
            for record in records.iter_mut() {
                if let Some(v) = self.last_verdicts.get(&record.service) {
                    record.apply_verdict(v);
                }
            }
        }

        self.publisher.update_snapshot(records);
    }
}

fn profile_dir(log_file: Option<&str>) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let log_file_line = log_file
        .map(|p| format!("data_sources:\n  log_file: {}\n", p))
        .unwrap_or_default();
    let doc = format!(
        "name: MyAPI\nalert_pattern: MyAPI\n{}log_patterns:\n  - name: critical_error\n    regex: \"(?i)panic\"\n    severity: critical\nmetrics:\n  - name: ServiceAvailability\n    query_template: 'up{{job=\"{{{{.Service}}}}\"}}'\n    operator: \"<\"\n    threshold: 1\n    weight: 5\n",
        log_file_line
    );
    std::fs::write(dir.path().join("myapi.yml"), doc).unwrap();
    dir
}

fn firing_alert_body() -> serde_json::Value {
    serde_json::json!({"data":{"alerts":[
        {"labels":{"alertname":"MyAPI","instance":"api-1:8080","severity":"critical"},
         "state":"firing","activeAt":"2025-03-01T12:00:00Z"}
    ]}})
}

fn no_alerts_body() -> serde_json::Value {
    serde_json::json!({"data":{"alerts":[]}})
}

#[tokio::test]
async fn test_quiet_start_publishes_empty_snapshot() {
    let dir = profile_dir(None);
    let mut harness = Harness::new(dir.path());

    harness.tick(&no_alerts_body()).await;

    assert!(harness.publisher.snapshot().is_empty());
    assert_eq!(harness.oracle.count(), 0);
}

#[tokio::test]
async fn test_first_alert_produces_scored_record() {
    // Log store unreachable: symptoms come from the file fallback.
    let mut log = tempfile::NamedTempFile::new().unwrap();
    writeln!(log, "MyAPI | PANIC: database gone").unwrap();
    writeln!(log, "MyAPI | panic: retry exhausted").unwrap();

    let dir = profile_dir(Some(log.path().to_str().unwrap()));
    let mut harness = Harness::new(dir.path());

    harness.tick(&firing_alert_body()).await;

    let snapshot = harness.publisher.snapshot();
    assert_eq!(snapshot.len(), 1);
    let record = &snapshot[0];
    assert_eq!(record.service, "MyAPI");
    assert_eq!(record.alert, "MyAPI");
    assert_eq!(record.symptoms.len(), 1);
    assert_eq!(record.symptoms[0].pattern, "critical_error");
    assert_eq!(record.symptoms[0].count, 2);
    // Oracle ran once and its verdict landed with a derived score.
    assert_eq!(harness.oracle.count(), 1);
    assert_eq!(record.risk, "Critical");
    assert_eq!(record.score, 99);
}

#[tokio::test]
async fn test_unchanged_cycle_skips_oracle_but_keeps_verdict() {
    let mut log = tempfile::NamedTempFile::new().unwrap();
    writeln!(log, "MyAPI | PANIC: database gone").unwrap();

    let dir = profile_dir(Some(log.path().to_str().unwrap()));
    let mut harness = Harness::new(dir.path());

    harness.tick(&firing_alert_body()).await;
    let first = harness.publisher.snapshot();
    harness.tick(&firing_alert_body()).await;
    let second = harness.publisher.snapshot();

    // Same fingerprint: one oracle call total, verdict carried forward.
    assert_eq!(harness.oracle.count(), 1);
    assert_eq!(second[0].risk, "Critical");
    assert_eq!(second[0].summary, first[0].summary);
    // Records are rebuilt each cycle with a fresh timestamp.
    assert!(second[0].timestamp >= first[0].timestamp);
}

#[tokio::test]
async fn test_symptom_growth_reinvokes_oracle() {
    let mut log = tempfile::NamedTempFile::new().unwrap();
    writeln!(log, "MyAPI | PANIC: database gone").unwrap();

    let dir = profile_dir(Some(log.path().to_str().unwrap()));
    let mut harness = Harness::new(dir.path());

    harness.tick(&firing_alert_body()).await;
    assert_eq!(harness.oracle.count(), 1);

    // The log grows: symptom count changes, fingerprint moves.
    for _ in 0..4 {
        writeln!(log, "MyAPI | panic again").unwrap();
    }
    harness.tick(&firing_alert_body()).await;
    assert_eq!(harness.oracle.count(), 2);
    assert_eq!(harness.publisher.snapshot()[0].symptoms[0].count, 5);
}

#[tokio::test]
async fn test_alert_clears_snapshot_empties() {
    let dir = profile_dir(None);
    let mut harness = Harness::new(dir.path());
    harness.tracker = RiskTracker::new(Duration::milliseconds(30));

    harness.tick(&firing_alert_body()).await;
    assert_eq!(harness.publisher.snapshot().len(), 1);
    let calls_after_first = harness.oracle.count();

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    harness.tick(&no_alerts_body()).await;

    assert!(harness.publisher.snapshot().is_empty());
    // Empty correlations short-circuit the oracle.
    assert_eq!(harness.oracle.count(), calls_after_first);
}

#[tokio::test]
async fn test_unknown_alert_never_tracked() {
    let dir = profile_dir(None);
    let mut harness = Harness::new(dir.path());

    let ghost = serde_json::json!({"data":{"alerts":[
        {"labels":{"alertname":"Ghost","severity":"warning"},"state":"firing"}
    ]}});
    harness.tick(&ghost).await;

    assert!(harness.tracker.is_empty());
    assert!(harness.publisher.snapshot().is_empty());
    assert_eq!(harness.oracle.count(), 0);
}

#[tokio::test]
async fn test_push_subscriber_sees_updates() {
    let dir = profile_dir(None);
    let mut harness = Harness::new(dir.path());

    let (_id, mut rx) = harness.publisher.subscribe();
    let initial = rx.recv().await.unwrap();
    assert_eq!(initial.kind, "risks_update");
    assert!(initial.data.is_empty());

    harness.tick(&firing_alert_body()).await;
    let update = rx.recv().await.unwrap();
    assert_eq!(update.data.len(), 1);
    assert_eq!(update.data[0].service, "MyAPI");
}
