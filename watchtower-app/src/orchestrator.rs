//! # Orchestrator — The outer correlation loop
//!
//! One tick: fetch firing alerts, refresh the risk tracker, run the
//! correlator, let the change gate decide whether the summarizer runs, then
//! publish the snapshot. Oracle results are remembered per service outside
//! the TTL cache so dashboards keep showing the last known explanation even
//! when the summarizer is skipped or failing. The inter-tick sleep is
//! interruptible by the shutdown signal.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use watchtower_core::correlator::Correlator;
use watchtower_core::fingerprint::{short_hash, should_summarize, SnapshotState};
use watchtower_core::prometheus::PromClient;
use watchtower_core::publisher::SnapshotPublisher;
use watchtower_core::risk_tracker::RiskTracker;
use watchtower_core::summarizer::Summarize;
use watchtower_core::summary_cache::SummaryCache;
use watchtower_core::types::{RiskRecord, Verdict};

pub const DEFAULT_TICK_SECS: u64 = 30;

pub struct Orchestrator {
    pattern_index: HashMap<String, String>,
    valid_services: HashSet<String>,
    prom: Arc<PromClient>,
    correlator: Correlator,
    tracker: RiskTracker,
    cache: SummaryCache,
    /// None when no API key is configured; verdicts then stay at their last
    /// known values.
    oracle: Option<Arc<dyn Summarize>>,
    publisher: Arc<SnapshotPublisher>,
    last_state: SnapshotState,
    last_verdicts: HashMap<String, Verdict>,
    tick: Duration,
    max_summary_age: chrono::Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pattern_index: HashMap<String, String>,
        valid_services: HashSet<String>,
        prom: Arc<PromClient>,
        correlator: Correlator,
        tracker: RiskTracker,
        cache: SummaryCache,
        oracle: Option<Arc<dyn Summarize>>,
        publisher: Arc<SnapshotPublisher>,
        tick: Duration,
        max_summary_age: chrono::Duration,
    ) -> Self {
        Self {
            pattern_index,
            valid_services,
            prom,
            correlator,
            tracker,
            cache,
            oracle,
            publisher,
            last_state: SnapshotState::initial(),
            last_verdicts: HashMap::new(),
            tick,
            max_summary_age,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.tick.as_secs(), "Correlation loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_tick().await;

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
        info!("Correlation loop stopped");
    }

    async fn run_tick(&mut self) {
        debug!("Fetching alerts");
        let alerts = match self
            .prom
            .fetch_alerts(&self.pattern_index, &self.valid_services)
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "Alert fetch failed, retrying next tick");
                return;
            }
        };

        self.tracker.update_from_alerts(&alerts);
        self.tracker.cleanup_expired();

        let items = self.tracker.items();
        if items.is_empty() {
            debug!("No active risks");
        } else {
            for item in &items {
                info!(service = %item.service, alert = %item.alert_name, severity = %item.severity, "Active risk");
            }
        }

        let cycle = self.correlator.run_cycle(&items).await;
        let mut records = cycle.records;

        let current = SnapshotState::capture(
            cycle.simplified_alerts,
            cycle.simplified_symptoms,
            cycle.simplified_metrics,
            self.last_state.last_summary_at,
        );

        if current.has_changed(&self.last_state) {
            info!(
                alerts = current.alert_count,
                symptoms = current.symptom_count,
                metrics = current.metric_count,
                alerts_hash = %short_hash(&current.alerts_hash),
                "Snapshot changed"
            );
        }

        let summarize = should_summarize(
            cycle.correlations.len(),
            &current,
            &self.last_state,
            self.max_summary_age,
        );

        let mut applied_fresh = false;
        if summarize {
            if let Some(oracle) = self.oracle.clone() {
                self.cache.cleanup_expired();
                match self
                    .cache
                    .get_or_summarize(oracle.as_ref(), &cycle.correlations)
                    .await
                {
                    Ok(verdicts) => {
                        apply_verdicts(&mut records, &verdicts);
                        self.last_verdicts.extend(verdicts);

                        let mut committed = current.clone();
                        committed.last_summary_at = Utc::now();
                        self.last_state = committed;
                        applied_fresh = true;
                    }
                    Err(e) => {
                        warn!(error = %e, "Summarizer failed, reusing last verdicts");
                    }
                }
            } else {
                debug!("Summarizer not configured, reusing last verdicts");
            }
        } else if cycle.correlations.is_empty() {
            debug!("No correlations, summarizer skipped");
        } else {
            debug!("No significant change, summarizer skipped");
        }

        if !applied_fresh {
            apply_verdicts(&mut records, &self.last_verdicts);
        }

        self.publisher.update_snapshot(records);
    }
}

/// Attach per-service verdicts to the matching records. Used both for fresh
/// oracle output and for overlaying the last successful verdicts, so skipped
/// or failed summarizer rounds never blank the dashboard.
pub fn apply_verdicts(records: &mut [RiskRecord], verdicts: &HashMap<String, Verdict>) {
    for record in records.iter_mut() {
        if let Some(verdict) = verdicts.get(&record.service) {
            record.apply_verdict(verdict);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(service: &str) -> RiskRecord {
        RiskRecord {
            service: service.into(),
            alert: "Down".into(),
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
            timestamp: "2025-03-01 12:00:00 UTC".into(),
        }
    }

    fn verdict(risk: &str, confidence: f64, summary: &str) -> Verdict {
        Verdict {
            risk: risk.into(),
            confidence,
            summary: summary.into(),
            ..Verdict::default()
        }
    }

    #[test]
    fn test_apply_verdicts_scores_records() {
        let mut records = vec![record("cart"), record("db")];
        let mut verdicts = HashMap::new();
        verdicts.insert("cart".to_string(), verdict("Critical", 0.9, "cart is down"));

        apply_verdicts(&mut records, &verdicts);

        assert_eq!(records[0].risk, "Critical");
        assert_eq!(records[0].score, 99);
        assert_eq!(records[0].summary, "cart is down");
        // Unmatched record keeps the empty verdict.
        assert_eq!(records[1].risk, "Unknown");
        assert_eq!(records[1].score, 0);
    }

    #[test]
    fn test_overlay_keeps_dashboard_populated() {
        let mut last = HashMap::new();
        last.insert("cart".to_string(), verdict("High", 0.8, "previous analysis"));

        let mut records = vec![record("cart")];
        apply_verdicts(&mut records, &last);

        assert_eq!(records[0].risk, "High");
        assert_eq!(records[0].summary, "previous analysis");
        assert_eq!(records[0].score, 86);
    }
}
