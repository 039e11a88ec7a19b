//! # Correlator — One poll cycle's fan-in
//!
//! Walks the tracked risk items, resolves each to a profile (alert name
//! first, service name second), and joins log symptoms and metric triggers
//! into per-service correlation bundles plus the dashboard records and the
//! simplified projections the change gate hashes.
//!
//! Symptom attribution rule: matches the log store could not attribute
//! (`"unknown"`) are rewritten to the service currently being processed.
//! Shipped logs frequently lack reliable service tags, and the service whose
//! alert we are explaining is the only sensible owner for them. Tests lock
//! this behavior in.

use crate::fingerprint::{SimplifiedAlert, SimplifiedMetric, SimplifiedSymptom};
use crate::log_store::{LogStoreClient, ServiceNames};
use crate::profiles::ServiceProfile;
use crate::prometheus::PromClient;
use crate::types::{
    Correlation, MetricTrigger, RecordMetric, RecordSymptom, RiskItem, RiskRecord, SymptomMatch,
    RECORD_TIME_FORMAT,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything one cycle produces for the gate, the cache, and the publisher.
#[derive(Debug, Default)]
pub struct CycleOutput {
    pub correlations: Vec<Correlation>,
    pub records: Vec<RiskRecord>,
    pub simplified_alerts: Vec<SimplifiedAlert>,
    pub simplified_symptoms: Vec<SimplifiedSymptom>,
    pub simplified_metrics: Vec<SimplifiedMetric>,
}

pub struct Correlator {
    profiles: Arc<HashMap<String, ServiceProfile>>,
    known: ServiceNames,
    prom: Arc<PromClient>,
    logs: Arc<LogStoreClient>,
}

impl Correlator {
    pub fn new(
        profiles: Arc<HashMap<String, ServiceProfile>>,
        prom: Arc<PromClient>,
        logs: Arc<LogStoreClient>,
    ) -> Self {
        let known = ServiceNames::new(profiles.keys().cloned());
        Self {
            profiles,
            known,
            prom,
            logs,
        }
    }

    /// Resolve each tracked item to a profile, one pass per unique profile.
    /// Items matching no profile are dropped with a warning.
    pub fn plan(&self, items: &[RiskItem]) -> Vec<(RiskItem, ServiceProfile)> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut planned = Vec::new();

        for item in items {
            let key = if self.profiles.contains_key(&item.alert_name) {
                item.alert_name.clone()
            } else {
                item.service.clone()
            };

            if !seen.insert(key.clone()) {
                continue;
            }

            match self.profiles.get(&key) {
                Some(profile) => planned.push((item.clone(), profile.clone())),
                None => {
                    warn!(alert = %item.alert_name, service = %item.service, "No profile for tracked risk");
                }
            }
        }

        planned
    }

    /// Drive one cycle over the tracked items.
    pub async fn run_cycle(&self, items: &[RiskItem]) -> CycleOutput {
        let mut out = CycleOutput::default();

        for item in items {
            out.simplified_alerts.push(SimplifiedAlert {
                service: item.service.clone(),
                alert_name: item.alert_name.clone(),
                severity: item.severity.clone(),
            });
        }

        for (mut item, profile) in self.plan(items) {
            let service = profile.name.clone();
            item.service = service.clone();

            let symptoms = self.scan_symptoms(&profile).await;
            let symptoms = filter_symptoms_for_service(symptoms, &service);
            for s in &symptoms {
                info!(service = %s.service, pattern = %s.pattern, count = s.count, "Symptom matched");
                out.simplified_symptoms.push(SimplifiedSymptom {
                    service: s.service.clone(),
                    pattern: s.pattern.clone(),
                    count: s.count,
                });
            }

            let triggers = self.prom.evaluate_checks(&service, &profile.metrics).await;
            for t in &triggers {
                info!(
                    service = %t.service, check = %t.check_name,
                    value = t.value, operator = %t.operator, threshold = t.threshold,
                    "Metric triggered"
                );
                out.simplified_metrics.push(SimplifiedMetric {
                    service: t.service.clone(),
                    check_name: t.check_name.clone(),
                    value: t.value,
                    operator: t.operator.clone(),
                    threshold: t.threshold,
                });
            }

            out.records.push(empty_record(&item, &symptoms, &triggers));
            out.correlations.push(Correlation {
                alert: (&item).into(),
                symptoms,
                metrics: triggers,
            });
        }

        out
    }

    /// Log store first; on failure fall back to the profile's log file when
    /// one is configured. A failed scan yields no symptoms, never an aborted
    /// cycle.
    async fn scan_symptoms(&self, profile: &ServiceProfile) -> Vec<SymptomMatch> {
        match self.logs.scan_symptoms(profile, &self.known).await {
            Ok(symptoms) => symptoms,
            Err(e) => {
                warn!(service = %profile.name, error = %e, "Log store scan failed");
                if profile.log_file.is_none() {
                    return Vec::new();
                }
                match self.logs.scan_log_file(profile, &self.known) {
                    Ok(symptoms) => {
                        info!(service = %profile.name, "Fell back to file-based log scan");
                        symptoms
                    }
                    Err(e) => {
                        warn!(service = %profile.name, error = %e, "File fallback failed too");
                        Vec::new()
                    }
                }
            }
        }
    }
}

/// Keep symptoms already attributed to this service, and claim the
/// `"unknown"` ones for it.
pub fn filter_symptoms_for_service(
    symptoms: Vec<SymptomMatch>,
    service: &str,
) -> Vec<SymptomMatch> {
    symptoms
        .into_iter()
        .filter_map(|mut s| {
            if s.service == service {
                Some(s)
            } else if s.service == "unknown" {
                s.service = service.to_string();
                Some(s)
            } else {
                None
            }
        })
        .collect()
}

/// A dashboard record with the verdict fields still empty; the summary cache
/// fills them in later.
fn empty_record(item: &RiskItem, symptoms: &[SymptomMatch], triggers: &[MetricTrigger]) -> RiskRecord {
    RiskRecord {
        service: item.service.clone(),
        alert: item.alert_name.clone(),
        severity: item.severity.clone(),
        score: 0,
        symptoms: symptoms
            .iter()
            .map(|s| RecordSymptom {
                pattern: s.pattern.clone(),
                count: s.count,
            })
            .collect(),
        metrics: triggers
            .iter()
            .map(|t| RecordMetric {
                name: t.check_name.clone(),
                value: t.value,
                operator: t.operator.clone(),
                threshold: t.threshold,
            })
            .collect(),
        summary: String::new(),
        risk: "Unknown".into(),
        confidence: 0.0,
        root_cause: String::new(),
        immediate_actions: Vec::new(),
        investigation_steps: Vec::new(),
        prevention: String::new(),
        timestamp: Utc::now().format(RECORD_TIME_FORMAT).to_string(),
    }
}
