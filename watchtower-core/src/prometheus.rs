//! # Prometheus Client — Alert source and metric evaluator
//!
//! Two read paths against the metrics backend:
//! - `fetch_alerts` pulls the firing alert set and normalizes it against the
//!   profile table's alert patterns,
//! - `evaluate_checks` renders each profile's query templates, fetches the
//!   scalar, and emits a trigger when the comparison holds.
//!
//! Response decoding is kept in pure functions over `serde_json::Value` so
//! the wire handling is testable without a live backend.

use crate::error::{WatchtowerError, WatchtowerResult};
use crate::profiles::MetricCheck;
use crate::types::{Alert, MetricTrigger};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

pub const DEFAULT_PROM_URL: &str = "http://localhost:9090";

pub struct PromClient {
    http: reqwest::Client,
    base_url: String,
}

impl PromClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    // ── Alert source ────────────────────────────────────────────────────────

    /// Fetch the current firing alerts, resolved and filtered against the
    /// known services. An empty `valid_services` disables filtering
    /// (diagnostic mode).
    pub async fn fetch_alerts(
        &self,
        pattern_index: &HashMap<String, String>,
        valid_services: &HashSet<String>,
    ) -> WatchtowerResult<Vec<Alert>> {
        let url = format!("{}/api/v1/alerts", self.base_url);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(WatchtowerError::Backend(format!(
                "alerts endpoint returned {}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await?;
        Ok(parse_alerts(&body, pattern_index, valid_services))
    }

    // ── Metric evaluator ────────────────────────────────────────────────────

    /// Evaluate every check for one service. Per-check failures are logged
    /// and swallowed so one bad query never suppresses the others.
    pub async fn evaluate_checks(
        &self,
        service: &str,
        checks: &[MetricCheck],
    ) -> Vec<MetricTrigger> {
        let mut triggers = Vec::new();

        for check in checks {
            let query = render_query(&check.query_template, service);
            let url = format!("{}/api/v1/query", self.base_url);

            let resp = match self.http.get(&url).query(&[("query", &query)]).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(service = %service, check = %check.name, error = %e, "Metric query failed");
                    continue;
                }
            };
            let body: Value = match resp.json().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(service = %service, check = %check.name, error = %e, "Metric response undecodable");
                    continue;
                }
            };

            let value = match extract_scalar(&body) {
                Some(v) => v,
                None => {
                    debug!(service = %service, check = %check.name, "Metric query returned no result");
                    continue;
                }
            };

            if evaluate_operator(value, &check.operator, check.threshold) {
                triggers.push(MetricTrigger {
                    service: service.to_string(),
                    check_name: check.name.clone(),
                    value,
                    operator: check.operator.clone(),
                    threshold: check.threshold,
                    weight: check.weight,
                });
            }
        }

        triggers
    }
}

/// Decode the alerts payload: keep `state == "firing"`, resolve the service
/// from the alert-pattern index (label heuristics as fallback), then filter
/// to the known services unless the filter set is empty.
pub fn parse_alerts(
    body: &Value,
    pattern_index: &HashMap<String, String>,
    valid_services: &HashSet<String>,
) -> Vec<Alert> {
    let raw_alerts = body
        .pointer("/data/alerts")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut alerts = Vec::new();
    for raw in &raw_alerts {
        if raw.get("state").and_then(|v| v.as_str()) != Some("firing") {
            continue;
        }
        let labels = match raw.get("labels") {
            Some(l) => l,
            None => continue,
        };
        let name = label(labels, "alertname");
        let service = resolve_service(&name, labels, pattern_index);

        if !valid_services.is_empty() && !valid_services.contains(&service) {
            debug!(alert = %name, service = %service, "Alert has no matching profile, dropped");
            continue;
        }

        alerts.push(Alert {
            name,
            instance: label(labels, "instance"),
            severity: label(labels, "severity"),
            service,
            starts_at: raw
                .get("activeAt")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                .unwrap_or_else(Utc::now),
        });
    }
    alerts
}

fn label(labels: &Value, key: &str) -> String {
    labels
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Alert-pattern match wins; otherwise fall back to the common service-ish
/// labels before giving up.
fn resolve_service(
    alert_name: &str,
    labels: &Value,
    pattern_index: &HashMap<String, String>,
) -> String {
    if let Some(service) = pattern_index.get(alert_name) {
        return service.clone();
    }
    for key in ["service", "app", "job"] {
        let value = label(labels, key);
        if !value.is_empty() {
            return value;
        }
    }
    "unknown".to_string()
}

/// Substitute `{{.Service}}` in a query template.
pub fn render_query(template: &str, service: &str) -> String {
    template.replace("{{.Service}}", service)
}

/// First result row, second element of its `value` pair, parsed as f64.
fn extract_scalar(body: &Value) -> Option<f64> {
    body.pointer("/data/result/0/value/1")?
        .as_str()?
        .parse()
        .ok()
}

/// Unknown operators are treated as not triggered.
pub fn evaluate_operator(value: f64, operator: &str, threshold: f64) -> bool {
    match operator {
        ">" => value > threshold,
        "<" => value < threshold,
        ">=" => value >= threshold,
        "<=" => value <= threshold,
        "==" => value == threshold,
        "!=" => value != threshold,
        _ => false,
    }
}
