//! # Summarizer — Oracle client and defensive verdict parsing
//!
//! Talks to a chat-completion style endpoint and turns correlation bundles
//! into structured verdicts. The oracle is an untrusted source of structured
//! text: its reply is fence-stripped, JSON-parsed, regex-salvaged, and only
//! then given up on with a conservative default. Malformed output must never
//! poison the published snapshot.

use crate::error::{WatchtowerError, WatchtowerResult};
use crate::profiles::AnalysisContext;
use crate::types::{Correlation, Verdict};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_ORACLE_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ORACLE_MODEL: &str = "gpt-4o";

/// The summarizer seam. One invocation covers one service's correlations.
#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, correlations: &[Correlation]) -> WatchtowerResult<Verdict>;
}

/// Group correlations by service and invoke the oracle once per group. Any
/// group failure fails the whole call so nothing partial is ever cached.
pub async fn summarize_all(
    oracle: &dyn Summarize,
    correlations: &[Correlation],
) -> WatchtowerResult<HashMap<String, Verdict>> {
    let mut grouped: HashMap<String, Vec<Correlation>> = HashMap::new();
    for c in correlations {
        grouped
            .entry(c.alert.service.clone())
            .or_default()
            .push(c.clone());
    }

    let mut verdicts = HashMap::new();
    for (service, group) in grouped {
        let verdict = oracle.summarize(&group).await?;
        verdicts.insert(service, verdict);
    }
    Ok(verdicts)
}

// ── HTTP oracle ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OracleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    /// Per-service analysis hints from the profile table.
    contexts: Arc<HashMap<String, AnalysisContext>>,
}

impl OracleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> WatchtowerResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(WatchtowerError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            contexts: Arc::new(HashMap::new()),
        })
    }

    pub fn with_contexts(mut self, contexts: HashMap<String, AnalysisContext>) -> Self {
        self.contexts = Arc::new(contexts);
        self
    }
}

#[async_trait]
impl Summarize for OracleClient {
    async fn summarize(&self, correlations: &[Correlation]) -> WatchtowerResult<Verdict> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "max_tokens": 1500,
            "messages": [
                {"role": "system", "content": system_prompt()},
                {"role": "user", "content": context_prompt(correlations, &self.contexts)},
            ],
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(WatchtowerError::Summarizer(format!(
                "oracle returned {}",
                resp.status()
            )));
        }

        let payload: Value = resp.json().await?;
        let raw = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WatchtowerError::Summarizer("reply carries no content".into()))?;

        debug!(chars = raw.len(), "Oracle reply received");
        Ok(parse_verdict(raw))
    }
}

// ── Prompts ─────────────────────────────────────────────────────────────────

fn system_prompt() -> String {
    r#"You are a senior site reliability engineer analyzing correlated production monitoring data: firing alerts, matched log symptoms, and metric threshold violations from live workloads.

Correlate the alert severity with the observed symptoms and metrics, identify the technical root cause, and prioritize service restoration over investigation.

Respond with ONLY a JSON object in exactly this shape, no prose outside it:
{
  "risk": "Critical|High|Medium|Low",
  "confidence": 0.8,
  "root_cause": "specific technical analysis of the problem",
  "immediate_actions": ["concrete stabilization step", "..."],
  "investigation_steps": ["specific log/metric/config check", "..."],
  "prevention": "specific measures to stop this recurring",
  "summary": "one-paragraph incident summary"
}"#
        .to_string()
}

fn context_prompt(
    correlations: &[Correlation],
    contexts: &HashMap<String, AnalysisContext>,
) -> String {
    let mut out = String::from("=== PRODUCTION INCIDENT DATA ===\n\n");

    for (i, c) in correlations.iter().enumerate() {
        if i > 0 {
            out.push_str("\n==================================================\n\n");
        }

        let _ = writeln!(out, "SERVICE: {}", c.alert.service);
        let _ = writeln!(out, "ALERT: {}", c.alert.alert_name);
        let _ = writeln!(out, "SEVERITY: {}", c.alert.severity);
        let _ = writeln!(
            out,
            "ALERT_DURATION: {}s",
            (c.alert.last_seen - c.alert.first_seen).num_seconds()
        );
        let _ = writeln!(
            out,
            "FIRST_SEEN: {}\n",
            c.alert.first_seen.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if c.symptoms.is_empty() {
            out.push_str("LOG_SYMPTOMS: no matching log patterns detected\n\n");
        } else {
            out.push_str("LOG_SYMPTOMS:\n");
            for s in &c.symptoms {
                let _ = writeln!(
                    out,
                    "  - pattern: {} ({} occurrences, last {})",
                    s.pattern,
                    s.count,
                    s.last_seen.format("%H:%M:%S")
                );
            }
            out.push('\n');
        }

        if c.metrics.is_empty() {
            out.push_str("METRICS_TRIGGERED: no thresholds violated\n\n");
        } else {
            out.push_str("METRICS_TRIGGERED:\n");
            for m in &c.metrics {
                let _ = writeln!(
                    out,
                    "  - {}: value {:.3} violates {} {:.3} (weight {})",
                    m.check_name, m.value, m.operator, m.threshold, m.weight
                );
            }
            out.push('\n');
        }

        if let Some(ctx) = contexts.get(&c.alert.service) {
            out.push_str("SERVICE_CONTEXT:\n");
            if !ctx.service_type.is_empty() {
                let _ = writeln!(out, "  - type: {}", ctx.service_type);
            }
            if !ctx.criticality.is_empty() {
                let _ = writeln!(out, "  - criticality: {}", ctx.criticality);
            }
            for cause in &ctx.common_causes {
                let _ = writeln!(out, "  - known cause: {}", cause);
            }
            if !ctx.escalation_path.is_empty() {
                let _ = writeln!(out, "  - escalation: {}", ctx.escalation_path);
            }
        }
    }

    out.push_str("\n=== END INCIDENT DATA ===\nProvide your analysis in the specified JSON format.");
    out
}

// ── Defensive parsing ───────────────────────────────────────────────────────

/// Strip surrounding markdown fences, or grab the outermost brace block.
pub fn extract_json(raw: &str) -> String {
    let fenced = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
    if let Some(caps) = fenced.captures(raw) {
        return caps[1].trim().to_string();
    }
    let block = Regex::new(r"(?s)\{.*\}").unwrap();
    if let Some(m) = block.find(raw) {
        return m.as_str().trim().to_string();
    }
    raw.to_string()
}

/// Parse an oracle reply into a verdict: structured parse first, regex
/// salvage second, conservative default last.
pub fn parse_verdict(raw: &str) -> Verdict {
    let cleaned = extract_json(raw);

    let mut verdict = match serde_json::from_str::<Verdict>(&cleaned) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Oracle reply is not valid JSON, salvaging");
            salvage_verdict(raw)
        }
    };

    if verdict.summary.is_empty() {
        verdict.summary = verdict.root_cause.clone();
    }
    if verdict.risk.is_empty() {
        verdict.risk = "Medium".into();
    }
    if verdict.confidence == 0.0 {
        verdict.confidence = 0.5;
    }
    verdict
}

/// Best-effort extraction of `risk` and `root_cause` from free text.
fn salvage_verdict(raw: &str) -> Verdict {
    let mut verdict = Verdict {
        risk: "Medium".into(),
        confidence: 0.3,
        summary: raw.trim().to_string(),
        ..Verdict::default()
    };

    let risk_re = Regex::new(r#"(?i)"?risk"?\s*[:=]\s*"?(Critical|High|Medium|Low)"#).unwrap();
    if let Some(caps) = risk_re.captures(raw) {
        verdict.risk = caps[1].to_string();
    }

    let cause_re = Regex::new(r#"(?i)"?root_cause"?\s*[:=]\s*"([^"]+)""#).unwrap();
    if let Some(caps) = cause_re.captures(raw) {
        verdict.root_cause = caps[1].to_string();
    }

    verdict
}
