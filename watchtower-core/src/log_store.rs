//! # Log Matcher — Symptom detection against the log store
//!
//! Queries the log store over a bounded time window, extracts a service
//! label per document, normalizes it against the known profile names, and
//! folds regex matches into `(service, pattern)` symptom tuples. When the
//! log store is unreachable a profile's fallback log file is scanned with
//! the same pattern loop.
//!
//! Service labels in shipped logs are unreliable: extraction tries the
//! explicit fields first, then a `container|message` prefix heuristic, and
//! normalization accepts exact, containment, and cleaned-container matches.

use crate::error::{WatchtowerError, WatchtowerResult};
use crate::profiles::ServiceProfile;
use crate::types::SymptomMatch;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_LOG_STORE_URL: &str = "http://localhost:9200";
pub const DEFAULT_INDEX_PATTERN: &str = "logs-*";

/// A profile's log patterns, compiled once.
#[derive(Debug)]
pub struct CompiledPattern {
    pub name: String,
    pub regex: Regex,
}

/// One document pulled back from the log store.
#[derive(Debug, Clone)]
pub struct LogDoc {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub service: Option<String>,
    pub container: Option<String>,
}

/// The set of profile names symptoms are normalized against.
#[derive(Debug, Clone, Default)]
pub struct ServiceNames {
    names: Vec<String>,
}

impl ServiceNames {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Map a raw container/service label onto a configured service name.
    /// Tries exact, containment both ways (case-insensitive), then the same
    /// again on a cleaned form of the label.
    pub fn normalize(&self, raw: &str) -> String {
        if self.contains(raw) {
            return raw.to_string();
        }

        let raw_lower = raw.to_lowercase();
        for name in &self.names {
            let name_lower = name.to_lowercase();
            if raw_lower.contains(&name_lower) || name_lower.contains(&raw_lower) {
                return name.clone();
            }
        }

        let cleaned = clean_container_name(raw);
        if self.contains(&cleaned) {
            return cleaned;
        }
        let cleaned_lower = cleaned.to_lowercase();
        for name in &self.names {
            let name_lower = name.to_lowercase();
            if cleaned_lower.contains(&name_lower) || name_lower.contains(&cleaned_lower) {
                return name.clone();
            }
        }

        cleaned
    }

    /// Service label for a document: explicit service field, then container,
    /// then the `container|message` prefix heuristic.
    pub fn extract(&self, doc: &LogDoc) -> String {
        if let Some(service) = doc.service.as_deref().filter(|s| !s.is_empty()) {
            return self.normalize(service);
        }
        if let Some(container) = doc.container.as_deref().filter(|s| !s.is_empty()) {
            return self.normalize(container);
        }
        if let Some((prefix, _)) = doc.message.split_once('|') {
            let prefix = prefix.trim();
            if !prefix.is_empty() {
                return self.normalize(prefix);
            }
        }
        "unknown".to_string()
    }
}

/// Strip common container-runtime decorations: `k8s_`/`docker_`/leading-`/`
/// prefixes, `_`-joined suffixes, and trailing random-looking `-` suffixes of
/// eight or more alphanumeric characters.
pub fn clean_container_name(name: &str) -> String {
    let mut name = name;
    for prefix in ["k8s_", "docker_", "/"] {
        name = name.strip_prefix(prefix).unwrap_or(name);
    }

    if let Some((head, _)) = name.split_once('_') {
        return head.to_string();
    }

    if let Some(idx) = name.rfind('-') {
        let suffix = &name[idx + 1..];
        if suffix.len() >= 8 && suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return name[..idx].to_string();
        }
    }

    name.to_string()
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct LogStoreClient {
    http: reqwest::Client,
    base_url: String,
    default_index: String,
    /// Compiled pattern sets, cached per profile name.
    compiled: RwLock<HashMap<String, Arc<Vec<CompiledPattern>>>>,
}

impl LogStoreClient {
    pub fn new(base_url: impl Into<String>, default_index: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            default_index: default_index.into(),
            compiled: RwLock::new(HashMap::new()),
        }
    }

    fn patterns_for(&self, profile: &ServiceProfile) -> Arc<Vec<CompiledPattern>> {
        if let Some(cached) = self.compiled.read().get(&profile.name) {
            return cached.clone();
        }
        let compiled: Vec<CompiledPattern> = profile
            .log_patterns
            .iter()
            .filter_map(|p| match Regex::new(&p.regex) {
                Ok(regex) => Some(CompiledPattern {
                    name: p.name.clone(),
                    regex,
                }),
                // Load-time validation already rejected uncompilable patterns.
                Err(e) => {
                    warn!(profile = %profile.name, pattern = %p.name, error = %e, "Pattern failed to compile");
                    None
                }
            })
            .collect();
        let compiled = Arc::new(compiled);
        self.compiled
            .write()
            .insert(profile.name.clone(), compiled.clone());
        compiled
    }

    /// Query the log store for one profile's window and fold the matches.
    pub async fn scan_symptoms(
        &self,
        profile: &ServiceProfile,
        known: &ServiceNames,
    ) -> WatchtowerResult<Vec<SymptomMatch>> {
        let patterns = self.patterns_for(profile);
        let index = profile
            .log_store
            .index_pattern
            .as_deref()
            .unwrap_or(&self.default_index);
        let body = build_search_body(
            profile.log_store.time_window_minutes,
            profile.log_store.scan_limit,
            profile.log_store.namespace_filter.as_deref(),
        );

        let url = format!("{}/{}/_search", self.base_url, index);
        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(WatchtowerError::Backend(format!(
                "log store returned {} for index {}",
                resp.status(),
                index
            )));
        }
        let payload: Value = resp.json().await?;
        let docs = parse_hits(&payload);
        debug!(profile = %profile.name, index = %index, docs = docs.len(), "Log scan complete");

        Ok(match_documents(&docs, &patterns, known))
    }

    /// Fallback path: scan up to `scan_limit` lines of the profile's log
    /// file with the same pattern loop.
    pub fn scan_log_file(
        &self,
        profile: &ServiceProfile,
        known: &ServiceNames,
    ) -> WatchtowerResult<Vec<SymptomMatch>> {
        let path = profile.log_file.as_deref().ok_or_else(|| {
            WatchtowerError::Backend(format!("no fallback log file for {}", profile.name))
        })?;
        let patterns = self.patterns_for(profile);

        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let now = Utc::now();

        let mut agg: HashMap<(String, String), SymptomMatch> = HashMap::new();
        for line in reader.lines().take(profile.log_store.scan_limit) {
            let line = line?;
            let service = match line.split_once('|') {
                Some((prefix, _)) => known.normalize(prefix.trim()),
                None => "unknown".to_string(),
            };
            for pattern in patterns.iter() {
                if pattern.regex.is_match(&line) {
                    upsert_at(&mut agg, &service, &pattern.name, now);
                }
            }
        }

        Ok(collect_sorted(agg))
    }
}

/// The search body: bounded time range, optional namespace term filter,
/// newest first, capped size.
pub fn build_search_body(window_minutes: i64, limit: usize, namespace: Option<&str>) -> Value {
    let now = Utc::now();
    let from = now - Duration::minutes(window_minutes);

    let mut must = vec![json!({
        "range": {
            "@timestamp": {
                "gte": from.to_rfc3339(),
                "lte": now.to_rfc3339(),
            }
        }
    })];
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        must.push(json!({"term": {"kubernetes.namespace.keyword": ns}}));
    }

    json!({
        "query": {"bool": {"must": must}},
        "sort": [{"@timestamp": {"order": "desc"}}],
        "size": limit,
    })
}

/// Pull the `_source` documents out of a search response.
pub fn parse_hits(payload: &Value) -> Vec<LogDoc> {
    payload
        .pointer("/hits/hits")
        .and_then(|v| v.as_array())
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let source = hit.get("_source")?;
                    Some(LogDoc {
                        timestamp: source
                            .get("@timestamp")
                            .and_then(|v| v.as_str())
                            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                            .unwrap_or_else(Utc::now),
                        message: source
                            .get("message")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        service: source
                            .get("service")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        container: source
                            .get("container")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Fold pattern matches over a document batch into per-(service, pattern)
/// symptom tuples.
pub fn match_documents(
    docs: &[LogDoc],
    patterns: &[CompiledPattern],
    known: &ServiceNames,
) -> Vec<SymptomMatch> {
    let mut agg: HashMap<(String, String), SymptomMatch> = HashMap::new();

    for doc in docs {
        let service = known.extract(doc);
        for pattern in patterns {
            if pattern.regex.is_match(&doc.message) {
                upsert_at(&mut agg, &service, &pattern.name, doc.timestamp);
            }
        }
    }

    collect_sorted(agg)
}

fn upsert_at(
    agg: &mut HashMap<(String, String), SymptomMatch>,
    service: &str,
    pattern: &str,
    seen: DateTime<Utc>,
) {
    agg.entry((service.to_string(), pattern.to_string()))
        .and_modify(|m| {
            m.count += 1;
            if seen > m.last_seen {
                m.last_seen = seen;
            }
        })
        .or_insert_with(|| SymptomMatch {
            service: service.to_string(),
            pattern: pattern.to_string(),
            count: 1,
            last_seen: seen,
        });
}

fn collect_sorted(agg: HashMap<(String, String), SymptomMatch>) -> Vec<SymptomMatch> {
    let mut out: Vec<SymptomMatch> = agg.into_values().collect();
    out.sort_by(|a, b| (&a.service, &a.pattern).cmp(&(&b.service, &b.pattern)));
    out
}
