//! # Profile Loader — Service profile documents
//!
//! Reads every `.yml`/`.yaml` document in a directory and produces the
//! immutable profile table the rest of the core runs on. Each document goes
//! through: environment placeholder expansion, YAML parse, legacy-field
//! migration, default application, validation. Invalid documents are skipped
//! with a warning; only an unreadable directory fails the whole load.

use crate::error::{WatchtowerError, WatchtowerResult};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_TIME_WINDOW_MINUTES: i64 = 15;
pub const DEFAULT_SCAN_LIMIT: usize = 500;

// ── Normalized profile ──────────────────────────────────────────────────────

/// A validated, normalized service profile. Immutable after load.
#[derive(Debug, Clone)]
pub struct ServiceProfile {
    pub name: String,
    pub description: String,
    /// Alert name that maps to this profile. Defaults to `name`.
    pub alert_pattern: String,
    pub severity_levels: Vec<String>,
    pub log_store: LogStoreConfig,
    /// Fallback log file scanned when the log store is unreachable.
    pub log_file: Option<String>,
    pub log_patterns: Vec<LogPattern>,
    pub metrics: Vec<MetricCheck>,
    pub analysis_context: AnalysisContext,
}

#[derive(Debug, Clone, Default)]
pub struct LogStoreConfig {
    /// None falls back to the process-wide default index pattern.
    pub index_pattern: Option<String>,
    pub time_window_minutes: i64,
    pub scan_limit: usize,
    pub namespace_filter: Option<String>,
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogPattern {
    pub name: String,
    pub regex: String,
    pub severity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricCheck {
    pub name: String,
    #[serde(alias = "query_tpl")]
    pub query_template: String,
    pub operator: String,
    pub threshold: f64,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub unit: String,
}

fn default_weight() -> u32 {
    1
}

/// Opaque hints forwarded to the summarizer oracle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisContext {
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub criticality: String,
    #[serde(default)]
    pub common_causes: Vec<String>,
    #[serde(default)]
    pub escalation_path: String,
}

// ── Raw document shape ──────────────────────────────────────────────────────
//
// Accepts both the enhanced layout (data_sources block) and the legacy one
// (top-level log_file / elasticsearch). Migration collapses the two.

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    alert_pattern: String,
    #[serde(default)]
    severity_levels: Vec<String>,
    #[serde(default)]
    data_sources: RawDataSources,
    #[serde(default)]
    log_patterns: Vec<RawLogPattern>,
    #[serde(default)]
    metrics: Vec<MetricCheck>,
    #[serde(default)]
    analysis_context: AnalysisContext,

    // Legacy top-level fields
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    elasticsearch: RawLogStore,
}

#[derive(Debug, Default, Deserialize)]
struct RawDataSources {
    #[serde(default)]
    elasticsearch: RawLogStore,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogStore {
    #[serde(default)]
    index_pattern: Option<String>,
    #[serde(default)]
    time_range_minutes: Option<i64>,
    /// Legacy spelling of `time_range_minutes`.
    #[serde(default)]
    time_range_min: Option<i64>,
    #[serde(default)]
    scan_limit: Option<usize>,
    #[serde(default)]
    namespace_filter: Option<String>,
    #[serde(default)]
    required_fields: Vec<String>,
}

impl RawLogStore {
    fn is_empty(&self) -> bool {
        self.index_pattern.is_none() && self.namespace_filter.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct RawLogPattern {
    #[serde(default)]
    name: String,
    /// Legacy alias for `name`.
    #[serde(default)]
    label: String,
    regex: String,
    #[serde(default)]
    severity: String,
}

// ── Loading ─────────────────────────────────────────────────────────────────

/// Load every profile document from `dir`. Returns the table keyed by
/// profile name; errors only if the directory itself cannot be enumerated.
pub fn load_profiles(dir: impl AsRef<Path>) -> WatchtowerResult<HashMap<String, ServiceProfile>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| WatchtowerError::ProfileDir {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut profiles = HashMap::new();

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Cannot read profile document, skipping");
                continue;
            }
        };

        let expanded = expand_env(&content);

        let raw: RawProfile = match serde_yaml::from_str(&expanded) {
            Ok(r) => r,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Invalid YAML in profile document, skipping");
                continue;
            }
        };

        let profile = migrate(raw, &stem);

        if let Err(e) = validate(&profile) {
            warn!(file = %path.display(), error = %e, "Invalid profile document, skipping");
            continue;
        }

        if profiles.contains_key(&profile.name) {
            warn!(file = %path.display(), name = %profile.name, "Duplicate profile name, skipping");
            continue;
        }

        profiles.insert(profile.name.clone(), profile);
    }

    info!(count = profiles.len(), dir = %dir.display(), "Service profiles loaded");
    Ok(profiles)
}

/// Alert pattern → profile name mapping used by the alert source.
pub fn alert_pattern_index(profiles: &HashMap<String, ServiceProfile>) -> HashMap<String, String> {
    profiles
        .values()
        .map(|p| (p.alert_pattern.clone(), p.name.clone()))
        .collect()
}

// ── Environment expansion ───────────────────────────────────────────────────

/// Expand `${VAR}`, `${VAR:-default}` and bare `$VAR` placeholders. A set but
/// empty variable counts as unset. Unresolved placeholders stay literal.
pub fn expand_env(content: &str) -> String {
    let braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap();
    let expanded = braced.replace_all(content, |caps: &regex::Captures<'_>| {
        let var = &caps[1];
        match std::env::var(var) {
            Ok(v) if !v.is_empty() => v,
            _ => match caps.get(3) {
                Some(default) => default.as_str().to_string(),
                None => caps[0].to_string(),
            },
        }
    });

    let bare = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    bare.replace_all(&expanded, |caps: &regex::Captures<'_>| {
        match std::env::var(&caps[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => caps[0].to_string(),
        }
    })
    .into_owned()
}

// ── Migration, defaults, validation ─────────────────────────────────────────

fn migrate(raw: RawProfile, file_stem: &str) -> ServiceProfile {
    let name = if raw.name.is_empty() {
        warn!(stem = %file_stem, "Profile document has no name field, using file stem");
        file_stem.to_string()
    } else {
        raw.name
    };

    // Prefer the data_sources block; fall back to the legacy top-level fields.
    let store = if !raw.data_sources.elasticsearch.is_empty() {
        raw.data_sources.elasticsearch
    } else {
        raw.elasticsearch
    };
    let log_file = raw.data_sources.log_file.or(raw.log_file);

    let time_window = store
        .time_range_minutes
        .or(store.time_range_min)
        .unwrap_or(DEFAULT_TIME_WINDOW_MINUTES);

    let log_store = LogStoreConfig {
        index_pattern: store.index_pattern,
        time_window_minutes: time_window,
        scan_limit: store.scan_limit.unwrap_or(DEFAULT_SCAN_LIMIT),
        namespace_filter: store.namespace_filter,
        required_fields: store.required_fields,
    };

    let log_patterns = raw
        .log_patterns
        .into_iter()
        .map(|p| LogPattern {
            name: if p.name.is_empty() { p.label } else { p.name },
            regex: p.regex,
            severity: p.severity,
        })
        .collect();

    let alert_pattern = if raw.alert_pattern.is_empty() {
        name.clone()
    } else {
        raw.alert_pattern
    };

    let severity_levels = if raw.severity_levels.is_empty() {
        vec!["warning".into(), "critical".into()]
    } else {
        raw.severity_levels
    };

    ServiceProfile {
        name,
        description: raw.description,
        alert_pattern,
        severity_levels,
        log_store,
        log_file,
        log_patterns,
        metrics: raw.metrics,
        analysis_context: raw.analysis_context,
    }
}

fn validate(profile: &ServiceProfile) -> Result<(), String> {
    if profile.name.is_empty() {
        return Err("profile name is required".into());
    }

    for (i, pattern) in profile.log_patterns.iter().enumerate() {
        if pattern.regex.is_empty() {
            return Err(format!("log pattern {} is missing a regex", i));
        }
        if let Err(e) = Regex::new(&pattern.regex) {
            return Err(format!(
                "log pattern {} ({}) does not compile: {}",
                i, pattern.name, e
            ));
        }
    }

    for (i, metric) in profile.metrics.iter().enumerate() {
        if metric.name.is_empty() {
            return Err(format!("metric {} is missing a name", i));
        }
        if metric.query_template.is_empty() {
            return Err(format!("metric {} ({}) is missing a query template", i, metric.name));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_profile(dir: &Path, file: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(file)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    const FULL_PROFILE: &str = r#"
name: checkout
description: Checkout API
alert_pattern: CheckoutDown
severity_levels: [critical]
data_sources:
  elasticsearch:
    index_pattern: "checkout-*"
    time_range_minutes: 30
    scan_limit: 200
    namespace_filter: shop
  log_file: /var/log/checkout.log
log_patterns:
  - name: payment_timeout
    regex: "(?i)payment.*timeout"
    severity: critical
metrics:
  - name: ErrorRate
    query_template: 'rate(errors{service="{{.Service}}"}[5m])'
    operator: ">"
    threshold: 0.05
    weight: 3
    unit: "errors/s"
analysis_context:
  service_type: http-api
  criticality: high
"#;

    #[test]
    fn test_load_full_profile() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "checkout.yml", FULL_PROFILE);

        let profiles = load_profiles(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        let p = &profiles["checkout"];
        assert_eq!(p.alert_pattern, "CheckoutDown");
        assert_eq!(p.severity_levels, vec!["critical"]);
        assert_eq!(p.log_store.index_pattern.as_deref(), Some("checkout-*"));
        assert_eq!(p.log_store.time_window_minutes, 30);
        assert_eq!(p.log_store.scan_limit, 200);
        assert_eq!(p.log_store.namespace_filter.as_deref(), Some("shop"));
        assert_eq!(p.log_file.as_deref(), Some("/var/log/checkout.log"));
        assert_eq!(p.metrics[0].weight, 3);
        assert_eq!(p.analysis_context.criticality, "high");
    }

    #[test]
    fn test_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "cart.yaml", "name: cart\n");

        let profiles = load_profiles(dir.path()).unwrap();
        let p = &profiles["cart"];
        assert_eq!(p.alert_pattern, "cart");
        assert_eq!(p.severity_levels, vec!["warning", "critical"]);
        assert_eq!(p.log_store.time_window_minutes, DEFAULT_TIME_WINDOW_MINUTES);
        assert_eq!(p.log_store.scan_limit, DEFAULT_SCAN_LIMIT);
        assert!(p.log_store.index_pattern.is_none());
    }

    #[test]
    fn test_legacy_document_migrates() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "legacy.yml",
            r#"
log_file: /var/log/legacy.log
elasticsearch:
  index_pattern: "legacy-*"
  time_range_min: 5
log_patterns:
  - label: old_style
    regex: "ERROR"
"#,
        );

        let profiles = load_profiles(dir.path()).unwrap();
        // No name field: file stem becomes the identifier.
        let p = &profiles["legacy"];
        assert_eq!(p.log_file.as_deref(), Some("/var/log/legacy.log"));
        assert_eq!(p.log_store.index_pattern.as_deref(), Some("legacy-*"));
        assert_eq!(p.log_store.time_window_minutes, 5);
        assert_eq!(p.log_patterns[0].name, "old_style");
    }

    #[test]
    fn test_bad_regex_skips_document() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "bad.yml",
            "name: bad\nlog_patterns:\n  - name: broken\n    regex: \"([unclosed\"\n",
        );
        write_profile(dir.path(), "good.yml", "name: good\n");

        let profiles = load_profiles(dir.path()).unwrap();
        assert!(!profiles.contains_key("bad"));
        assert!(profiles.contains_key("good"));
    }

    #[test]
    fn test_metric_without_query_skips_document() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "noquery.yml",
            "name: noquery\nmetrics:\n  - name: Lonely\n    operator: \">\"\n    threshold: 1\n",
        );

        let profiles = load_profiles(dir.path()).unwrap();
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_duplicate_name_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "a.yml", "name: dup\ndescription: first\n");
        write_profile(dir.path(), "b.yml", "name: dup\ndescription: second\n");

        let profiles = load_profiles(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles["dup"].description, "first");
    }

    #[test]
    fn test_missing_directory_errors() {
        let err = load_profiles("/definitely/not/a/real/path").unwrap_err();
        assert!(matches!(err, WatchtowerError::ProfileDir { .. }));
    }

    #[test]
    fn test_non_yaml_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "notes.txt", "name: nope\n");
        write_profile(dir.path(), "svc.yml", "name: svc\n");

        let profiles = load_profiles(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles.contains_key("svc"));
    }

    #[test]
    fn test_expand_env_braced_with_default() {
        std::env::set_var("WT_TEST_SET", "from-env");
        assert_eq!(expand_env("${WT_TEST_SET:-fallback}"), "from-env");
        assert_eq!(expand_env("${WT_TEST_UNSET_XYZ:-fallback}"), "fallback");
        // No default: unresolved placeholder stays literal.
        assert_eq!(expand_env("${WT_TEST_UNSET_XYZ}"), "${WT_TEST_UNSET_XYZ}");
    }

    #[test]
    fn test_expand_env_empty_var_uses_default() {
        std::env::set_var("WT_TEST_EMPTY", "");
        assert_eq!(expand_env("${WT_TEST_EMPTY:-d}"), "d");
    }

    #[test]
    fn test_expand_env_bare() {
        std::env::set_var("WT_TEST_BARE", "v");
        assert_eq!(expand_env("prefix $WT_TEST_BARE suffix"), "prefix v suffix");
        assert_eq!(expand_env("$WT_TEST_UNSET_XYZ"), "$WT_TEST_UNSET_XYZ");
    }

    #[test]
    fn test_alert_pattern_index() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "a.yml", "name: api\nalert_pattern: ApiDown\n");
        write_profile(dir.path(), "b.yml", "name: db\n");

        let profiles = load_profiles(dir.path()).unwrap();
        let index = alert_pattern_index(&profiles);
        assert_eq!(index["ApiDown"], "api");
        assert_eq!(index["db"], "db");
    }
}
