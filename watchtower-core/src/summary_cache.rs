//! # Summary Cache — Time-bounded memo of oracle verdicts
//!
//! Keyed by the content hash of the input correlation bundle. A fresh entry
//! short-circuits the oracle entirely; a miss or an expired entry invokes it
//! and stores the result. Failed calls store nothing, so callers keep their
//! last successful verdicts.

use crate::error::WatchtowerResult;
use crate::fingerprint::{hash_data, short_hash};
use crate::summarizer::{summarize_all, Summarize};
use crate::types::{Correlation, Verdict};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub const DEFAULT_CACHE_TTL_SECS: i64 = 15 * 60;

struct CachedVerdicts {
    verdicts: HashMap<String, Verdict>,
    created: DateTime<Utc>,
    ttl: Duration,
}

pub struct SummaryCache {
    entries: Mutex<HashMap<String, CachedVerdicts>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return cached verdicts for this bundle, or invoke the oracle and
    /// store the result. Empty bundles never reach the oracle.
    pub async fn get_or_summarize(
        &self,
        oracle: &dyn Summarize,
        correlations: &[Correlation],
    ) -> WatchtowerResult<HashMap<String, Verdict>> {
        if correlations.is_empty() {
            debug!("No correlations, skipping summarizer");
            return Ok(HashMap::new());
        }

        let key = hash_data(&correlations);

        {
            let entries = self.entries.lock();
            if let Some(cached) = entries.get(&key) {
                if Utc::now() - cached.created < cached.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %short_hash(&key), "Summary cache hit");
                    return Ok(cached.verdicts.clone());
                }
                debug!(key = %short_hash(&key), "Summary cache entry expired");
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        info!(key = %short_hash(&key), services = correlations.len(), "Summary cache miss, invoking oracle");

        let verdicts = summarize_all(oracle, correlations).await?;

        self.entries.lock().insert(
            key,
            CachedVerdicts {
                verdicts: verdicts.clone(),
                created: Utc::now(),
                ttl: self.ttl,
            },
        );

        Ok(verdicts)
    }

    /// Drop expired entries. Called once per tick before use.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, cached| now - cached.created <= cached.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Expired summary cache entries removed");
        }
    }

    /// Drop everything. For tests.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
