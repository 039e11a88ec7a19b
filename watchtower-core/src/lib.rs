//! # Watchtower Core — Continuous observability correlator
//!
//! On a fixed interval the orchestrating binary pulls firing alerts from the
//! metrics backend, joins them against application logs and live metric
//! readings, and publishes per-service risk records. This crate holds the
//! correlation core: the profile table, the at-risk tracker, the log and
//! metric matchers, the change gate deciding when the natural-language
//! summarizer runs, and the time-bounded verdict cache.

pub mod correlator;
pub mod error;
pub mod fingerprint;
pub mod log_store;
pub mod profiles;
pub mod prometheus;
pub mod publisher;
pub mod risk_tracker;
pub mod summarizer;
pub mod summary_cache;
pub mod types;

pub use error::{WatchtowerError, WatchtowerResult};
