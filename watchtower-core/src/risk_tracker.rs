//! # Risk Tracker — TTL-keyed table of at-risk services
//!
//! One entry per service. Re-observed alerts refresh `last_seen` and carry
//! the most recent alert name and severity; entries silent for longer than
//! their TTL are expired on cleanup. All access serializes through a mutex
//! so test harnesses and future listeners see a consistent view.

use crate::types::{Alert, RiskItem};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

pub const DEFAULT_RISK_TTL_SECS: i64 = 120;

pub struct RiskTracker {
    items: Mutex<HashMap<String, RiskItem>>,
    ttl: Duration,
}

impl RiskTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Refresh tracked entries from the current set of firing alerts.
    pub fn update_from_alerts(&self, alerts: &[Alert]) {
        let now = Utc::now();
        let mut items = self.items.lock();

        for alert in alerts {
            match items.get_mut(&alert.service) {
                Some(item) => {
                    item.last_seen = now;
                    item.alert_name = alert.name.clone();
                    item.severity = alert.severity.clone();
                    item.ttl = self.ttl;
                }
                None => {
                    debug!(service = %alert.service, alert = %alert.name, "Tracking new risk");
                    items.insert(
                        alert.service.clone(),
                        RiskItem {
                            service: alert.service.clone(),
                            alert_name: alert.name.clone(),
                            severity: alert.severity.clone(),
                            first_seen: now,
                            last_seen: now,
                            ttl: self.ttl,
                        },
                    );
                }
            }
        }
    }

    /// Drop entries whose alert has been silent for longer than the TTL.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut items = self.items.lock();
        items.retain(|service, item| {
            let alive = now - item.last_seen <= item.ttl;
            if !alive {
                info!(service = %service, "Risk expired");
            }
            alive
        });
    }

    /// Current items, stably ordered by service name.
    pub fn items(&self) -> Vec<RiskItem> {
        let items = self.items.lock();
        let mut out: Vec<RiskItem> = items.values().cloned().collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
