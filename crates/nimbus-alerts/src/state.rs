//! Mutable notification bookkeeping: per-alert and global last-notified
//! times, the sliding hourly window, and a bounded delivery history.
//!
//! Updated only from the orchestrator's completion path; there are no
//! concurrent writers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use nimbus_core::types::Severity;

/// One delivered notification, retained in bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub alert_id: String,
    pub event: String,
    pub severity: Severity,
    pub notified_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NotificationState {
    last_by_alert: HashMap<String, DateTime<Utc>>,
    last_global: Option<DateTime<Utc>>,
    hourly_window: VecDeque<DateTime<Utc>>,
    history: VecDeque<NotificationRecord>,
    history_bound: usize,
}

impl NotificationState {
    pub fn new(history_bound: usize) -> Self {
        Self {
            last_by_alert: HashMap::new(),
            last_global: None,
            hourly_window: VecDeque::new(),
            history: VecDeque::new(),
            history_bound,
        }
    }

    pub fn last_for(&self, alert_id: &str) -> Option<DateTime<Utc>> {
        self.last_by_alert.get(alert_id).copied()
    }

    pub fn last_global(&self) -> Option<DateTime<Utc>> {
        self.last_global
    }

    /// Deliveries within the sliding hour ending at `now`.
    pub fn hourly_count(&mut self, now: DateTime<Utc>) -> usize {
        self.prune_window(now);
        self.hourly_window.len()
    }

    fn prune_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        while let Some(front) = self.hourly_window.front() {
            if *front <= cutoff {
                self.hourly_window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record one delivery: timestamps, window, and bounded history.
    /// Oldest history entries are evicted, never the new one rejected.
    pub fn record(&mut self, record: NotificationRecord) {
        self.last_by_alert.insert(record.alert_id.clone(), record.notified_at);
        self.last_global = Some(record.notified_at);
        self.hourly_window.push_back(record.notified_at);
        self.prune_window(record.notified_at);

        self.history.push_back(record);
        while self.history.len() > self.history_bound {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
