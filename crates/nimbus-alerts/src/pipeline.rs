//! Alert notification pipeline: severity filtering, cooldowns, the hourly
//! sliding cap, and the escalation override for high-severity alerts.
//!
//! Decision order per record:
//! 1. severity enabled?
//! 2. per-alert cooldown (escalation severities use the shorter escalation
//!    cooldown instead)
//! 3. global cooldown (skipped for escalation severities)
//! 4. hourly sliding cap (skipped for escalation severities)
//! 5. deliver + update state

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedSender;

use nimbus_core::config::AlertConfig;
use nimbus_core::types::AlertRecord;

use crate::state::{NotificationRecord, NotificationState};

/// One delivered notification, consumed by the desktop-notification
/// collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub alert: AlertRecord,
    pub delivered_at: DateTime<Utc>,
    /// Whether the escalation override applied.
    pub escalated: bool,
}

/// Why a record did or did not produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Notify,
    SeverityDisabled,
    Expired,
    DuplicateInBatch,
    PerAlertCooldown,
    GlobalCooldown,
    HourlyCapReached,
}

pub struct AlertPipeline {
    config: AlertConfig,
    state: NotificationState,
    events: UnboundedSender<NotificationEvent>,
}

impl AlertPipeline {
    pub fn new(config: AlertConfig, events: UnboundedSender<NotificationEvent>) -> Self {
        let state = NotificationState::new(config.history_bound);
        Self { config, state, events }
    }

    /// Run one fused alert batch through the decision chain. Duplicate ids
    /// within a batch are processed once. Returns the per-record decisions
    /// (diagnostics and tests).
    pub fn process(&mut self, alerts: &[AlertRecord], now: DateTime<Utc>) -> Vec<Decision> {
        let mut seen: Vec<&str> = Vec::new();
        let mut decisions = Vec::with_capacity(alerts.len());

        for alert in alerts {
            if seen.contains(&alert.id.as_str()) {
                decisions.push(Decision::DuplicateInBatch);
                continue;
            }
            seen.push(&alert.id);

            let decision = self.evaluate(alert, now);
            decisions.push(decision);

            if decision == Decision::Notify {
                self.deliver(alert, now);
            } else {
                tracing::debug!(
                    alert_id = %alert.id,
                    severity = alert.severity.as_str(),
                    ?decision,
                    "alert suppressed"
                );
            }
        }
        decisions
    }

    fn evaluate(&mut self, alert: &AlertRecord, now: DateTime<Utc>) -> Decision {
        if !self.config.enabled_severities.contains(&alert.severity) {
            return Decision::SeverityDisabled;
        }

        if let Some(expires) = alert.expires {
            if expires <= now {
                return Decision::Expired;
            }
        }

        let escalated = self.config.escalation_severities.contains(&alert.severity);

        let per_alert_cooldown = if escalated {
            Duration::seconds(self.config.escalation_cooldown_secs as i64)
        } else {
            Duration::seconds(self.config.per_alert_cooldown_secs as i64)
        };
        if let Some(last) = self.state.last_for(&alert.id) {
            if now - last < per_alert_cooldown {
                return Decision::PerAlertCooldown;
            }
        }

        if !escalated {
            if let Some(last) = self.state.last_global() {
                if now - last < Duration::seconds(self.config.global_cooldown_secs as i64) {
                    return Decision::GlobalCooldown;
                }
            }
            if self.state.hourly_count(now) >= self.config.hourly_cap {
                return Decision::HourlyCapReached;
            }
        }

        Decision::Notify
    }

    fn deliver(&mut self, alert: &AlertRecord, now: DateTime<Utc>) {
        let escalated = self.config.escalation_severities.contains(&alert.severity);
        tracing::info!(
            alert_id = %alert.id,
            event = %alert.event,
            severity = alert.severity.as_str(),
            escalated,
            "delivering notification"
        );

        self.state.record(NotificationRecord {
            alert_id: alert.id.clone(),
            event: alert.event.clone(),
            severity: alert.severity,
            notified_at: now,
        });

        let event = NotificationEvent { alert: alert.clone(), delivered_at: now, escalated };
        if self.events.send(event).is_err() {
            // Receiver gone: the notification collaborator shut down.
            tracing::debug!("notification channel closed, event dropped");
        }
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nimbus_core::types::{ProviderId, Severity};
    use tokio::sync::mpsc;

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn alert(id: &str, severity: Severity) -> AlertRecord {
        AlertRecord {
            id: id.into(),
            event: "Test Warning".into(),
            headline: None,
            area: "Test Area".into(),
            severity,
            onset: at(0),
            expires: None,
            source: ProviderId::Nws,
        }
    }

    fn pipeline() -> (AlertPipeline, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AlertPipeline::new(AlertConfig::default(), tx), rx)
    }

    #[test]
    fn test_enabled_severity_delivers() {
        let (mut p, mut rx) = pipeline();
        let decisions = p.process(&[alert("a", Severity::Severe)], at(0));
        assert_eq!(decisions, vec![Decision::Notify]);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.alert.id, "a");
        assert!(!event.escalated);
    }

    #[test]
    fn test_disabled_severity_never_delivers() {
        // Minor is not in the default enabled set; rate limiter state is
        // irrelevant
        let (mut p, mut rx) = pipeline();
        let decisions = p.process(&[alert("a", Severity::Minor)], at(0));
        assert_eq!(decisions, vec![Decision::SeverityDisabled]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_per_alert_cooldown_suppresses_repeat() {
        let (mut p, _rx) = pipeline();
        assert_eq!(p.process(&[alert("a", Severity::Severe)], at(0)), vec![Decision::Notify]);
        // 30 min later: inside the 60 min per-alert cooldown
        assert_eq!(
            p.process(&[alert("a", Severity::Severe)], at(30)),
            vec![Decision::PerAlertCooldown]
        );
        // 61 min later: allowed again
        assert_eq!(p.process(&[alert("a", Severity::Severe)], at(61)), vec![Decision::Notify]);
    }

    #[test]
    fn test_global_cooldown_across_alerts() {
        let (mut p, _rx) = pipeline();
        assert_eq!(p.process(&[alert("a", Severity::Severe)], at(0)), vec![Decision::Notify]);
        // Different alert 2 min later: inside the 5 min global cooldown
        assert_eq!(
            p.process(&[alert("b", Severity::Severe)], at(2)),
            vec![Decision::GlobalCooldown]
        );
        assert_eq!(p.process(&[alert("b", Severity::Severe)], at(6)), vec![Decision::Notify]);
    }

    #[test]
    fn test_extreme_bypasses_global_cooldown() {
        let (mut p, mut rx) = pipeline();
        assert_eq!(p.process(&[alert("a", Severity::Extreme)], at(0)), vec![Decision::Notify]);
        // A second Extreme alert within the global window still delivers
        assert_eq!(p.process(&[alert("b", Severity::Extreme)], at(1)), vec![Decision::Notify]);
        assert!(rx.try_recv().unwrap().escalated);
        assert!(rx.try_recv().unwrap().escalated);
    }

    #[test]
    fn test_extreme_repeat_uses_escalation_cooldown() {
        let (mut p, _rx) = pipeline();
        assert_eq!(p.process(&[alert("a", Severity::Extreme)], at(0)), vec![Decision::Notify]);
        // Same alert 10 min later: inside the 15 min escalation cooldown
        assert_eq!(
            p.process(&[alert("a", Severity::Extreme)], at(10)),
            vec![Decision::PerAlertCooldown]
        );
        // 16 min later: allowed, well inside the normal 60 min cooldown
        assert_eq!(p.process(&[alert("a", Severity::Extreme)], at(16)), vec![Decision::Notify]);
    }

    #[test]
    fn test_hourly_cap_enforced() {
        let mut config = AlertConfig::default();
        config.global_cooldown_secs = 0;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut p2 = AlertPipeline::new(config, tx);

        for i in 0..10i64 {
            let decisions = p2.process(&[alert(&format!("a{i}"), Severity::Severe)], at(i));
            assert_eq!(decisions, vec![Decision::Notify], "delivery {i} should pass");
        }
        // 11th non-escalation delivery within the hour is capped
        assert_eq!(
            p2.process(&[alert("a10", Severity::Severe)], at(10)),
            vec![Decision::HourlyCapReached]
        );
        // Extreme still goes through
        assert_eq!(p2.process(&[alert("x", Severity::Extreme)], at(11)), vec![Decision::Notify]);
        // Window slides: an hour after the first delivery there is room
        assert_eq!(p2.process(&[alert("a11", Severity::Severe)], at(62)), vec![Decision::Notify]);
    }

    #[test]
    fn test_expired_alert_skipped() {
        let (mut p, _rx) = pipeline();
        let mut a = alert("a", Severity::Severe);
        a.expires = Some(at(5));
        assert_eq!(p.process(&[a], at(10)), vec![Decision::Expired]);
    }

    #[test]
    fn test_duplicate_ids_in_batch_processed_once() {
        let (mut p, mut rx) = pipeline();
        let decisions =
            p.process(&[alert("a", Severity::Severe), alert("a", Severity::Severe)], at(0));
        assert_eq!(decisions, vec![Decision::Notify, Decision::DuplicateInBatch]);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_history_stays_bounded() {
        let mut config = AlertConfig::default();
        config.global_cooldown_secs = 0;
        config.hourly_cap = 1000;
        config.history_bound = 5;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut p = AlertPipeline::new(config, tx);

        for i in 0..20i64 {
            p.process(&[alert(&format!("a{i}"), Severity::Severe)], at(i));
        }
        assert_eq!(p.state().history_len(), 5);
    }
}
