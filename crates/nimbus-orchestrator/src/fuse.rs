//! Fusing provider results into a snapshot, and the enrichment fill rules.

use chrono::{DateTime, Utc};

use nimbus_core::types::{
    AlertRecord, Capability, CapabilitySet, Enriched, ProviderId, SnapshotField, WeatherSnapshot,
};
use nimbus_providers::client::{CapabilityPayload, ProviderExtras};

/// The winning payload for one capability, or the marker that every
/// provider failed.
pub type CapabilityOutcome = Option<(ProviderId, CapabilityPayload)>;

/// Build a snapshot from per-capability fan-out outcomes. Requested
/// capabilities with no winner get the `AllProvidersFailed` marker;
/// unrequested ones stay `NotRequested`.
pub fn fuse(
    location_id: &str,
    fetched_at: DateTime<Utc>,
    requested: &CapabilitySet,
    outcomes: Vec<(Capability, CapabilityOutcome)>,
) -> WeatherSnapshot {
    let mut snapshot = WeatherSnapshot::empty(location_id, fetched_at);

    for cap in requested.iter() {
        match cap {
            Capability::Current => snapshot.current = SnapshotField::AllProvidersFailed,
            Capability::Forecast => snapshot.forecast = SnapshotField::AllProvidersFailed,
            Capability::Hourly => snapshot.hourly = SnapshotField::AllProvidersFailed,
            Capability::Alerts => snapshot.alerts = SnapshotField::AllProvidersFailed,
        }
    }

    for (capability, outcome) in outcomes {
        let Some((source, payload)) = outcome else {
            continue;
        };
        match (capability, payload) {
            (Capability::Current, CapabilityPayload::Current(value)) => {
                snapshot.current = SnapshotField::Available { source, value };
            }
            (Capability::Forecast, CapabilityPayload::Forecast(value)) => {
                snapshot.forecast = SnapshotField::Available { source, value };
            }
            (Capability::Hourly, CapabilityPayload::Hourly(value)) => {
                snapshot.hourly = SnapshotField::Available { source, value };
            }
            (Capability::Alerts, CapabilityPayload::Alerts(value)) => {
                snapshot.alerts = SnapshotField::Available { source, value };
            }
            (capability, payload) => {
                tracing::warn!(
                    %capability,
                    got = payload.capability().as_str(),
                    "provider returned mismatched payload, dropping"
                );
            }
        }
    }

    snapshot
}

/// Merge alert sets from multiple providers, deduplicating by stable id.
/// On id collision the record with the higher severity wins.
pub fn merge_alerts(sets: Vec<Vec<AlertRecord>>) -> Vec<AlertRecord> {
    let mut merged: Vec<AlertRecord> = Vec::new();
    for set in sets {
        for alert in set {
            match merged.iter_mut().find(|a| a.id == alert.id) {
                Some(existing) => {
                    if alert.severity > existing.severity {
                        *existing = alert;
                    }
                }
                None => merged.push(alert),
            }
        }
    }
    merged
}

/// Apply one provider's enrichment extras. Fill-only: enrichment never
/// overwrites a field an earlier provider already supplied.
pub fn apply_extras(snapshot: &mut WeatherSnapshot, source: ProviderId, extras: ProviderExtras) {
    if snapshot.sun.is_none() {
        if let Some(value) = extras.sun {
            snapshot.sun = Some(Enriched { source, value });
        }
    }
    if snapshot.air_quality.is_none() {
        if let Some(value) = extras.air_quality {
            snapshot.air_quality = Some(Enriched { source, value });
        }
    }
    if snapshot.discussion.is_none() {
        if let Some(value) = extras.discussion {
            snapshot.discussion = Some(Enriched { source, value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nimbus_core::types::{CurrentConditions, Severity, SunTimes, WeatherCondition};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn current() -> CurrentConditions {
        CurrentConditions {
            temperature_c: 10.0,
            feels_like_c: None,
            humidity_pct: None,
            wind_speed_kmh: None,
            condition: WeatherCondition::Clear,
            observed_at: now(),
        }
    }

    fn alert(id: &str, severity: Severity) -> AlertRecord {
        AlertRecord {
            id: id.into(),
            event: "Test".into(),
            headline: None,
            area: "Area".into(),
            severity,
            onset: now(),
            expires: None,
            source: ProviderId::Nws,
        }
    }

    #[test]
    fn test_fuse_marks_failed_capabilities() {
        let requested = CapabilitySet::new().with(Capability::Current).with(Capability::Alerts);
        let snapshot = fuse(
            "x",
            now(),
            &requested,
            vec![
                (Capability::Current, Some((ProviderId::MeteoGrid, CapabilityPayload::Current(current())))),
                (Capability::Alerts, None),
            ],
        );
        assert_eq!(snapshot.current.source(), Some(ProviderId::MeteoGrid));
        assert_eq!(snapshot.alerts, SnapshotField::AllProvidersFailed);
        assert_eq!(snapshot.hourly, SnapshotField::NotRequested);
        assert!(!snapshot.is_empty_of_data());
    }

    #[test]
    fn test_fuse_all_failed_is_empty() {
        let requested = CapabilitySet::new().with(Capability::Current);
        let snapshot = fuse("x", now(), &requested, vec![(Capability::Current, None)]);
        assert!(snapshot.is_empty_of_data());
    }

    #[test]
    fn test_merge_alerts_dedupes_by_id() {
        let merged = merge_alerts(vec![
            vec![alert("a", Severity::Moderate), alert("b", Severity::Severe)],
            vec![alert("a", Severity::Extreme), alert("c", Severity::Minor)],
        ]);
        assert_eq!(merged.len(), 3);
        let a = merged.iter().find(|r| r.id == "a").unwrap();
        // Higher severity wins the collision
        assert_eq!(a.severity, Severity::Extreme);
    }

    #[test]
    fn test_apply_extras_fill_only() {
        let mut snapshot = WeatherSnapshot::empty("x", now());
        let sun = SunTimes {
            sunrise: chrono::NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            sunset: chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        apply_extras(
            &mut snapshot,
            ProviderId::MeteoGrid,
            ProviderExtras { sun: Some(sun.clone()), ..Default::default() },
        );
        assert_eq!(snapshot.sun.as_ref().map(|e| e.source), Some(ProviderId::MeteoGrid));

        // A later provider cannot overwrite
        let other = SunTimes {
            sunrise: chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            sunset: chrono::NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        };
        apply_extras(
            &mut snapshot,
            ProviderId::Timeline,
            ProviderExtras { sun: Some(other), ..Default::default() },
        );
        assert_eq!(snapshot.sun.as_ref().map(|e| e.source), Some(ProviderId::MeteoGrid));
        assert_eq!(snapshot.sun.as_ref().unwrap().value, sun);
    }
}
