//! Deterministic provider ordering per location, mode, and capability.
//!
//! Auto mode policy: the NWS-style source is primary inside its coverage
//! region for the capabilities it serves (it is the only alert feed); the
//! grid source is primary elsewhere and appears in every ordering as the
//! gap-filler; the timeline source is tertiary and only participates when
//! its API key is configured. Pinned mode names exactly one provider with
//! no fallback.

use std::collections::BTreeMap;

use nimbus_core::types::{Capability, CapabilitySet, Location, ProviderId, SourceMode};

/// Rough CONUS bounding box; the NWS-style API covers nothing outside it.
const NWS_LAT_RANGE: (f64, f64) = (24.5, 49.5);
const NWS_LON_RANGE: (f64, f64) = (-125.0, -66.9);

/// Ordered provider lists, one per requested capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    per_capability: BTreeMap<Capability, Vec<ProviderId>>,
}

impl FetchPlan {
    pub fn providers_for(&self, capability: Capability) -> &[ProviderId] {
        self.per_capability
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All distinct providers anywhere in the plan, in first-appearance
    /// order. Used by the enrichment stage.
    pub fn distinct_providers(&self) -> Vec<ProviderId> {
        let mut seen = Vec::new();
        for order in self.per_capability.values() {
            for id in order {
                if !seen.contains(id) {
                    seen.push(*id);
                }
            }
        }
        seen
    }

    pub fn is_empty(&self) -> bool {
        self.per_capability.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone)]
pub struct SourceSelector {
    /// Whether the timeline provider is usable (API key configured).
    timeline_available: bool,
}

impl SourceSelector {
    pub fn new(timeline_available: bool) -> Self {
        Self { timeline_available }
    }

    /// Build the per-capability provider orderings for one request.
    /// Deterministic given (location, mode, capabilities).
    pub fn plan(
        &self,
        location: &Location,
        mode: SourceMode,
        capabilities: &CapabilitySet,
    ) -> FetchPlan {
        let base = match mode {
            SourceMode::Pinned(id) => vec![id],
            SourceMode::Auto => {
                let mut order = if nws_covers(location) {
                    vec![ProviderId::Nws, ProviderId::MeteoGrid]
                } else {
                    vec![ProviderId::MeteoGrid, ProviderId::Nws]
                };
                if self.timeline_available {
                    order.push(ProviderId::Timeline);
                }
                order
            }
        };

        let per_capability = capabilities
            .iter()
            .map(|cap| {
                let order: Vec<ProviderId> =
                    base.iter().copied().filter(|id| provider_serves(*id, cap)).collect();
                (cap, order)
            })
            .collect();

        FetchPlan { per_capability }
    }
}

/// Static capability coverage per source. Mirrors the `supports` impls; the
/// selector must not need live client instances to produce a plan.
fn provider_serves(id: ProviderId, capability: Capability) -> bool {
    match id {
        ProviderId::Nws => matches!(
            capability,
            Capability::Current | Capability::Forecast | Capability::Alerts
        ),
        ProviderId::MeteoGrid | ProviderId::Timeline => matches!(
            capability,
            Capability::Current | Capability::Forecast | Capability::Hourly
        ),
    }
}

fn nws_covers(location: &Location) -> bool {
    location.latitude >= NWS_LAT_RANGE.0
        && location.latitude <= NWS_LAT_RANGE.1
        && location.longitude >= NWS_LON_RANGE.0
        && location.longitude <= NWS_LON_RANGE.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us_location() -> Location {
        Location {
            id: "seattle".into(),
            name: "Seattle, WA".into(),
            latitude: 47.6062,
            longitude: -122.3321,
            timezone: None,
        }
    }

    fn eu_location() -> Location {
        Location {
            id: "lisbon".into(),
            name: "Lisbon".into(),
            latitude: 38.7223,
            longitude: -9.1393,
            timezone: None,
        }
    }

    #[test]
    fn test_auto_us_prefers_nws() {
        let selector = SourceSelector::new(false);
        let plan = selector.plan(&us_location(), SourceMode::Auto, &CapabilitySet::all());
        assert_eq!(
            plan.providers_for(Capability::Current),
            &[ProviderId::Nws, ProviderId::MeteoGrid]
        );
        assert_eq!(plan.providers_for(Capability::Alerts), &[ProviderId::Nws]);
        // NWS has no hourly; the grid source fills the gap rather than
        // leaving the capability empty
        assert_eq!(plan.providers_for(Capability::Hourly), &[ProviderId::MeteoGrid]);
    }

    #[test]
    fn test_auto_outside_coverage_prefers_grid() {
        let selector = SourceSelector::new(false);
        let plan = selector.plan(&eu_location(), SourceMode::Auto, &CapabilitySet::all());
        assert_eq!(
            plan.providers_for(Capability::Current),
            &[ProviderId::MeteoGrid, ProviderId::Nws]
        );
    }

    #[test]
    fn test_timeline_joins_only_with_key() {
        let without = SourceSelector::new(false)
            .plan(&us_location(), SourceMode::Auto, &CapabilitySet::all());
        assert!(!without.providers_for(Capability::Hourly).contains(&ProviderId::Timeline));

        let with = SourceSelector::new(true)
            .plan(&us_location(), SourceMode::Auto, &CapabilitySet::all());
        assert_eq!(
            with.providers_for(Capability::Hourly),
            &[ProviderId::MeteoGrid, ProviderId::Timeline]
        );
    }

    #[test]
    fn test_pinned_mode_has_no_fallback() {
        let selector = SourceSelector::new(true);
        let plan = selector.plan(
            &us_location(),
            SourceMode::Pinned(ProviderId::MeteoGrid),
            &CapabilitySet::all(),
        );
        assert_eq!(plan.providers_for(Capability::Current), &[ProviderId::MeteoGrid]);
        // Pinned provider lacks alerts: the capability stays empty
        assert!(plan.providers_for(Capability::Alerts).is_empty());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let selector = SourceSelector::new(true);
        let caps = CapabilitySet::all();
        let a = selector.plan(&us_location(), SourceMode::Auto, &caps);
        let b = selector.plan(&us_location(), SourceMode::Auto, &caps);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_providers() {
        let selector = SourceSelector::new(false);
        let plan = selector.plan(&us_location(), SourceMode::Auto, &CapabilitySet::all());
        let distinct = plan.distinct_providers();
        assert!(distinct.contains(&ProviderId::Nws));
        assert!(distinct.contains(&ProviderId::MeteoGrid));
        assert_eq!(distinct.len(), 2);
    }
}
