//! Shared domain types for the weather orchestration core.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A resolved geographic location, supplied by the geocoding collaborator.
///
/// Immutable once created; identity is the `id` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Option<String>,
}

/// One fetchable kind of weather data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Current,
    Forecast,
    Hourly,
    Alerts,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Forecast => "forecast",
            Self::Hourly => "hourly",
            Self::Alerts => "alerts",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities a request asks for.
///
/// Backed by a `BTreeSet` so iteration order (and the fingerprint derived
/// from it) is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four capabilities.
    pub fn all() -> Self {
        Self(BTreeSet::from([
            Capability::Current,
            Capability::Forecast,
            Capability::Hourly,
            Capability::Alerts,
        ]))
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.0.insert(cap);
        self
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable textual form used in fingerprints, e.g. `current+forecast`.
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(Capability::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identifies one of the configured weather data sources.
///
/// A closed set: new providers are added here and behind the
/// `ProviderClient` trait, never type-checked at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// NWS-style point/gridpoint API with CAP alerts.
    Nws,
    /// Grid-interpolated model API (WMO codes, sun times, air quality).
    MeteoGrid,
    /// Interval-timeline API behind an API key.
    Timeline,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nws => "nws",
            Self::MeteoGrid => "meteogrid",
            Self::Timeline => "timeline",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How providers are chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Geography picks the primary; others fall back / fill gaps.
    #[default]
    Auto,
    /// Exactly one provider, no fallback.
    Pinned(ProviderId),
}

impl SourceMode {
    pub fn key(&self) -> String {
        match self {
            Self::Auto => "auto".to_string(),
            Self::Pinned(id) => format!("pinned:{id}"),
        }
    }
}

/// A single fetch target: location + capabilities + source mode.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub location: Location,
    pub capabilities: CapabilitySet,
    pub mode: SourceMode,
}

impl FetchRequest {
    pub fn new(location: Location, capabilities: CapabilitySet, mode: SourceMode) -> Self {
        Self { location, capabilities, mode }
    }

    /// The cache/coalescing key for this request.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.location, &self.capabilities, &self.mode)
    }
}

/// Deterministic key identifying a (location, capabilities, mode) target.
///
/// A formatted string rather than a numeric hash: stable across runs and
/// versions, readable in logs, and directly usable as a database key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(location: &Location, caps: &CapabilitySet, mode: &SourceMode) -> Self {
        Self(format!("loc={};caps={};mode={}", location.id, caps.key(), mode.key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear, // Unknown codes default to clear
        }
    }

    /// Best-effort mapping from free-text forecast phrases (NWS-style APIs
    /// return prose, not codes).
    pub fn from_text(text: &str) -> Self {
        let t = text.to_lowercase();
        if t.contains("thunder") {
            Self::Thunderstorm
        } else if t.contains("sleet") || t.contains("freezing") {
            Self::Sleet
        } else if t.contains("snow") || t.contains("flurr") {
            Self::Snow
        } else if t.contains("heavy rain") || t.contains("downpour") {
            Self::HeavyRain
        } else if t.contains("rain") || t.contains("shower") {
            Self::Rain
        } else if t.contains("drizzle") {
            Self::Drizzle
        } else if t.contains("fog") || t.contains("haze") || t.contains("mist") {
            Self::Fog
        } else if t.contains("mostly cloudy") || t.contains("overcast") {
            Self::Cloudy
        } else if t.contains("cloud") {
            Self::PartlyCloudy
        } else {
            Self::Clear
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }
}

/// Current weather conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature_c: f64,
    pub feels_like_c: Option<f64>,
    pub humidity_pct: Option<u8>,
    pub wind_speed_kmh: Option<f64>,
    pub condition: WeatherCondition,
    pub observed_at: DateTime<Utc>,
}

/// Hourly forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: DateTime<Utc>,
    pub temperature_c: f64,
    pub condition: WeatherCondition,
    pub precipitation_chance_pct: Option<u8>,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub date: NaiveDate,
    pub high_c: f64,
    pub low_c: f64,
    pub condition: WeatherCondition,
    pub precipitation_chance_pct: Option<u8>,
    pub summary: Option<String>,
}

/// Sunrise/sunset, filled during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise: NaiveTime,
    pub sunset: NaiveTime,
}

/// Air quality index, filled during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub aqi: u16,
    pub pollutant: Option<String>,
}

/// CAP-style alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl Severity {
    /// Parse a CAP severity string, case-insensitively.
    pub fn from_cap(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "minor" => Self::Minor,
            "moderate" => Self::Moderate,
            "severe" => Self::Severe,
            "extreme" => Self::Extreme,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Extreme => "extreme",
        }
    }
}

/// One weather alert from a provider, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Stable unique id: the source's id when it supplies one, otherwise
    /// synthesized from event + area + onset.
    pub id: String,
    pub event: String,
    pub headline: Option<String>,
    pub area: String,
    pub severity: Severity,
    pub onset: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub source: ProviderId,
}

impl AlertRecord {
    /// Synthesize a stable id for providers that don't supply one.
    pub fn synthesize_id(event: &str, area: &str, onset: DateTime<Utc>) -> String {
        format!("{}|{}|{}", event, area, onset.to_rfc3339())
    }
}

/// The state of one capability slot within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SnapshotField<T> {
    /// The capability was not part of the request.
    NotRequested,
    /// Data present, with the provider that supplied it.
    Available { source: ProviderId, value: T },
    /// Every configured provider failed for this capability.
    AllProvidersFailed,
}

impl<T> SnapshotField<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Available { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<ProviderId> {
        match self {
            Self::Available { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Extra data attached during enrichment, with its supplying provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enriched<T> {
    pub source: ProviderId,
    pub value: T,
}

/// The fused, multi-provider result of one fetch cycle.
///
/// Every field carries provenance. Mutated only by the orchestrator during
/// enrichment; persisted whole or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location_id: String,
    pub current: SnapshotField<CurrentConditions>,
    pub forecast: SnapshotField<Vec<DayForecast>>,
    pub hourly: SnapshotField<Vec<HourlyForecast>>,
    pub alerts: SnapshotField<Vec<AlertRecord>>,
    pub sun: Option<Enriched<SunTimes>>,
    pub air_quality: Option<Enriched<AirQuality>>,
    pub discussion: Option<Enriched<String>>,
    pub fetched_at: DateTime<Utc>,
    /// Set when this snapshot is being served past its soft TTL because a
    /// refresh cycle failed outright.
    #[serde(default)]
    pub stale_forced: bool,
}

impl WeatherSnapshot {
    /// An empty snapshot for a cycle that is about to be filled in.
    pub fn empty(location_id: &str, fetched_at: DateTime<Utc>) -> Self {
        Self {
            location_id: location_id.to_string(),
            current: SnapshotField::NotRequested,
            forecast: SnapshotField::NotRequested,
            hourly: SnapshotField::NotRequested,
            alerts: SnapshotField::NotRequested,
            sun: None,
            air_quality: None,
            discussion: None,
            fetched_at,
            stale_forced: false,
        }
    }

    /// True if no requested capability produced data.
    pub fn is_empty_of_data(&self) -> bool {
        !self.current.is_available()
            && !self.forecast.is_available()
            && !self.hourly.is_available()
            && !self.alerts.is_available()
    }

    /// Age of this snapshot at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }
}
