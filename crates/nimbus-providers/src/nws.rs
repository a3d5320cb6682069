//! NWS-style provider: point metadata lookup, gridpoint forecast periods,
//! CAP alert feed, and forecast discussion text.
//!
//! Point metadata is immutable per location and memoized after the first
//! lookup, so repeat fetches cost one request instead of two.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::instrument;

use nimbus_core::types::{
    AlertRecord, Capability, CurrentConditions, DayForecast, Location, ProviderId, Severity,
    WeatherCondition,
};

use crate::client::{
    get_json, timed_fetch, CapabilityPayload, ErrorKind, ProviderClient, ProviderExtras,
    ProviderResult,
};
use crate::retry::RetryConfig;

const NWS_API_BASE: &str = "https://api.weather.gov";

#[derive(Debug, Clone)]
struct GridPoint {
    office: String,
    x: i64,
    y: i64,
}

pub struct NwsClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    points: Mutex<HashMap<String, GridPoint>>,
}

impl NwsClient {
    pub fn new(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: NWS_API_BASE.to_string(),
            retry,
            points: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_with_base_url(client: reqwest::Client, retry: RetryConfig, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            retry,
            points: Mutex::new(HashMap::new()),
        }
    }

    async fn grid_point(&self, location: &Location) -> Result<GridPoint, ErrorKind> {
        if let Some(point) = self.points.lock().get(&location.id).cloned() {
            return Ok(point);
        }

        let url = format!(
            "{}/points/{:.4},{:.4}",
            self.base_url, location.latitude, location.longitude
        );
        let body: PointsResponse = get_json(&self.client, &url, &[], &self.retry).await?;
        let point = GridPoint {
            office: body.properties.grid_id,
            x: body.properties.grid_x,
            y: body.properties.grid_y,
        };
        self.points.lock().insert(location.id.clone(), point.clone());
        Ok(point)
    }

    async fn forecast_periods(&self, location: &Location) -> Result<Vec<ForecastPeriod>, ErrorKind> {
        let point = self.grid_point(location).await?;
        let url = format!(
            "{}/gridpoints/{}/{},{}/forecast",
            self.base_url, point.office, point.x, point.y
        );
        let body: ForecastResponse = get_json(&self.client, &url, &[], &self.retry).await?;
        if body.properties.periods.is_empty() {
            return Err(ErrorKind::InvalidResponse("forecast had no periods".into()));
        }
        Ok(body.properties.periods)
    }

    async fn fetch_current(&self, location: &Location) -> Result<CapabilityPayload, ErrorKind> {
        let periods = self.forecast_periods(location).await?;
        // First period stands in for current conditions on this API shape
        let now = &periods[0];
        Ok(CapabilityPayload::Current(CurrentConditions {
            temperature_c: fahrenheit_to_celsius(now.temperature),
            feels_like_c: None,
            humidity_pct: None,
            wind_speed_kmh: None,
            condition: WeatherCondition::from_text(&now.short_forecast),
            observed_at: parse_time(&now.start_time)?,
        }))
    }

    async fn fetch_forecast(&self, location: &Location) -> Result<CapabilityPayload, ErrorKind> {
        let periods = self.forecast_periods(location).await?;
        let mut days: Vec<DayForecast> = Vec::new();

        for period in &periods {
            // Group by the office's local calendar date; the UTC date would
            // push evening periods into the next day
            let date = parse_offset_time(&period.start_time)?.date_naive();
            let temp_c = fahrenheit_to_celsius(period.temperature);
            let chance = period
                .probability_of_precipitation
                .as_ref()
                .and_then(|p| p.value)
                .map(|v| v.clamp(0.0, 100.0) as u8);

            match days.last_mut() {
                Some(day) if day.date == date => {
                    day.high_c = day.high_c.max(temp_c);
                    day.low_c = day.low_c.min(temp_c);
                    if day.precipitation_chance_pct < chance {
                        day.precipitation_chance_pct = chance;
                    }
                }
                _ => days.push(DayForecast {
                    date,
                    high_c: temp_c,
                    low_c: temp_c,
                    condition: WeatherCondition::from_text(&period.short_forecast),
                    precipitation_chance_pct: chance,
                    summary: Some(period.short_forecast.clone()),
                }),
            }
        }

        Ok(CapabilityPayload::Forecast(days))
    }

    async fn fetch_alerts(&self, location: &Location) -> Result<CapabilityPayload, ErrorKind> {
        let url = format!(
            "{}/alerts/active?point={:.4},{:.4}",
            self.base_url, location.latitude, location.longitude
        );
        let body: AlertsResponse = get_json(&self.client, &url, &[], &self.retry).await?;

        let mut alerts = Vec::with_capacity(body.features.len());
        for feature in body.features {
            let p = feature.properties;
            let onset = parse_time(&p.onset)?;
            let id = p
                .id
                .unwrap_or_else(|| AlertRecord::synthesize_id(&p.event, &p.area_desc, onset));
            alerts.push(AlertRecord {
                id,
                event: p.event,
                headline: p.headline,
                area: p.area_desc,
                severity: Severity::from_cap(&p.severity),
                onset,
                expires: p.expires.as_deref().and_then(|t| parse_time(t).ok()),
                source: ProviderId::Nws,
            });
        }
        Ok(CapabilityPayload::Alerts(alerts))
    }
}

#[async_trait]
impl ProviderClient for NwsClient {
    fn id(&self) -> ProviderId {
        ProviderId::Nws
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::Current | Capability::Forecast | Capability::Alerts
        )
    }

    #[instrument(skip(self, location), fields(location = %location.id), level = "info")]
    async fn fetch(&self, location: &Location, capability: Capability) -> ProviderResult {
        timed_fetch(ProviderId::Nws, capability, || async {
            match capability {
                Capability::Current => self.fetch_current(location).await,
                Capability::Forecast => self.fetch_forecast(location).await,
                Capability::Alerts => self.fetch_alerts(location).await,
                Capability::Hourly => Err(ErrorKind::InvalidResponse(
                    "hourly not supported by this source".into(),
                )),
            }
        })
        .await
    }

    /// Forecast discussion text, when the office publishes one.
    async fn extras(&self, location: &Location) -> ProviderExtras {
        let point = match self.grid_point(location).await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(location = %location.id, %e, "discussion lookup skipped");
                return ProviderExtras::default();
            }
        };
        let url = format!(
            "{}/products/types/AFD/locations/{}/latest",
            self.base_url, point.office
        );
        match get_json::<DiscussionResponse>(&self.client, &url, &[], &self.retry).await {
            Ok(body) => ProviderExtras {
                discussion: Some(body.product_text),
                ..Default::default()
            },
            Err(e) => {
                tracing::debug!(location = %location.id, %e, "no forecast discussion");
                ProviderExtras::default()
            }
        }
    }
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

fn parse_offset_time(s: &str) -> Result<DateTime<FixedOffset>, ErrorKind> {
    DateTime::<FixedOffset>::parse_from_rfc3339(s)
        .map_err(|e| ErrorKind::InvalidResponse(format!("bad timestamp {s:?}: {e}")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ErrorKind> {
    parse_offset_time(s).map(|t| t.with_timezone(&Utc))
}

// Wire types

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: PointsProperties,
}

#[derive(Debug, Deserialize)]
struct PointsProperties {
    #[serde(rename = "gridId")]
    grid_id: String,
    #[serde(rename = "gridX")]
    grid_x: i64,
    #[serde(rename = "gridY")]
    grid_y: i64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: ForecastProperties,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
struct ForecastPeriod {
    #[serde(rename = "startTime")]
    start_time: String,
    temperature: f64,
    #[serde(rename = "shortForecast")]
    short_forecast: String,
    #[serde(rename = "probabilityOfPrecipitation")]
    probability_of_precipitation: Option<PrecipChance>,
}

#[derive(Debug, Deserialize)]
struct PrecipChance {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    id: Option<String>,
    event: String,
    headline: Option<String>,
    #[serde(rename = "areaDesc")]
    area_desc: String,
    severity: String,
    onset: String,
    expires: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscussionResponse {
    #[serde(rename = "productText")]
    product_text: String,
}
