//! Grid-interpolated model provider: one JSON document carrying current,
//! hourly, and daily blocks keyed by parallel arrays, WMO condition codes,
//! plus sun times and an air-quality endpoint used during enrichment.
//!
//! No API key and global coverage, which makes it the universal gap-filler
//! in auto mode. It carries no alert feed.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::instrument;

use nimbus_core::types::{
    AirQuality, Capability, CurrentConditions, DayForecast, HourlyForecast, Location, ProviderId,
    SunTimes, WeatherCondition,
};

use crate::client::{
    get_json, timed_fetch, CapabilityPayload, ErrorKind, ProviderClient, ProviderExtras,
    ProviderResult,
};
use crate::retry::RetryConfig;

const METEOGRID_API_BASE: &str = "https://api.open-meteo.com";

pub struct MeteoGridClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl MeteoGridClient {
    pub fn new(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self {
            client,
            base_url: METEOGRID_API_BASE.to_string(),
            retry,
        }
    }

    pub fn new_with_base_url(client: reqwest::Client, retry: RetryConfig, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            retry,
        }
    }

    async fn forecast_document(&self, location: &Location) -> Result<ForecastDocument, ErrorKind> {
        let url = format!(
            "{}/v1/forecast?latitude={:.4}&longitude={:.4}\
             &current=temperature_2m,apparent_temperature,relative_humidity_2m,wind_speed_10m,weather_code\
             &hourly=temperature_2m,weather_code,precipitation_probability\
             &daily=temperature_2m_max,temperature_2m_min,weather_code,precipitation_probability_max,sunrise,sunset\
             &timezone=UTC",
            self.base_url, location.latitude, location.longitude
        );
        get_json(&self.client, &url, &[], &self.retry).await
    }

    fn parse_current(doc: &ForecastDocument) -> Result<CurrentConditions, ErrorKind> {
        let current = doc
            .current
            .as_ref()
            .ok_or_else(|| ErrorKind::InvalidResponse("missing current block".into()))?;
        Ok(CurrentConditions {
            temperature_c: current.temperature_2m,
            feels_like_c: current.apparent_temperature,
            humidity_pct: current.relative_humidity_2m.map(|h| h.clamp(0.0, 100.0) as u8),
            wind_speed_kmh: current.wind_speed_10m,
            condition: WeatherCondition::from_wmo_code(current.weather_code),
            observed_at: parse_minute_time(&current.time)?,
        })
    }

    fn parse_hourly(doc: &ForecastDocument) -> Result<Vec<HourlyForecast>, ErrorKind> {
        let hourly = doc
            .hourly
            .as_ref()
            .ok_or_else(|| ErrorKind::InvalidResponse("missing hourly block".into()))?;
        if hourly.time.len() != hourly.temperature_2m.len()
            || hourly.time.len() != hourly.weather_code.len()
        {
            return Err(ErrorKind::InvalidResponse("ragged hourly arrays".into()));
        }

        let mut entries = Vec::with_capacity(hourly.time.len());
        for (i, time) in hourly.time.iter().enumerate() {
            entries.push(HourlyForecast {
                time: parse_minute_time(time)?,
                temperature_c: hourly.temperature_2m[i],
                condition: WeatherCondition::from_wmo_code(hourly.weather_code[i]),
                precipitation_chance_pct: hourly
                    .precipitation_probability
                    .as_ref()
                    .and_then(|p| p.get(i).copied().flatten())
                    .map(|v| v.clamp(0.0, 100.0) as u8),
            });
        }
        Ok(entries)
    }

    fn parse_daily(doc: &ForecastDocument) -> Result<Vec<DayForecast>, ErrorKind> {
        let daily = doc
            .daily
            .as_ref()
            .ok_or_else(|| ErrorKind::InvalidResponse("missing daily block".into()))?;
        if daily.time.len() != daily.temperature_2m_max.len()
            || daily.time.len() != daily.temperature_2m_min.len()
        {
            return Err(ErrorKind::InvalidResponse("ragged daily arrays".into()));
        }

        let mut days = Vec::with_capacity(daily.time.len());
        for (i, date) in daily.time.iter().enumerate() {
            days.push(DayForecast {
                date: parse_date(date)?,
                high_c: daily.temperature_2m_max[i],
                low_c: daily.temperature_2m_min[i],
                condition: WeatherCondition::from_wmo_code(
                    daily.weather_code.get(i).copied().unwrap_or_default(),
                ),
                precipitation_chance_pct: daily
                    .precipitation_probability_max
                    .as_ref()
                    .and_then(|p| p.get(i).copied().flatten())
                    .map(|v| v.clamp(0.0, 100.0) as u8),
                summary: None,
            });
        }
        Ok(days)
    }

    fn parse_sun(doc: &ForecastDocument) -> Option<SunTimes> {
        let daily = doc.daily.as_ref()?;
        let sunrise = daily.sunrise.as_ref()?.first()?;
        let sunset = daily.sunset.as_ref()?.first()?;
        Some(SunTimes {
            sunrise: parse_minute_time(sunrise).ok()?.time(),
            sunset: parse_minute_time(sunset).ok()?.time(),
        })
    }

    async fn air_quality(&self, location: &Location) -> Option<AirQuality> {
        let url = format!(
            "{}/v1/air-quality?latitude={:.4}&longitude={:.4}&current=us_aqi",
            self.base_url, location.latitude, location.longitude
        );
        match get_json::<AirQualityDocument>(&self.client, &url, &[], &self.retry).await {
            Ok(doc) => doc.current.map(|c| AirQuality {
                aqi: c.us_aqi.clamp(0.0, u16::MAX as f64) as u16,
                pollutant: c.dominant_pollutant,
            }),
            Err(e) => {
                tracing::debug!(location = %location.id, %e, "air quality unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl ProviderClient for MeteoGridClient {
    fn id(&self) -> ProviderId {
        ProviderId::MeteoGrid
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::Current | Capability::Forecast | Capability::Hourly
        )
    }

    #[instrument(skip(self, location), fields(location = %location.id), level = "info")]
    async fn fetch(&self, location: &Location, capability: Capability) -> ProviderResult {
        timed_fetch(ProviderId::MeteoGrid, capability, || async {
            let doc = self.forecast_document(location).await?;
            match capability {
                Capability::Current => Self::parse_current(&doc).map(CapabilityPayload::Current),
                Capability::Forecast => Self::parse_daily(&doc).map(CapabilityPayload::Forecast),
                Capability::Hourly => Self::parse_hourly(&doc).map(CapabilityPayload::Hourly),
                Capability::Alerts => Err(ErrorKind::InvalidResponse(
                    "alerts not supported by this source".into(),
                )),
            }
        })
        .await
    }

    /// Sun times from the daily block plus the air-quality endpoint.
    async fn extras(&self, location: &Location) -> ProviderExtras {
        let sun = match self.forecast_document(location).await {
            Ok(doc) => Self::parse_sun(&doc),
            Err(e) => {
                tracing::debug!(location = %location.id, %e, "sun times unavailable");
                None
            }
        };
        ProviderExtras {
            sun,
            air_quality: self.air_quality(location).await,
            discussion: None,
        }
    }
}

/// Timestamps come back as `2026-03-01T12:00` (no seconds, no offset, UTC
/// was requested).
fn parse_minute_time(s: &str) -> Result<DateTime<Utc>, ErrorKind> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map(|t| t.and_utc())
        .map_err(|e| ErrorKind::InvalidResponse(format!("bad timestamp {s:?}: {e}")))
}

fn parse_date(s: &str) -> Result<NaiveDate, ErrorKind> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| ErrorKind::InvalidResponse(format!("bad date {s:?}: {e}")))
}

// Wire types

#[derive(Debug, Deserialize)]
struct ForecastDocument {
    current: Option<CurrentBlock>,
    hourly: Option<HourlyBlock>,
    daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    temperature_2m: f64,
    apparent_temperature: Option<f64>,
    relative_humidity_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    weather_code: i32,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
    weather_code: Vec<i32>,
    precipitation_probability: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    weather_code: Vec<i32>,
    precipitation_probability_max: Option<Vec<Option<f64>>>,
    sunrise: Option<Vec<String>>,
    sunset: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AirQualityDocument {
    current: Option<AirQualityBlock>,
}

#[derive(Debug, Deserialize)]
struct AirQualityBlock {
    us_aqi: f64,
    dominant_pollutant: Option<String>,
}
