//! Timeline-based provider: interval timelines keyed by field names, behind
//! an API key. A missing or rejected key surfaces as `AuthError` and the
//! selector simply drops this source from auto-mode orderings.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use tracing::instrument;

use nimbus_core::types::{
    Capability, CurrentConditions, DayForecast, HourlyForecast, Location, ProviderId,
    WeatherCondition,
};

use crate::client::{
    get_json, timed_fetch, CapabilityPayload, ErrorKind, ProviderClient, ProviderResult,
};
use crate::retry::RetryConfig;

const TIMELINE_API_BASE: &str = "https://api.tomorrow.io";

pub struct TimelineClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl TimelineClient {
    pub fn new(client: reqwest::Client, retry: RetryConfig, api_key: String) -> Self {
        Self {
            client,
            base_url: TIMELINE_API_BASE.to_string(),
            api_key,
            retry,
        }
    }

    pub fn new_with_base_url(
        client: reqwest::Client,
        retry: RetryConfig,
        api_key: String,
        base_url: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            retry,
        }
    }

    async fn timeline(
        &self,
        location: &Location,
        timestep: &str,
    ) -> Result<Vec<Interval>, ErrorKind> {
        let url = format!(
            "{}/v4/timelines?location={:.4},{:.4}&timesteps={}&units=metric\
             &fields=temperature,temperatureApparent,humidity,windSpeed,weatherCode,precipitationProbability,temperatureMax,temperatureMin",
            self.base_url, location.latitude, location.longitude, timestep
        );
        let body: TimelinesResponse =
            get_json(&self.client, &url, &[("apikey", self.api_key.as_str())], &self.retry).await?;

        let timeline = body
            .data
            .timelines
            .into_iter()
            .find(|t| t.timestep == timestep)
            .ok_or_else(|| {
                ErrorKind::InvalidResponse(format!("missing {timestep} timeline"))
            })?;
        if timeline.intervals.is_empty() {
            return Err(ErrorKind::InvalidResponse("timeline had no intervals".into()));
        }
        Ok(timeline.intervals)
    }

    async fn fetch_current(&self, location: &Location) -> Result<CapabilityPayload, ErrorKind> {
        let intervals = self.timeline(location, "current").await?;
        let now = &intervals[0];
        Ok(CapabilityPayload::Current(CurrentConditions {
            temperature_c: now.values.temperature.ok_or_else(missing_field)?,
            feels_like_c: now.values.temperature_apparent,
            humidity_pct: now.values.humidity.map(|h| h.clamp(0.0, 100.0) as u8),
            wind_speed_kmh: now.values.wind_speed.map(ms_to_kmh),
            condition: condition_from_code(now.values.weather_code.unwrap_or_default()),
            observed_at: parse_time(&now.start_time)?,
        }))
    }

    async fn fetch_hourly(&self, location: &Location) -> Result<CapabilityPayload, ErrorKind> {
        let intervals = self.timeline(location, "1h").await?;
        let mut hours = Vec::with_capacity(intervals.len());
        for interval in &intervals {
            hours.push(HourlyForecast {
                time: parse_time(&interval.start_time)?,
                temperature_c: interval.values.temperature.ok_or_else(missing_field)?,
                condition: condition_from_code(interval.values.weather_code.unwrap_or_default()),
                precipitation_chance_pct: interval
                    .values
                    .precipitation_probability
                    .map(|v| v.clamp(0.0, 100.0) as u8),
            });
        }
        Ok(CapabilityPayload::Hourly(hours))
    }

    async fn fetch_forecast(&self, location: &Location) -> Result<CapabilityPayload, ErrorKind> {
        let intervals = self.timeline(location, "1d").await?;
        let mut days = Vec::with_capacity(intervals.len());
        for interval in &intervals {
            let time = parse_time(&interval.start_time)?;
            days.push(DayForecast {
                date: time.date_naive(),
                high_c: interval
                    .values
                    .temperature_max
                    .or(interval.values.temperature)
                    .ok_or_else(missing_field)?,
                low_c: interval
                    .values
                    .temperature_min
                    .or(interval.values.temperature)
                    .ok_or_else(missing_field)?,
                condition: condition_from_code(interval.values.weather_code.unwrap_or_default()),
                precipitation_chance_pct: interval
                    .values
                    .precipitation_probability
                    .map(|v| v.clamp(0.0, 100.0) as u8),
                summary: None,
            });
        }
        Ok(CapabilityPayload::Forecast(days))
    }
}

#[async_trait]
impl ProviderClient for TimelineClient {
    fn id(&self) -> ProviderId {
        ProviderId::Timeline
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::Current | Capability::Forecast | Capability::Hourly
        )
    }

    #[instrument(skip(self, location), fields(location = %location.id), level = "info")]
    async fn fetch(&self, location: &Location, capability: Capability) -> ProviderResult {
        timed_fetch(ProviderId::Timeline, capability, || async {
            match capability {
                Capability::Current => self.fetch_current(location).await,
                Capability::Forecast => self.fetch_forecast(location).await,
                Capability::Hourly => self.fetch_hourly(location).await,
                Capability::Alerts => Err(ErrorKind::InvalidResponse(
                    "alerts not supported by this source".into(),
                )),
            }
        })
        .await
    }
}

fn missing_field() -> ErrorKind {
    ErrorKind::InvalidResponse("interval missing temperature".into())
}

fn ms_to_kmh(ms: f64) -> f64 {
    ms * 3.6
}

/// Timeline weather codes are thousands-banded.
fn condition_from_code(code: i32) -> WeatherCondition {
    match code {
        1000 | 1100 => WeatherCondition::Clear,
        1101 | 1102 => WeatherCondition::PartlyCloudy,
        1001 => WeatherCondition::Cloudy,
        2000..=2199 => WeatherCondition::Fog,
        4000 => WeatherCondition::Drizzle,
        4001 | 4200 => WeatherCondition::Rain,
        4201 => WeatherCondition::HeavyRain,
        5000..=5199 => WeatherCondition::Snow,
        6000..=7199 => WeatherCondition::Sleet,
        8000 => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::Clear,
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ErrorKind> {
    DateTime::<FixedOffset>::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ErrorKind::InvalidResponse(format!("bad timestamp {s:?}: {e}")))
}

// Wire types

#[derive(Debug, Deserialize)]
struct TimelinesResponse {
    data: TimelinesData,
}

#[derive(Debug, Deserialize)]
struct TimelinesData {
    timelines: Vec<Timeline>,
}

#[derive(Debug, Deserialize)]
struct Timeline {
    timestep: String,
    intervals: Vec<Interval>,
}

#[derive(Debug, Deserialize)]
struct Interval {
    #[serde(rename = "startTime")]
    start_time: String,
    values: IntervalValues,
}

#[derive(Debug, Deserialize)]
struct IntervalValues {
    temperature: Option<f64>,
    #[serde(rename = "temperatureApparent")]
    temperature_apparent: Option<f64>,
    humidity: Option<f64>,
    #[serde(rename = "windSpeed")]
    wind_speed: Option<f64>,
    #[serde(rename = "weatherCode")]
    weather_code: Option<i32>,
    #[serde(rename = "precipitationProbability")]
    precipitation_probability: Option<f64>,
    #[serde(rename = "temperatureMax")]
    temperature_max: Option<f64>,
    #[serde(rename = "temperatureMin")]
    temperature_min: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_location() -> Location {
        Location {
            id: "lisbon".into(),
            name: "Lisbon".into(),
            latitude: 38.7223,
            longitude: -9.1393,
            timezone: None,
        }
    }

    fn current_body() -> serde_json::Value {
        serde_json::json!({
            "data": { "timelines": [ {
                "timestep": "current",
                "intervals": [ {
                    "startTime": "2026-03-01T12:00:00Z",
                    "values": {
                        "temperature": 17.2,
                        "temperatureApparent": 16.8,
                        "humidity": 62.0,
                        "windSpeed": 5.0,
                        "weatherCode": 1101,
                        "precipitationProbability": 5.0
                    }
                } ]
            } ] }
        })
    }

    #[tokio::test]
    async fn test_fetch_current_maps_codes_and_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/timelines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
            .mount(&server)
            .await;

        let client = TimelineClient::new_with_base_url(
            reqwest::Client::new(),
            RetryConfig::new(0, 1, 1),
            "test-key".into(),
            &server.uri(),
        );
        let result = client.fetch(&test_location(), Capability::Current).await;
        let Ok(CapabilityPayload::Current(current)) = result.outcome else {
            panic!("expected current payload, got {:?}", result.outcome);
        };
        assert_eq!(current.condition, WeatherCondition::PartlyCloudy);
        assert_eq!(current.wind_speed_kmh, Some(18.0)); // 5 m/s
    }

    #[tokio::test]
    async fn test_request_carries_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/timelines"))
            .and(query_param("timesteps", "current"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = TimelineClient::new_with_base_url(
            reqwest::Client::new(),
            RetryConfig::new(0, 1, 1),
            "test-key".into(),
            &server.uri(),
        );
        assert!(client.fetch(&test_location(), Capability::Current).await.is_success());
    }

    #[tokio::test]
    async fn test_rejected_key_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/timelines"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = TimelineClient::new_with_base_url(
            reqwest::Client::new(),
            RetryConfig::new(2, 1, 1),
            "bad-key".into(),
            &server.uri(),
        );
        let result = client.fetch(&test_location(), Capability::Current).await;
        assert!(matches!(result.outcome, Err(ErrorKind::AuthError)));
    }

    #[tokio::test]
    async fn test_condition_code_bands() {
        assert_eq!(condition_from_code(1000), WeatherCondition::Clear);
        assert_eq!(condition_from_code(4201), WeatherCondition::HeavyRain);
        assert_eq!(condition_from_code(5001), WeatherCondition::Snow);
        assert_eq!(condition_from_code(8000), WeatherCondition::Thunderstorm);
        assert_eq!(condition_from_code(0), WeatherCondition::Clear);
    }
}
