//! The uniform capability interface over external weather sources.
//!
//! Providers never raise: every failure surfaces as a typed [`ErrorKind`]
//! inside a [`ProviderResult`]. Implementations differ only in wire parsing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use nimbus_core::config::SourceConfig;
use nimbus_core::types::{
    AirQuality, AlertRecord, Capability, CurrentConditions, DayForecast, HourlyForecast, Location,
    ProviderId, SunTimes,
};

use crate::retry::{RetryConfig, RetryDecision};

const USER_AGENT: &str = "Nimbus/0.1.0 (https://github.com/nimbus)";

/// Typed provider failure. Recovered locally by falling back to the next
/// provider in the selector's ordering; never propagated to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("authentication rejected")]
    AuthError,
}

impl ErrorKind {
    /// Transient failures are worth retrying against the same provider
    /// before falling back.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited)
    }
}

/// The payload of one successful capability fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityPayload {
    Current(CurrentConditions),
    Forecast(Vec<DayForecast>),
    Hourly(Vec<HourlyForecast>),
    Alerts(Vec<AlertRecord>),
}

impl CapabilityPayload {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Current(_) => Capability::Current,
            Self::Forecast(_) => Capability::Forecast,
            Self::Hourly(_) => Capability::Hourly,
            Self::Alerts(_) => Capability::Alerts,
        }
    }
}

/// Outcome of one provider call for one capability.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider: ProviderId,
    pub capability: Capability,
    pub outcome: Result<CapabilityPayload, ErrorKind>,
    pub latency: Duration,
    pub fetched_at: DateTime<Utc>,
}

impl ProviderResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Extra fields a provider can contribute during enrichment, beyond the
/// four core capabilities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderExtras {
    pub sun: Option<SunTimes>,
    pub air_quality: Option<AirQuality>,
    pub discussion: Option<String>,
}

impl ProviderExtras {
    pub fn is_empty(&self) -> bool {
        self.sun.is_none() && self.air_quality.is_none() && self.discussion.is_none()
    }
}

/// One external weather data source.
///
/// `fetch` performs network I/O only; implementations hold no shared
/// mutable state beyond internal memoization of immutable metadata.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether this source can serve the given capability at all.
    fn supports(&self, capability: Capability) -> bool;

    /// Fetch one capability for one location. Never errors at this level;
    /// failures are carried inside the result.
    async fn fetch(&self, location: &Location, capability: Capability) -> ProviderResult;

    /// Secondary fields for the enrichment stage. Default: nothing.
    async fn extras(&self, _location: &Location) -> ProviderExtras {
        ProviderExtras::default()
    }
}

/// Build the shared bounded HTTP client used by every provider.
pub fn build_http_client(config: &SourceConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(5)))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(USER_AGENT)
        .build()
}

/// GET a JSON document with retry on transient failures.
///
/// Classification: reqwest timeouts/connect errors -> `Timeout`; 401/403 ->
/// `AuthError`; 429 -> `RateLimited`; 5xx retried then reported as
/// `InvalidResponse`; undecodable bodies -> `InvalidResponse`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    retry: &RetryConfig,
) -> Result<T, ErrorKind> {
    let mut attempt = 0u32;
    loop {
        match get_json_once(client, url, headers).await {
            Ok(value) => return Ok(value),
            Err((kind, decision)) => {
                if decision == RetryDecision::Retry && attempt < retry.max_retries {
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::debug!(url, attempt, ?delay, "retrying provider call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                } else {
                    return Err(kind);
                }
            }
        }
    }
}

async fn get_json_once<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<T, (ErrorKind, RetryDecision)> {
    let mut req = client.get(url);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }

    let response = match req.send().await {
        Ok(r) => r,
        Err(e) => return Err(crate::retry::classify_request_error(&e)),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(crate::retry::classify_status(status));
    }

    response.json::<T>().await.map_err(|e| {
        (
            ErrorKind::InvalidResponse(format!("decode failed: {e}")),
            RetryDecision::NoRetry,
        )
    })
}

/// Measure one capability fetch, wrapping the parse closure's outcome.
pub(crate) async fn timed_fetch<F, Fut>(
    provider: ProviderId,
    capability: Capability,
    work: F,
) -> ProviderResult
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<CapabilityPayload, ErrorKind>>,
{
    let started = std::time::Instant::now();
    let outcome = work().await;
    let latency = started.elapsed();
    match &outcome {
        Ok(payload) => tracing::debug!(
            %provider, %capability, ?latency,
            kind = payload.capability().as_str(),
            "provider fetch ok"
        ),
        Err(kind) => tracing::warn!(%provider, %capability, ?latency, %kind, "provider fetch failed"),
    }
    ProviderResult {
        provider,
        capability,
        outcome,
        latency,
        fetched_at: Utc::now(),
    }
}
