//! Core domain types, configuration, and errors for Nimbus
//!
//! Everything shared between the provider, cache, orchestrator, and alert
//! crates lives here; this crate has no I/O of its own.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AlertConfig, CacheConfig, NimbusConfig, SourceConfig, ValidationResult};
pub use error::{ConfigError, FetchError};
pub use types::{
    AirQuality, AlertRecord, Capability, CapabilitySet, CurrentConditions, DayForecast, Enriched,
    FetchRequest, Fingerprint, HourlyForecast, Location, ProviderId, Severity, SnapshotField,
    SourceMode, SunTimes, WeatherCondition, WeatherSnapshot,
};

use anyhow::Result;

/// Initialize the core application
pub fn init() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Nimbus core initialized");
    Ok(())
}
