use anyhow::{Context, Result};
use tokio::sync::mpsc;

use nimbus_cache::CacheStore;
use nimbus_core::types::{CapabilitySet, FetchRequest, Location};
use nimbus_core::NimbusConfig;
use nimbus_orchestrator::Orchestrator;
use nimbus_providers::ProviderRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    nimbus_core::init()?;

    let (config, _validation) = NimbusConfig::load_validated()?;
    tracing::info!(config_dir = %config.config_dir.display(), "Nimbus started");

    let registry =
        ProviderRegistry::from_config(&config.sources).context("Failed to build HTTP client")?;
    let cache = CacheStore::new(config.cache_db_path()).context("Failed to open snapshot cache")?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(&config, registry, cache, events_tx)
        .context("Failed to initialize orchestrator")?;

    // Alert notifications print to stdout until a desktop notifier lands
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            println!(
                "[ALERT] {} ({}) - {}",
                event.alert.event,
                event.alert.severity.as_str(),
                event.alert.headline.as_deref().unwrap_or(&event.alert.area)
            );
        }
    });

    // Demo fetch until location search is wired up
    let location = Location {
        id: "seattle".into(),
        name: "Seattle, WA".into(),
        latitude: 47.6062,
        longitude: -122.3321,
        timezone: Some("America/Los_Angeles".into()),
    };
    let request = FetchRequest::new(location, CapabilitySet::all(), config.sources.mode);

    match orchestrator.fetch(request).await {
        Ok(snapshot) => {
            println!("Weather for {}", snapshot.location_id);
            if let Some(current) = snapshot.current.value() {
                println!(
                    "  Now: {:.1}°C, {}",
                    current.temperature_c,
                    current.condition.description()
                );
            }
            if let Some(days) = snapshot.forecast.value() {
                for day in days.iter().take(3) {
                    println!(
                        "  {}: {:.0}°C / {:.0}°C, {}",
                        day.date,
                        day.high_c,
                        day.low_c,
                        day.condition.description()
                    );
                }
            }
            if let Some(alerts) = snapshot.alerts.value() {
                for alert in alerts {
                    println!("  Alert: {} ({})", alert.event, alert.severity.as_str());
                }
            }
            if snapshot.stale_forced {
                println!("  (showing cached data; providers are unreachable)");
            }
        }
        Err(e) => {
            tracing::error!(%e, "fetch failed");
            println!("{}", e.user_message());
        }
    }

    Ok(())
}
