//! The fetch-cycle state machine: cache check, coalesced refresh,
//! per-capability fan-out with fallback, enrichment, persist, alert
//! forwarding.
//!
//! Cycle shape: `CacheCheck -> Fresh: return | Stale: return + background
//! refresh | Expired/Absent: coalesce -> fan-out -> enrich -> persist ->
//! return`. Persistence happens strictly after enrichment settles, and the
//! cache's compare-and-swap keeps a slow cycle from clobbering a newer one.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::instrument;

use nimbus_alerts::{AlertPipeline, NotificationEvent};
use nimbus_cache::{CacheError, CacheStore, Freshness, SNAPSHOT_SCHEMA_VERSION};
use nimbus_core::config::NimbusConfig;
use nimbus_core::error::FetchError;
use nimbus_core::types::{
    Capability, FetchRequest, Fingerprint, Location, ProviderId, SnapshotField, SourceMode,
    WeatherSnapshot,
};
use nimbus_providers::client::CapabilityPayload;
use nimbus_providers::{ProviderRegistry, SourceSelector};

use crate::coalescer::Coalescer;
use crate::fuse::{self, CapabilityOutcome};

/// The sole orchestration API surface. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    cache: CacheStore,
    coalescer: Coalescer,
    registry: ProviderRegistry,
    selector: SourceSelector,
    cache_config: nimbus_core::config::CacheConfig,
    // Single-writer: touched only from cycle completion, never concurrently
    pipeline: Mutex<AlertPipeline>,
}

impl Orchestrator {
    /// Wire up the orchestrator. Purges cache entries from other schema
    /// versions before first use.
    pub fn new(
        config: &NimbusConfig,
        registry: ProviderRegistry,
        cache: CacheStore,
        events: UnboundedSender<NotificationEvent>,
    ) -> Result<Self, CacheError> {
        cache.invalidate_on_schema_mismatch(SNAPSHOT_SCHEMA_VERSION)?;
        cache.purge_expired()?;

        let selector = SourceSelector::new(registry.contains(ProviderId::Timeline));
        let pipeline = Mutex::new(AlertPipeline::new(config.alerts.clone(), events));

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                coalescer: Coalescer::new(),
                registry,
                selector,
                cache_config: config.cache.clone(),
                pipeline,
            }),
        })
    }

    /// Fetch a snapshot, serving from cache when freshness allows.
    #[instrument(skip(self, request), fields(location = %request.location.id), level = "info")]
    pub async fn fetch(&self, request: FetchRequest) -> Result<WeatherSnapshot, FetchError> {
        self.check_request(&request)?;
        let fingerprint = request.fingerprint();

        match self.inner.cache.get(&fingerprint) {
            Ok(Some(entry)) => match entry.freshness(Utc::now()) {
                Freshness::Fresh => {
                    tracing::debug!(%fingerprint, "cache fresh, serving");
                    return Ok(entry.snapshot);
                }
                Freshness::Stale => {
                    tracing::debug!(%fingerprint, "cache stale, serving and refreshing");
                    self.spawn_background_refresh(request, fingerprint);
                    return Ok(entry.snapshot);
                }
            },
            Ok(None) => {}
            Err(e) => {
                // Unreadable cache is treated as a miss, never a user error
                tracing::warn!(%fingerprint, %e, "cache read failed, refetching");
            }
        }

        self.coalesced_refresh(request, fingerprint).await
    }

    /// Run a full cycle regardless of cache freshness (manual refresh).
    /// Still subject to coalescing, and still falls back to last-known-good
    /// data when every provider fails.
    #[instrument(skip(self, request), fields(location = %request.location.id), level = "info")]
    pub async fn refresh(&self, request: FetchRequest) -> Result<WeatherSnapshot, FetchError> {
        self.check_request(&request)?;
        let fingerprint = request.fingerprint();
        self.coalesced_refresh(request, fingerprint).await
    }

    fn check_request(&self, request: &FetchRequest) -> Result<(), FetchError> {
        if request.capabilities.is_empty() {
            return Err(FetchError::EmptyRequest);
        }
        if let SourceMode::Pinned(id) = request.mode {
            if !self.inner.registry.contains(id) {
                return Err(FetchError::ProviderUnavailable { provider: id.to_string() });
            }
        }
        Ok(())
    }

    fn spawn_background_refresh(&self, request: FetchRequest, fingerprint: Fingerprint) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.coalesced_refresh(request, fingerprint).await {
                tracing::debug!(%e, "background refresh failed");
            }
        });
    }

    async fn coalesced_refresh(
        &self,
        request: FetchRequest,
        fingerprint: Fingerprint,
    ) -> Result<WeatherSnapshot, FetchError> {
        let this = self.clone();
        let fp = fingerprint.clone();
        self.inner
            .coalescer
            .run(&fingerprint, move || async move { this.run_cycle(request, fp).await })
            .await
    }

    async fn run_cycle(
        &self,
        request: FetchRequest,
        fingerprint: Fingerprint,
    ) -> Result<WeatherSnapshot, FetchError> {
        // The cycle's start instant becomes the entry's fetched_at, so a
        // slow cycle can never outrank data fetched after it began
        let started = Utc::now();
        let plan = self.inner.selector.plan(&request.location, request.mode, &request.capabilities);

        if plan.is_empty() {
            return self.serve_last_known_good(&request, &fingerprint);
        }

        // Fan out one task per requested capability; within each task,
        // providers are tried in selector order
        let mut handles: Vec<JoinHandle<(Capability, CapabilityOutcome)>> = Vec::new();
        for capability in request.capabilities.iter() {
            let order = plan.providers_for(capability).to_vec();
            let registry = self.inner.registry.clone();
            let location = request.location.clone();
            handles.push(tokio::spawn(async move {
                let outcome = fetch_capability(&registry, &location, capability, order).await;
                (capability, outcome)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(%e, "capability fetch task failed"),
            }
        }

        let mut snapshot =
            fuse::fuse(&request.location.id, started, &request.capabilities, outcomes);

        if snapshot.is_empty_of_data() {
            tracing::warn!(%fingerprint, "every requested capability failed");
            return self.serve_last_known_good(&request, &fingerprint);
        }

        // Enrichment: secondary fills run in parallel and must all settle
        // before the snapshot is persisted
        self.enrich(&mut snapshot, &request.location, &plan.distinct_providers()).await;

        match self.inner.cache.put(
            &fingerprint,
            &snapshot,
            started,
            self.inner.cache_config.ttl(),
            self.inner.cache_config.max_age(),
        ) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%fingerprint, "newer snapshot already cached, keeping it")
            }
            // The fetched data is still good; failing to persist it is not
            // a cycle failure
            Err(e) => tracing::warn!(%fingerprint, %e, "failed to persist snapshot"),
        }

        if let SnapshotField::Available { value: alerts, .. } = &snapshot.alerts {
            if !alerts.is_empty() {
                self.inner.pipeline.lock().process(alerts, Utc::now());
            }
        }

        Ok(snapshot)
    }

    /// Fan out `extras()` across every provider in the plan and apply the
    /// results in plan order, fill-only.
    async fn enrich(
        &self,
        snapshot: &mut WeatherSnapshot,
        location: &Location,
        providers: &[ProviderId],
    ) {
        let mut handles: Vec<(ProviderId, JoinHandle<_>)> = Vec::new();
        for &id in providers {
            let Some(client) = self.inner.registry.get(id) else {
                continue;
            };
            let location = location.clone();
            handles.push((id, tokio::spawn(async move { client.extras(&location).await })));
        }

        for (id, handle) in handles {
            match handle.await {
                Ok(extras) if !extras.is_empty() => fuse::apply_extras(snapshot, id, extras),
                Ok(_) => {}
                Err(e) => tracing::debug!(provider = %id, %e, "enrichment task failed"),
            }
        }
    }

    /// Hard-failure fallback: prefer last-known-good data within max_age,
    /// marked stale-forced, over a blank error.
    fn serve_last_known_good(
        &self,
        request: &FetchRequest,
        fingerprint: &Fingerprint,
    ) -> Result<WeatherSnapshot, FetchError> {
        if let Ok(Some(entry)) = self.inner.cache.get(fingerprint) {
            tracing::warn!(%fingerprint, "serving last-known-good snapshot");
            let mut snapshot = entry.snapshot;
            snapshot.stale_forced = true;
            return Ok(snapshot);
        }
        Err(FetchError::NoUsableData { location: request.location.id.clone() })
    }

    /// Remove cache entries past their hard cutoff (periodic maintenance).
    pub fn purge_expired(&self) -> Result<usize, FetchError> {
        self.inner
            .cache
            .purge_expired()
            .map_err(|e| FetchError::Cache(e.to_string()))
    }
}

/// Try providers in order for one capability; first success wins, except
/// alerts, where every alert-capable provider contributes to one merged,
/// deduplicated set.
async fn fetch_capability(
    registry: &ProviderRegistry,
    location: &Location,
    capability: Capability,
    order: Vec<ProviderId>,
) -> CapabilityOutcome {
    if capability == Capability::Alerts {
        return fetch_alerts_merged(registry, location, order).await;
    }

    for id in order {
        let Some(client) = registry.get(id) else {
            continue;
        };
        if !client.supports(capability) {
            continue;
        }
        let result = client.fetch(location, capability).await;
        match result.outcome {
            Ok(payload) => return Some((id, payload)),
            Err(kind) => {
                tracing::info!(provider = %id, %capability, %kind, "falling back to next provider");
            }
        }
    }
    None
}

async fn fetch_alerts_merged(
    registry: &ProviderRegistry,
    location: &Location,
    order: Vec<ProviderId>,
) -> CapabilityOutcome {
    let mut sets = Vec::new();
    let mut first_source = None;
    for id in order {
        let Some(client) = registry.get(id) else {
            continue;
        };
        if !client.supports(Capability::Alerts) {
            continue;
        }
        let result = client.fetch(location, Capability::Alerts).await;
        match result.outcome {
            Ok(CapabilityPayload::Alerts(alerts)) => {
                first_source.get_or_insert(id);
                sets.push(alerts);
            }
            Ok(_) => {}
            Err(kind) => {
                tracing::info!(provider = %id, %kind, "alert feed unavailable from provider")
            }
        }
    }
    let source = first_source?;
    Some((source, CapabilityPayload::Alerts(fuse::merge_alerts(sets))))
}
