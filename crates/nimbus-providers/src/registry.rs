//! Closed registry of configured provider clients.

use std::collections::HashMap;
use std::sync::Arc;

use nimbus_core::config::SourceConfig;
use nimbus_core::types::ProviderId;

use crate::client::{build_http_client, ProviderClient};
use crate::meteogrid::MeteoGridClient;
use crate::nws::NwsClient;
use crate::retry::RetryConfig;
use crate::timeline::TimelineClient;

/// Maps provider ids to live clients. Built once at startup; call sites
/// dispatch through [`ProviderClient`], never on concrete types.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderId, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard registry from configuration: NWS-style and grid
    /// clients always, the timeline client only when its key is present.
    /// All clients share one bounded HTTP pool.
    pub fn from_config(config: &SourceConfig) -> Result<Self, reqwest::Error> {
        let http = build_http_client(config)?;
        let retry = RetryConfig::new(config.max_retries, 100, 5_000);

        let mut registry = Self::new();
        registry.register(Arc::new(NwsClient::new(http.clone(), retry.clone())));
        registry.register(Arc::new(MeteoGridClient::new(http.clone(), retry.clone())));
        if let Some(key) = &config.timeline_api_key {
            registry.register(Arc::new(TimelineClient::new(http, retry, key.clone())));
        }
        Ok(registry)
    }

    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        tracing::info!(provider = %client.id(), "registering provider");
        self.clients.insert(client.id(), client);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&id).cloned()
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
