//! Provider clients for Nimbus
//!
//! Uniform capability interface over external weather sources, plus the
//! deterministic source selector and shared retry policy.

pub mod client;
pub mod meteogrid;
pub mod nws;
pub mod registry;
pub mod retry;
pub mod selector;
pub mod timeline;

pub use client::{
    build_http_client, CapabilityPayload, ErrorKind, ProviderClient, ProviderExtras,
    ProviderResult,
};
pub use meteogrid::MeteoGridClient;
pub use nws::NwsClient;
pub use registry::ProviderRegistry;
pub use retry::RetryConfig;
pub use selector::{FetchPlan, SourceSelector};
pub use timeline::TimelineClient;
