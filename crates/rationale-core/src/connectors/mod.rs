//! Platform connector seam
//!
//! A [`PlatformConnector`] fetches raw events from one collaboration platform
//! and normalizes them. The orchestrator resolves a connector per
//! integration through a [`ConnectorFactory`]; [`ConnectorRegistry`] is the
//! default factory, keyed by platform name.
//!
//! ```rust
//! use std::sync::Arc;
//! use rationale_core::connectors::{ConnectorRegistry, JsonlConnector};
//!
//! let mut connectors = ConnectorRegistry::new();
//! connectors.register(Arc::new(JsonlConnector::new("github", "events.jsonl")));
//! assert!(connectors.get("github").is_some());
//! ```

mod jsonl;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::events::{NormalizedEvent, RawEvent};
use crate::domain::ingestion::{DataSource, Integration};
use crate::error::{Error, Result};

pub use jsonl::JsonlConnector;

/// Client for one collaboration platform
///
/// Both calls are cancellation points for a run: the orchestrator drops the
/// future when the run is cancelled.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Platform this connector serves, e.g. "github"
    fn platform(&self) -> &str;

    /// Fetch up to `limit` events newer than `since` from the given sources
    async fn fetch_events(
        &self,
        sources: &[DataSource],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawEvent>>;

    /// Convert raw events into normalized events
    async fn normalize(&self, raw: &[RawEvent]) -> Result<Vec<NormalizedEvent>>;
}

/// Resolves the connector for an integration
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connector_for(&self, integration: &Integration) -> Result<Arc<dyn PlatformConnector>>;
}

/// Connectors keyed by platform
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn PlatformConnector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector, replacing any previous one for its platform
    pub fn register(&mut self, connector: Arc<dyn PlatformConnector>) {
        self.connectors
            .insert(connector.platform().to_string(), connector);
    }

    /// Get the connector for a platform
    pub fn get(&self, platform: &str) -> Option<Arc<dyn PlatformConnector>> {
        self.connectors.get(platform).cloned()
    }

    /// Registered platforms, sorted
    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        platforms.sort_unstable();
        platforms
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

#[async_trait]
impl ConnectorFactory for ConnectorRegistry {
    async fn connector_for(&self, integration: &Integration) -> Result<Arc<dyn PlatformConnector>> {
        self.get(&integration.platform)
            .ok_or_else(|| Error::ConnectorNotFound(integration.platform.clone()))
    }
}
