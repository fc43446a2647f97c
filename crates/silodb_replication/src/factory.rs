//! Replicator factory and diagnostics registry.

use crate::config::ReplicatorConfig;
use crate::error::ConfigError;
use crate::replicator::{Inner, Replicator};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Creates replicators over a shared transport and tracks the live ones.
///
/// The registry holds only weak references: keeping a running controller
/// alive is the controller's own fire-and-forget retention, never the
/// factory's.
pub struct ReplicatorFactory {
    transport: Arc<dyn Transport>,
    registry: Mutex<Vec<Weak<Inner>>>,
}

impl ReplicatorFactory {
    /// Creates a factory over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: Mutex::new(Vec::new()),
        }
    }

    /// Builds a controller for one replication session.
    ///
    /// The configuration is validated first; a rejected configuration means
    /// no controller is created.
    pub fn replicator(&self, config: ReplicatorConfig) -> Result<Replicator, ConfigError> {
        let replicator = Replicator::new(config, Arc::clone(&self.transport))?;
        let mut registry = self.registry.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.push(replicator.downgrade());
        Ok(replicator)
    }

    /// Returns a snapshot of the controllers still referenced somewhere.
    ///
    /// Dropped controllers fall out of the registry; the snapshot does not
    /// keep anything alive beyond the returned handles themselves.
    #[must_use]
    pub fn live_replicators(&self) -> Vec<Replicator> {
        let mut registry = self.registry.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        registry
            .iter()
            .filter_map(Weak::upgrade)
            .map(Replicator::from_inner)
            .collect()
    }
}
