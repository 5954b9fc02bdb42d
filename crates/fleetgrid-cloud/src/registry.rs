//! Provider tag → backend lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use fleetgrid_state::CloudProvider;

use crate::backend::CloudBackend;
use crate::config::CloudConfig;
use crate::error::CloudResult;
use crate::gce::GceBackend;
use crate::openstack::OpenStackBackend;
use crate::stub::StubBackend;

/// Resolves each provider tag to exactly one backend. Providers nobody
/// registered resolve to a [`StubBackend`].
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<CloudProvider, Arc<dyn CloudBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build real backends for every configured provider.
    pub fn from_config(config: &CloudConfig) -> CloudResult<Self> {
        let timeout = config.request_timeout();
        let mut registry = Self::new();

        if let Some(cfg) = &config.moc_kaizen {
            let backend =
                OpenStackBackend::new(CloudProvider::MocKaizen.as_str(), cfg.clone(), timeout)?;
            registry = registry.with_backend(CloudProvider::MocKaizen, Arc::new(backend));
        }
        if let Some(cfg) = &config.moc_engage1 {
            let backend =
                OpenStackBackend::new(CloudProvider::MocEngage1.as_str(), cfg.clone(), timeout)?;
            registry = registry.with_backend(CloudProvider::MocEngage1, Arc::new(backend));
        }
        if let Some(cfg) = &config.google_compute {
            let backend = GceBackend::new(cfg.clone(), timeout)?;
            registry = registry.with_backend(CloudProvider::GoogleCompute, Arc::new(backend));
        }

        info!(configured = ?registry.configured(), "cloud backends ready");
        Ok(registry)
    }

    /// Register (or replace) the backend for one provider.
    pub fn with_backend(mut self, provider: CloudProvider, backend: Arc<dyn CloudBackend>) -> Self {
        debug!(provider = %provider, backend = backend.name(), "registering cloud backend");
        self.backends.insert(provider, backend);
        self
    }

    pub fn backend_for(&self, provider: CloudProvider) -> Arc<dyn CloudBackend> {
        match self.backends.get(&provider) {
            Some(backend) => Arc::clone(backend),
            None => Arc::new(StubBackend::new(provider)),
        }
    }

    /// Providers with a registered backend, in declaration order.
    pub fn configured(&self) -> Vec<CloudProvider> {
        CloudProvider::ALL
            .into_iter()
            .filter(|p| self.backends.contains_key(p))
            .collect()
    }
}
