//! Placeholder backend for providers that are declared but not wired up.

use async_trait::async_trait;

use fleetgrid_state::{CloudProvider, SwarmMember};

use crate::backend::{CloudBackend, ProvisionRequest};
use crate::error::{CloudError, CloudResult};

/// Fails every operation with `NotImplemented`. It never reports success,
/// so a member on an unwired provider cannot reach `Running` through it.
pub struct StubBackend {
    provider: CloudProvider,
}

impl StubBackend {
    pub fn new(provider: CloudProvider) -> Self {
        Self { provider }
    }

    fn refuse(&self, op: &str) -> CloudError {
        CloudError::NotImplemented(format!("{op} on {}", self.provider))
    }
}

#[async_trait]
impl CloudBackend for StubBackend {
    fn name(&self) -> &str {
        self.provider.as_str()
    }

    async fn create(&self, _request: &ProvisionRequest) -> CloudResult<String> {
        Err(self.refuse("create"))
    }

    async fn terminate(&self, _member: &SwarmMember) -> CloudResult<()> {
        Err(self.refuse("terminate"))
    }

    async fn reboot(&self, _member: &SwarmMember) -> CloudResult<()> {
        Err(self.refuse("reboot"))
    }
}
