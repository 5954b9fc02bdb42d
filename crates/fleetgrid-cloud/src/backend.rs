//! The `CloudBackend` capability.
//!
//! One implementation per provider; the lifecycle layer never branches on
//! the provider tag itself. Backends are pure request/response against the
//! remote control plane and never touch the state store.

use async_trait::async_trait;

use fleetgrid_state::{MemberStatus, SwarmMember};

use crate::error::{CloudError, CloudResult};

/// Placeholder substituted with the member's hostname.
pub const HOSTNAME_PLACEHOLDER: &str = "%HOSTNAME%";

/// Placeholder substituted with the member's check-in callback URL.
pub const URL_PLACEHOLDER: &str = "%URL%";

/// Everything a backend needs to create one instance.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub member: SwarmMember,
    /// Swarm name for provider labels (`"none"` when detached).
    pub swarm_name: String,
    /// URL the booted instance calls to check in.
    pub callback_url: String,
    /// Boot configuration with placeholders substituted.
    pub user_data: String,
}

impl ProvisionRequest {
    pub fn new(member: SwarmMember, swarm_name: &str, callback_url: &str) -> Self {
        let user_data = render_boot_config(&member.configuration, &member.hostname, callback_url);
        Self {
            member,
            swarm_name: swarm_name.to_string(),
            callback_url: callback_url.to_string(),
            user_data,
        }
    }
}

/// Substitute `%HOSTNAME%` and `%URL%` in a boot configuration template.
pub fn render_boot_config(template: &str, hostname: &str, callback_url: &str) -> String {
    template
        .replace(HOSTNAME_PLACEHOLDER, hostname)
        .replace(URL_PLACEHOLDER, callback_url)
}

/// Provider-specific instance management.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Create an instance; returns the provider-assigned instance id.
    async fn create(&self, request: &ProvisionRequest) -> CloudResult<String>;

    /// Delete the member's instance, releasing its boot volume per the
    /// member's `delete_boot_volume` policy.
    async fn terminate(&self, member: &SwarmMember) -> CloudResult<()>;

    /// Reboot the member's instance. Only valid while it is running.
    async fn reboot(&self, member: &SwarmMember) -> CloudResult<()>;
}

/// Guard used by backends before rebooting.
pub fn ensure_running(member: &SwarmMember) -> CloudResult<()> {
    if member.status == MemberStatus::Running {
        Ok(())
    } else {
        Err(CloudError::InvalidState(format!(
            "cannot reboot {} while {}",
            member.hostname, member.status
        )))
    }
}
