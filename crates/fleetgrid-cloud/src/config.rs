//! Provider configuration, injected into each backend at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_request_timeout() -> u64 {
    30
}

fn default_user_domain() -> String {
    "Default".to_string()
}

fn default_availability_zone() -> String {
    "nova".to_string()
}

fn default_security_groups() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_service_account() -> String {
    "default".to_string()
}

fn default_gce_api_base() -> String {
    "https://compute.googleapis.com/compute/v1".to_string()
}

fn default_metadata_token_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}

/// Credentials and endpoints for every configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub moc_kaizen: Option<OpenStackConfig>,
    pub moc_engage1: Option<OpenStackConfig>,
    pub google_compute: Option<GceConfig>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            moc_kaizen: None,
            moc_engage1: None,
            google_compute: None,
        }
    }
}

impl CloudConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// An OpenStack cloud (Keystone v3 + Nova + Glance).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenStackConfig {
    /// Keystone v3 base, e.g. `https://keystone.example.org:5000/v3`.
    pub auth_url: String,
    /// Nova endpoint, e.g. `https://nova.example.org:8774/v2.1`.
    pub compute_url: String,
    /// Glance endpoint, e.g. `https://glance.example.org:9292`.
    pub image_url: String,
    pub username: String,
    pub password: String,
    pub project_id: String,
    #[serde(default = "default_user_domain")]
    pub user_domain: String,
    pub key_name: Option<String>,
    #[serde(default = "default_availability_zone")]
    pub availability_zone: String,
    #[serde(default = "default_security_groups")]
    pub security_groups: Vec<String>,
}

/// A Google Compute Engine project/zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GceConfig {
    pub project: String,
    pub region: String,
    pub zone: String,
    /// Service account attached to created instances.
    #[serde(default = "default_service_account")]
    pub service_account: String,
    #[serde(default = "default_gce_api_base")]
    pub api_base: String,
    /// Static OAuth bearer token; when unset the metadata server is asked.
    pub access_token: Option<String>,
    #[serde(default = "default_metadata_token_url")]
    pub metadata_token_url: String,
}
