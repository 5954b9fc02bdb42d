//! Google Compute Engine backend.
//!
//! GCE addresses instances by name, so terminate and reboot use the
//! member's hostname; the numeric `targetId` from the insert operation is
//! kept as the member's `cloud_id` for reference only.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use fleetgrid_state::{DiskType, SwarmMember};

use crate::backend::{CloudBackend, ProvisionRequest, ensure_running};
use crate::config::GceConfig;
use crate::error::{CloudError, CloudResult};
use crate::openstack::check_status;

/// OAuth scopes granted to created instances.
const INSTANCE_SCOPES: [&str; 6] = [
    "https://www.googleapis.com/auth/devstorage.read_only",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/monitoring.write",
    "https://www.googleapis.com/auth/servicecontrol",
    "https://www.googleapis.com/auth/service.management.readonly",
    "https://www.googleapis.com/auth/trace.append",
];

/// Refresh metadata-server tokens this long before they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct GceBackend {
    client: Client,
    config: GceConfig,
    token: Mutex<Option<CachedToken>>,
}

impl GceBackend {
    pub fn new(config: GceConfig, timeout: Duration) -> CloudResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn zone_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.project,
            self.config.zone,
            path
        )
    }

    async fn bearer(&self) -> CloudResult<String> {
        if let Some(token) = &self.config.access_token {
            return Ok(token.clone());
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_SLACK < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .get(&self.config.metadata_token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        let token: MetadataToken = check_status(response, "metadata token").await?.json().await?;
        debug!(expires_in = token.expires_in, "gce access token fetched");

        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    /// The `instances.insert` body for one member.
    pub fn instance_body(&self, request: &ProvisionRequest) -> Value {
        let member = &request.member;
        let cfg = &self.config;
        let disk_type = match member.disk_type {
            DiskType::SolidState => "pd-ssd",
            DiskType::Traditional => "pd-standard",
        };

        json!({
            "name": member.hostname,
            "minCpuPlatform": "Automatic",
            "machineType": format!(
                "projects/{}/zones/{}/machineTypes/{}",
                cfg.project, cfg.zone, member.flavor
            ),
            "metadata": {
                "items": [
                    { "key": "user-data", "value": request.user_data },
                    { "key": "member-id", "value": member.id.to_string() },
                    { "key": "member-url", "value": request.callback_url },
                ]
            },
            "labels": { "swarm": label_value(&request.swarm_name) },
            "disks": [{
                "type": "PERSISTENT",
                "boot": true,
                "mode": "READ_WRITE",
                "autoDelete": member.delete_boot_volume,
                "deviceName": member.hostname,
                "initializeParams": {
                    "sourceImage": format!("projects/{}/global/images/{}", cfg.project, member.image),
                    "diskType": format!(
                        "projects/{}/zones/{}/diskTypes/{}",
                        cfg.project, cfg.zone, disk_type
                    ),
                    "diskSizeGb": member.disk_size_gb.to_string(),
                }
            }],
            "canIpForward": false,
            "networkInterfaces": [{
                "network": format!("projects/{}/global/networks/default", cfg.project),
                "subnetwork": format!(
                    "projects/{}/regions/{}/subnetworks/default",
                    cfg.project, cfg.region
                ),
                "accessConfigs": [{ "name": "External NAT", "type": "ONE_TO_ONE_NAT" }],
                "aliasIpRanges": []
            }],
            "scheduling": {
                "preemptible": false,
                "onHostMaintenance": "MIGRATE",
                "automaticRestart": true
            },
            "serviceAccounts": [{
                "email": cfg.service_account,
                "scopes": INSTANCE_SCOPES,
            }]
        })
    }
}

/// GCE label values allow lowercase letters, digits, `-` and `_` only.
fn label_value(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect()
}

#[async_trait]
impl CloudBackend for GceBackend {
    fn name(&self) -> &str {
        "google_compute"
    }

    async fn create(&self, request: &ProvisionRequest) -> CloudResult<String> {
        let body = self.instance_body(request);
        let token = self.bearer().await?;
        let response = self
            .client
            .post(self.zone_url("/instances"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let operation: Operation = check_status(response, "insert instance")
            .await
            .map_err(|e| match e {
                CloudError::NotFound(detail) => CloudError::Rejected(detail),
                other => other,
            })?
            .json()
            .await?;

        let target_id = operation.target_id.ok_or_else(|| {
            CloudError::Unavailable(format!(
                "insert operation {} carried no targetId",
                operation.name.as_deref().unwrap_or("?")
            ))
        })?;
        info!(
            hostname = %request.member.hostname,
            target = %target_id,
            "gce instance requested"
        );
        Ok(target_id)
    }

    async fn terminate(&self, member: &SwarmMember) -> CloudResult<()> {
        let token = self.bearer().await?;
        let response = self
            .client
            .delete(self.zone_url(&format!("/instances/{}", member.hostname)))
            .bearer_auth(&token)
            .send()
            .await?;
        check_status(response, "delete instance").await?;
        info!(hostname = %member.hostname, "gce instance deleted");
        Ok(())
    }

    async fn reboot(&self, member: &SwarmMember) -> CloudResult<()> {
        ensure_running(member)?;
        let token = self.bearer().await?;
        let response = self
            .client
            .post(self.zone_url(&format!("/instances/{}/reset", member.hostname)))
            .bearer_auth(&token)
            .send()
            .await?;
        check_status(response, "reset instance").await?;
        info!(hostname = %member.hostname, "gce instance reset");
        Ok(())
    }
}
