//! OpenStack backend (Keystone v3, Nova, Glance).
//!
//! Image and flavor are resolved by name before the server is created, so a
//! typo surfaces as `Rejected` rather than as an opaque Nova 400. The boot
//! disk is a volume built from the image; Nova releases it on delete when
//! the member's `delete_boot_volume` is set.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fleetgrid_state::SwarmMember;

use crate::backend::{CloudBackend, ProvisionRequest, ensure_running};
use crate::config::OpenStackConfig;
use crate::error::{CloudError, CloudResult};

/// Header carrying the issued token in a Keystone v3 response.
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Header carrying the token on Nova/Glance requests.
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<NamedResource>,
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<NamedResource>,
}

#[derive(Deserialize)]
struct NamedResource {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct ServerCreated {
    server: CreatedServer,
}

#[derive(Deserialize)]
struct CreatedServer {
    id: String,
}

/// Backend for one OpenStack cloud.
pub struct OpenStackBackend {
    name: String,
    client: Client,
    config: OpenStackConfig,
    /// Cached Keystone token; cleared when Nova answers 401.
    token: Mutex<Option<String>>,
}

impl OpenStackBackend {
    pub fn new(name: &str, config: OpenStackConfig, timeout: Duration) -> CloudResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.to_string(),
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn compute(&self, path: &str) -> String {
        format!("{}{}", self.config.compute_url.trim_end_matches('/'), path)
    }

    async fn authenticate(&self) -> CloudResult<String> {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.config.username,
                            "domain": { "name": self.config.user_domain },
                            "password": self.config.password,
                        }
                    }
                },
                "scope": { "project": { "id": self.config.project_id } }
            }
        });
        let url = format!("{}/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(&body).send().await?;
        let response = check_status(response, "keystone authentication").await?;

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                CloudError::Unavailable("keystone response carried no subject token".to_string())
            })?;
        debug!(backend = %self.name, "keystone token issued");
        Ok(token)
    }

    async fn token(&self) -> CloudResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token = self.authenticate().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Send an authenticated request, re-authenticating once on 401.
    async fn send<F>(&self, build: F) -> CloudResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = self.token().await?;
        let response = build().header(AUTH_TOKEN_HEADER, &token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(backend = %self.name, "token rejected, re-authenticating");
        *self.token.lock().await = None;
        let token = self.token().await?;
        Ok(build().header(AUTH_TOKEN_HEADER, &token).send().await?)
    }

    async fn resolve_flavor(&self, name: &str) -> CloudResult<String> {
        let url = self.compute("/flavors");
        let response = self.send(|| self.client.get(&url)).await?;
        let list: FlavorList = check_status(response, "list flavors").await?.json().await?;
        list.flavors
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| f.id)
            .ok_or_else(|| CloudError::Rejected(format!("unknown flavor '{name}'")))
    }

    async fn resolve_image(&self, name: &str) -> CloudResult<String> {
        let url = format!("{}/v2/images", self.config.image_url.trim_end_matches('/'));
        let response = self
            .send(|| self.client.get(&url).query(&[("name", name)]))
            .await?;
        let list: ImageList = check_status(response, "list images").await?.json().await?;
        list.images
            .into_iter()
            .next()
            .map(|i| i.id)
            .ok_or_else(|| CloudError::Rejected(format!("unknown image '{name}'")))
    }

    fn server_body(&self, request: &ProvisionRequest, image_id: &str, flavor_id: &str) -> Value {
        let member = &request.member;
        let security_groups: Vec<Value> = self
            .config
            .security_groups
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();

        let mut server = json!({
            "name": member.hostname,
            "imageRef": image_id,
            "flavorRef": flavor_id,
            "user_data": BASE64.encode(request.user_data.as_bytes()),
            "metadata": {
                "member-id": member.id.to_string(),
                "member-url": request.callback_url,
            },
            "security_groups": security_groups,
            "availability_zone": self.config.availability_zone,
            "block_device_mapping_v2": [{
                "boot_index": 0,
                "uuid": image_id,
                "source_type": "image",
                "destination_type": "volume",
                "volume_size": member.disk_size_gb,
                "delete_on_termination": member.delete_boot_volume,
            }],
        });
        if let Some(key_name) = &self.config.key_name {
            server["key_name"] = json!(key_name);
        }
        json!({ "server": server })
    }
}

#[async_trait]
impl CloudBackend for OpenStackBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, request: &ProvisionRequest) -> CloudResult<String> {
        let member = &request.member;
        let image_id = self.resolve_image(&member.image).await?;
        let flavor_id = self.resolve_flavor(&member.flavor).await?;
        let body = self.server_body(request, &image_id, &flavor_id);

        let url = self.compute("/servers");
        let response = self.send(|| self.client.post(&url).json(&body)).await?;
        let created: ServerCreated = check_status(response, "create server")
            .await
            .map_err(|e| match e {
                CloudError::NotFound(detail) => CloudError::Rejected(detail),
                other => other,
            })?
            .json()
            .await?;

        info!(
            backend = %self.name,
            hostname = %member.hostname,
            server = %created.server.id,
            "openstack server requested"
        );
        Ok(created.server.id)
    }

    async fn terminate(&self, member: &SwarmMember) -> CloudResult<()> {
        if member.cloud_id.is_empty() {
            return Err(CloudError::NotFound(format!(
                "{} has no openstack server id",
                member.hostname
            )));
        }
        let url = self.compute(&format!("/servers/{}", member.cloud_id));
        let response = self.send(|| self.client.delete(&url)).await?;
        check_status(response, "delete server").await?;

        if !member.delete_boot_volume {
            warn!(
                backend = %self.name,
                hostname = %member.hostname,
                "boot volume retained after termination"
            );
        }
        info!(backend = %self.name, server = %member.cloud_id, "openstack server deleted");
        Ok(())
    }

    async fn reboot(&self, member: &SwarmMember) -> CloudResult<()> {
        ensure_running(member)?;
        let url = self.compute(&format!("/servers/{}/action", member.cloud_id));
        let body = json!({ "reboot": { "type": "SOFT" } });
        let response = self.send(|| self.client.post(&url).json(&body)).await?;
        check_status(response, "reboot server").await?;
        info!(backend = %self.name, server = %member.cloud_id, "openstack server rebooted");
        Ok(())
    }
}

/// Pass a successful response through; classify anything else.
pub(crate) async fn check_status(response: Response, context: &str) -> CloudResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CloudError::from_status(status, context, body.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_state::{CloudProvider, MemberStatus};
    use mockito::{Matcher, Server, ServerGuard};

    fn config_for(server: &ServerGuard) -> OpenStackConfig {
        OpenStackConfig {
            auth_url: format!("{}/v3", server.url()),
            compute_url: format!("{}/compute/v2.1", server.url()),
            image_url: format!("{}/image", server.url()),
            username: "fleet".to_string(),
            password: "secret".to_string(),
            project_id: "proj-1".to_string(),
            user_domain: "Default".to_string(),
            key_name: Some("swarm-shared".to_string()),
            availability_zone: "nova".to_string(),
            security_groups: vec!["default".to_string()],
        }
    }

    fn backend_for(server: &ServerGuard) -> OpenStackBackend {
        OpenStackBackend::new("moc_kaizen", config_for(server), Duration::from_secs(5)).unwrap()
    }

    fn test_member() -> SwarmMember {
        let mut member = SwarmMember::new(CloudProvider::MocKaizen, "crawler-x1y2", "ubuntu-xenial", "m1.small");
        member.configuration = "#cloud-config\nhostname: %HOSTNAME%".to_string();
        member.disk_size_gb = 20;
        member
    }

    async fn mock_auth(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/v3/auth/tokens")
            .match_body(Matcher::PartialJson(json!({
                "auth": { "scope": { "project": { "id": "proj-1" } } }
            })))
            .with_status(201)
            .with_header(SUBJECT_TOKEN_HEADER, "tok-1")
            .with_body("{}")
            .create_async()
            .await
    }

    #[tokio::test]
    async fn create_resolves_image_and_flavor_then_posts_server() {
        let mut server = Server::new_async().await;
        let auth = mock_auth(&mut server).await;
        let images = server
            .mock("GET", "/image/v2/images")
            .match_query(Matcher::UrlEncoded("name".into(), "ubuntu-xenial".into()))
            .match_header(AUTH_TOKEN_HEADER, "tok-1")
            .with_status(200)
            .with_body(r#"{"images":[{"id":"img-123","name":"ubuntu-xenial"}]}"#)
            .create_async()
            .await;
        let flavors = server
            .mock("GET", "/compute/v2.1/flavors")
            .with_status(200)
            .with_body(r#"{"flavors":[{"id":"1","name":"m1.tiny"},{"id":"2","name":"m1.small"}]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/compute/v2.1/servers")
            .match_body(Matcher::PartialJson(json!({
                "server": {
                    "name": "crawler-x1y2",
                    "imageRef": "img-123",
                    "flavorRef": "2",
                    "key_name": "swarm-shared",
                    "metadata": { "member-url": "http://cb/checkin" },
                    "user_data": BASE64.encode("#cloud-config\nhostname: crawler-x1y2"),
                }
            })))
            .with_status(202)
            .with_body(r#"{"server":{"id":"srv-9"}}"#)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let request = ProvisionRequest::new(test_member(), "crawlers", "http://cb/checkin");
        let id = backend.create(&request).await.unwrap();

        assert_eq!(id, "srv-9");
        auth.assert_async().await;
        images.assert_async().await;
        flavors.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn create_with_unknown_flavor_is_rejected() {
        let mut server = Server::new_async().await;
        mock_auth(&mut server).await;
        server
            .mock("GET", "/image/v2/images")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"images":[{"id":"img-123"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/compute/v2.1/flavors")
            .with_status(200)
            .with_body(r#"{"flavors":[{"id":"1","name":"m1.tiny"}]}"#)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let request = ProvisionRequest::new(test_member(), "crawlers", "http://cb");
        let err = backend.create(&request).await.unwrap_err();
        assert!(matches!(err, CloudError::Rejected(msg) if msg.contains("m1.small")));
    }

    #[tokio::test]
    async fn quota_rejection_maps_to_rejected() {
        let mut server = Server::new_async().await;
        mock_auth(&mut server).await;
        server
            .mock("GET", "/image/v2/images")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"images":[{"id":"img-123"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/compute/v2.1/flavors")
            .with_status(200)
            .with_body(r#"{"flavors":[{"id":"2","name":"m1.small"}]}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/compute/v2.1/servers")
            .with_status(403)
            .with_body("Quota exceeded for instances")
            .create_async()
            .await;

        let backend = backend_for(&server);
        let request = ProvisionRequest::new(test_member(), "crawlers", "http://cb");
        let err = backend.create(&request).await.unwrap_err();
        assert!(matches!(err, CloudError::Rejected(msg) if msg.contains("Quota")));
    }

    #[tokio::test]
    async fn unreachable_keystone_is_unavailable() {
        let config = OpenStackConfig {
            auth_url: "http://127.0.0.1:1/v3".to_string(),
            compute_url: "http://127.0.0.1:1/compute".to_string(),
            image_url: "http://127.0.0.1:1/image".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            project_id: "p".to_string(),
            user_domain: "Default".to_string(),
            key_name: None,
            availability_zone: "nova".to_string(),
            security_groups: vec![],
        };
        let backend = OpenStackBackend::new("moc_engage1", config, Duration::from_secs(2)).unwrap();
        let request = ProvisionRequest::new(test_member(), "crawlers", "http://cb");
        let err = backend.create(&request).await.unwrap_err();
        assert!(matches!(err, CloudError::Unavailable(_)));
    }

    #[tokio::test]
    async fn terminate_deletes_server_and_maps_missing_to_not_found() {
        let mut server = Server::new_async().await;
        mock_auth(&mut server).await;
        let delete = server
            .mock("DELETE", "/compute/v2.1/servers/srv-9")
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("DELETE", "/compute/v2.1/servers/srv-gone")
            .with_status(404)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let mut member = test_member();
        member.status = MemberStatus::Creating;
        member.cloud_id = "srv-9".to_string();
        backend.terminate(&member).await.unwrap();
        delete.assert_async().await;

        member.cloud_id = "srv-gone".to_string();
        let err = backend.terminate(&member).await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
    }

    #[tokio::test]
    async fn terminate_without_server_id_is_not_found() {
        let server = Server::new_async().await;
        let backend = backend_for(&server);
        let err = backend.terminate(&test_member()).await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once() {
        let mut server = Server::new_async().await;
        let auth = server
            .mock("POST", "/v3/auth/tokens")
            .with_status(201)
            .with_header(SUBJECT_TOKEN_HEADER, "tok-1")
            .expect(2)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/compute/v2.1/servers/srv-9")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let mut member = test_member();
        member.cloud_id = "srv-9".to_string();
        // The retry also gets 401; it is classified rather than retried again.
        let err = backend.terminate(&member).await.unwrap_err();
        assert!(matches!(err, CloudError::Rejected(_)));
        auth.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn reboot_requires_running_and_posts_action() {
        let mut server = Server::new_async().await;
        mock_auth(&mut server).await;
        let action = server
            .mock("POST", "/compute/v2.1/servers/srv-9/action")
            .match_body(Matcher::Json(json!({ "reboot": { "type": "SOFT" } })))
            .with_status(202)
            .create_async()
            .await;

        let backend = backend_for(&server);
        let mut member = test_member();
        member.cloud_id = "srv-9".to_string();
        member.status = MemberStatus::Creating;
        assert!(matches!(
            backend.reboot(&member).await,
            Err(CloudError::InvalidState(_))
        ));

        member.status = MemberStatus::Running;
        member.ip = Some("10.0.0.4".parse().unwrap());
        backend.reboot(&member).await.unwrap();
        action.assert_async().await;
    }
}
