//! Member controller — drives one member through its lifecycle.
//!
//! Every operation takes the member's lock, asks [`next_status`] whether
//! the event is legal, calls the cloud backend under a timeout, and
//! persists the outcome before returning. A backend failure always leaves
//! the member in `Error` with an audit entry saying why, and is then
//! handed back to the caller.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use fleetgrid_cloud::{BackendRegistry, CloudResult, ProvisionRequest};
use fleetgrid_state::{LogCategory, MemberId, MemberStatus, StateStore, SwarmMember};

use crate::audit::AuditLog;
use crate::error::{LifecycleError, LifecycleResult};
use crate::locks::MemberLocks;
use crate::queues::attached_queues;
use crate::transition::{LifecycleEvent, Transition, next_status};

/// Tunables for the controller and the bulk fan-out.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Public base URL instances use to reach the check-in endpoint.
    pub callback_base_url: String,
    /// Upper bound on any single backend call.
    pub backend_timeout: Duration,
    /// Concurrent backend calls per bulk operation.
    pub max_parallel: usize,
    /// Suffixes tried per generated hostname before giving up.
    pub hostname_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            callback_base_url: "http://127.0.0.1:8480".to_string(),
            backend_timeout: Duration::from_secs(120),
            max_parallel: 8,
            hostname_attempts: 16,
        }
    }
}

/// Body returned to an instance that checked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub queues: Vec<String>,
}

pub struct MemberController {
    store: StateStore,
    backends: BackendRegistry,
    audit: AuditLog,
    locks: MemberLocks,
    config: LifecycleConfig,
}

impl MemberController {
    pub fn new(store: StateStore, backends: BackendRegistry, config: LifecycleConfig) -> Self {
        Self {
            audit: AuditLog::new(store.clone()),
            store,
            backends,
            locks: MemberLocks::new(),
            config,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// The URL substituted for `%URL%` in the member's boot configuration.
    pub fn callback_url(&self, id: &MemberId) -> String {
        format!(
            "{}/api/v1/members/{}/checkin",
            self.config.callback_base_url.trim_end_matches('/'),
            id
        )
    }

    fn load(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        self.store
            .get_member(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("member {id}")))
    }

    /// Check an event against the member's current status, logging refusals.
    fn decide(&self, member: &SwarmMember, event: LifecycleEvent) -> LifecycleResult<Transition> {
        next_status(member.status, event).inspect_err(|e| {
            warn!(member = %member.id, hostname = %member.hostname, error = %e, "operation refused");
        })
    }

    /// Persist the outcome of `event`. `edit` adjusts the non-status fields.
    fn apply<F>(&self, id: &MemberId, event: LifecycleEvent, edit: F) -> LifecycleResult<SwarmMember>
    where
        F: FnOnce(&mut SwarmMember),
    {
        self.store.update_member(id, |member| {
            if let Transition::To(status) = next_status(member.status, event)? {
                member.status = status;
            }
            edit(member);
            Ok::<(), LifecycleError>(())
        })
    }

    async fn call_backend<T, Fut>(&self, op: &str, call: Fut) -> LifecycleResult<T>
    where
        Fut: Future<Output = CloudResult<T>>,
    {
        match tokio::time::timeout(self.config.backend_timeout, call).await {
            Ok(result) => result.map_err(LifecycleError::from),
            Err(_) => Err(LifecycleError::BackendUnavailable(format!(
                "{op} timed out after {:?}",
                self.config.backend_timeout
            ))),
        }
    }

    /// Persist `Error` and an audit entry for a failed backend call, then
    /// hand back the original failure.
    fn fail(&self, member: &SwarmMember, op: &str, err: LifecycleError) -> LifecycleError {
        self.fail_with(member, op, err, |_| ())
    }

    /// As [`fail`](Self::fail), with `edit` applied alongside the status change.
    fn fail_with<F>(&self, member: &SwarmMember, op: &str, err: LifecycleError, edit: F) -> LifecycleError
    where
        F: FnOnce(&mut SwarmMember),
    {
        warn!(member = %member.id, hostname = %member.hostname, op, error = %err, "backend call failed");
        let persisted = self.apply(&member.id, LifecycleEvent::BackendFailed, |m| {
            m.ip = None;
            edit(m);
        });
        if let Err(e) = persisted {
            error!(member = %member.id, error = %e, "could not persist error status");
            return e;
        }
        if let Err(e) = self
            .audit
            .record(&member.id, LogCategory::Error, format!("{op} failed: {err}"))
        {
            error!(member = %member.id, error = %e, "could not write audit entry");
            return e.into();
        }
        err
    }

    /// Store the provider id of a freshly created instance.
    fn record_provisioned(&self, id: &MemberId, cloud_id: &str, backend: &str) -> LifecycleResult<SwarmMember> {
        let updated = self.apply(id, LifecycleEvent::ProvisionSucceeded, |m| {
            m.cloud_id = cloud_id.to_string();
        })?;
        self.audit.record(
            id,
            LogCategory::Installation,
            format!("instance {cloud_id} requested from {backend}"),
        )?;
        Ok(updated)
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Ask the member's backend to create its instance.
    ///
    /// Allowed from `PendingCreation` or `Terminated`. The member is
    /// persisted as `Creating` before the backend is called and stays there
    /// on success; only check-in moves it to `Running`.
    pub async fn create(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        let _guard = self.locks.acquire(*id).await;
        self.create_locked(id).await
    }

    async fn create_locked(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        let member = self.load(id)?;
        self.decide(&member, LifecycleEvent::BeginCreate)?;

        let member = self.apply(id, LifecycleEvent::BeginCreate, |m| {
            m.cloud_id.clear();
            m.ip = None;
        })?;
        self.audit.record(
            id,
            LogCategory::Installation,
            format!("create requested on {}", member.cloud),
        )?;

        let swarm_name = self.store.swarm_name_of(&member)?;
        let request = ProvisionRequest::new(member.clone(), &swarm_name, &self.callback_url(id));
        let backend = self.backends.backend_for(member.cloud);

        match self.call_backend("create", backend.create(&request)).await {
            Ok(cloud_id) => match self.record_provisioned(id, &cloud_id, backend.name()) {
                Ok(updated) => {
                    info!(
                        member = %id,
                        hostname = %updated.hostname,
                        cloud = %updated.cloud,
                        cloud_id = %cloud_id,
                        "member creating"
                    );
                    Ok(updated)
                }
                Err(e) => {
                    // The instance exists; keep its id so terminate can reach it.
                    error!(member = %id, cloud_id = %cloud_id, error = %e, "instance created but not recorded");
                    let op = format!("recording instance {cloud_id}");
                    Err(self.fail_with(&member, &op, e, |m| m.cloud_id = cloud_id.clone()))
                }
            },
            Err(e) => Err(self.fail(&member, "create", e)),
        }
    }

    /// Complete the boot handshake for a member in `Creating`.
    ///
    /// Returns the queue names the instance should attach to. Not
    /// idempotent: a second check-in for the same member is refused.
    pub async fn check_in(&self, id: &MemberId, ip: IpAddr) -> LifecycleResult<CheckInResponse> {
        let _guard = self.locks.acquire(*id).await;
        let member = self.load(id)?;
        self.decide(&member, LifecycleEvent::CheckIn)?;

        let member = self.apply(id, LifecycleEvent::CheckIn, |m| m.ip = Some(ip))?;
        self.audit
            .record(id, LogCategory::Notification, format!("checked in from {ip}"))?;

        let swarm_name = self.store.swarm_name_of(&member)?;
        let queues = attached_queues(&swarm_name, &member.hostname);
        info!(member = %id, hostname = %member.hostname, %ip, swarm = %swarm_name, "member running");
        Ok(CheckInResponse { queues })
    }

    /// Delete the member's instance.
    ///
    /// A member that was never created, or is already `Terminated`, is left
    /// untouched and no backend call is made. A member with no provider id
    /// (its create failed before the provider answered) has nothing to
    /// delete and moves straight to `Terminated`.
    pub async fn terminate(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        let _guard = self.locks.acquire(*id).await;
        self.terminate_locked(id).await
    }

    async fn terminate_locked(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        let member = self.load(id)?;
        if self.decide(&member, LifecycleEvent::Terminate)? == Transition::NoOp {
            info!(member = %id, status = %member.status, "nothing to terminate");
            return Ok(member);
        }

        if member.cloud_id.is_empty() {
            let updated = self.apply(id, LifecycleEvent::Terminated, |m| m.ip = None)?;
            self.audit.record(
                id,
                LogCategory::Installation,
                "no provider instance recorded; marked terminated",
            )?;
            info!(member = %id, hostname = %updated.hostname, from = %member.status, "member terminated without backend call");
            return Ok(updated);
        }

        let backend = self.backends.backend_for(member.cloud);
        match self.call_backend("terminate", backend.terminate(&member)).await {
            Ok(()) => {
                let updated = self.apply(id, LifecycleEvent::Terminated, |m| m.ip = None)?;
                self.audit
                    .record(id, LogCategory::Installation, "instance terminated")?;
                info!(member = %id, hostname = %updated.hostname, "member terminated");
                Ok(updated)
            }
            Err(e) => Err(self.fail(&member, "terminate", e)),
        }
    }

    /// Reboot a running member. Status does not change.
    pub async fn reboot(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        let _guard = self.locks.acquire(*id).await;
        let member = self.load(id)?;
        self.decide(&member, LifecycleEvent::Reboot)?;

        let backend = self.backends.backend_for(member.cloud);
        match self.call_backend("reboot", backend.reboot(&member)).await {
            Ok(()) => {
                self.audit
                    .record(id, LogCategory::Notification, "instance rebooted")?;
                info!(member = %id, hostname = %member.hostname, "member rebooted");
                Ok(member)
            }
            Err(e) => Err(self.fail(&member, "reboot", e)),
        }
    }

    /// Terminate then create, under one hold of the member's lock. If the
    /// terminate step fails the member stays in `Error` and nothing is
    /// created.
    pub async fn rebuild(&self, id: &MemberId) -> LifecycleResult<SwarmMember> {
        let _guard = self.locks.acquire(*id).await;
        self.terminate_locked(id).await?;
        self.create_locked(id).await
    }

    /// Administrative status override.
    ///
    /// `Running` needs an IP (the given one or the one already recorded);
    /// every other target clears the IP, and `PendingCreation` also forgets
    /// the provider instance id. No backend is called.
    pub async fn override_status(
        &self,
        id: &MemberId,
        status: MemberStatus,
        ip: Option<IpAddr>,
    ) -> LifecycleResult<SwarmMember> {
        let _guard = self.locks.acquire(*id).await;
        let before = self.load(id)?;

        let updated = self.apply(id, LifecycleEvent::AdminOverride(status), |m| {
            m.ip = match status {
                MemberStatus::Running => ip.or(m.ip),
                _ => None,
            };
            if status == MemberStatus::PendingCreation {
                m.cloud_id.clear();
            }
        })?;
        self.audit.record(
            id,
            LogCategory::Other,
            format!("status overridden from {} to {}", before.status, updated.status),
        )?;
        info!(member = %id, from = %before.status, to = %updated.status, "status overridden");
        Ok(updated)
    }

    /// Remove a member record. Unless forced, only `Terminated` or `Error`
    /// members may be removed. Its audit trail survives.
    pub async fn delete(&self, id: &MemberId, force: bool) -> LifecycleResult<()> {
        let _guard = self.locks.acquire(*id).await;
        let member = self.load(id)?;
        if !force && !matches!(member.status, MemberStatus::Terminated | MemberStatus::Error) {
            return Err(LifecycleError::InvalidState(format!(
                "{} is {}; terminate it first or force deletion",
                member.hostname, member.status
            )));
        }

        self.audit.record(
            id,
            LogCategory::Other,
            format!("member {} deleted while {}", member.hostname, member.status),
        )?;
        self.store.delete_member(id)?;
        info!(member = %id, hostname = %member.hostname, force, "member deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeBackend, harness, pending_member, test_config};
    use fleetgrid_cloud::CloudError;
    use fleetgrid_state::{CloudProvider, Swarm};

    fn ip() -> IpAddr {
        "10.20.0.7".parse().unwrap()
    }

    #[tokio::test]
    async fn create_stays_in_creating_and_renders_boot_config() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");

        let created = controller.create(&member.id).await.unwrap();
        assert_eq!(created.status, MemberStatus::Creating);
        assert_eq!(created.cloud_id, "srv-web-1");
        assert!(created.ip.is_none());
        assert_eq!(
            backend.last_user_data.lock().unwrap().as_deref(),
            Some(format!("host=web-1 url=http://fleet.test/api/v1/members/{}/checkin", member.id).as_str())
        );

        let trail = controller.audit().trail(&member.id).unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|e| e.category == LogCategory::Installation));
    }

    #[tokio::test]
    async fn create_while_running_is_refused_and_unchanged() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();
        let before = store.get_member(&member.id).unwrap().unwrap();

        let err = controller.create(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(_)));
        assert_eq!(store.get_member(&member.id).unwrap().unwrap(), before);
        assert_eq!(backend.calls(), vec!["create web-1"]);
    }

    #[tokio::test]
    async fn create_failure_persists_error_and_propagates() {
        let backend = FakeBackend::new();
        backend.fail_create_for("web-1", CloudError::Rejected("unknown flavor".into()));
        let (store, controller) = harness(backend, test_config());
        let member = pending_member(&store, "web-1");

        let err = controller.create(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ProvisioningRejected(_)));

        let stored = store.get_member(&member.id).unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Error);
        assert!(stored.ip.is_none());
        let trail = controller.audit().trail(&member.id).unwrap();
        let last = trail.last().unwrap();
        assert_eq!(last.category, LogCategory::Error);
        assert!(last.message.contains("unknown flavor"));
    }

    #[tokio::test]
    async fn backend_timeout_is_unavailable_and_audited() {
        let backend = FakeBackend::new();
        *backend.delay.lock().unwrap() = Some(Duration::from_millis(200));
        let mut config = test_config();
        config.backend_timeout = Duration::from_millis(20);
        let (store, controller) = harness(backend, config);
        let member = pending_member(&store, "slow-1");

        let err = controller.create(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::BackendUnavailable(ref m) if m.contains("timed out")));
        assert_eq!(store.get_member(&member.id).unwrap().unwrap().status, MemberStatus::Error);
        let trail = controller.audit().trail(&member.id).unwrap();
        assert!(trail.last().unwrap().message.contains("timed out"));
    }

    #[tokio::test]
    async fn unwired_provider_fails_not_implemented() {
        let (store, controller) = harness(FakeBackend::new(), test_config());
        let member = SwarmMember::new(CloudProvider::IbmBluemix, "bm-1", "img", "small");
        store.insert_member(&member).unwrap();

        let err = controller.create(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotImplemented(_)));
        assert_eq!(store.get_member(&member.id).unwrap().unwrap().status, MemberStatus::Error);
    }

    #[tokio::test]
    async fn check_in_returns_queues_once() {
        let (store, controller) = harness(FakeBackend::new(), test_config());
        let swarm = Swarm::new("crawlers");
        store.put_swarm(&swarm).unwrap();
        let mut member = SwarmMember::new(CloudProvider::MocKaizen, "crawler-ab12", "img", "m1.small");
        member.swarm_id = Some(swarm.id);
        store.insert_member(&member).unwrap();
        controller.create(&member.id).await.unwrap();

        let response = controller.check_in(&member.id, ip()).await.unwrap();
        assert_eq!(
            response.queues,
            vec![
                "crawlers-crawler-ab12-task",
                "crawlers-crawler-ab12-networking",
                "crawlers-crawler-ab12-auxiliary"
            ]
        );
        let stored = store.get_member(&member.id).unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Running);
        assert_eq!(stored.ip, Some(ip()));

        let again = controller.check_in(&member.id, ip()).await.unwrap_err();
        assert!(matches!(again, LifecycleError::InvalidState(_)));
    }

    #[tokio::test]
    async fn check_in_for_unknown_or_pending_member_fails() {
        let (store, controller) = harness(FakeBackend::new(), test_config());
        assert!(matches!(
            controller.check_in(&MemberId::new(), ip()).await,
            Err(LifecycleError::NotFound(_))
        ));

        let member = pending_member(&store, "web-1");
        assert!(matches!(
            controller.check_in(&member.id, ip()).await,
            Err(LifecycleError::InvalidState(_))
        ));
        assert!(store.get_member(&member.id).unwrap().unwrap().ip.is_none());
    }

    #[tokio::test]
    async fn terminate_pending_is_a_noop_without_backend_call() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");

        let result = controller.terminate(&member.id).await.unwrap();
        assert_eq!(result.status, MemberStatus::PendingCreation);
        assert!(backend.calls().is_empty());
        assert!(controller.audit().trail(&member.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminate_running_clears_ip() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();

        let terminated = controller.terminate(&member.id).await.unwrap();
        assert_eq!(terminated.status, MemberStatus::Terminated);
        assert!(terminated.ip.is_none());

        // Already gone: second terminate is a no-op.
        controller.terminate(&member.id).await.unwrap();
        assert_eq!(backend.calls(), vec!["create web-1", "terminate web-1"]);
    }

    #[tokio::test]
    async fn terminate_failure_lands_in_error() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();
        *backend.terminate_failure.lock().unwrap() = Some(CloudError::NotFound("gone".into()));

        let err = controller.terminate(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
        let stored = store.get_member(&member.id).unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Error);
        assert!(stored.ip.is_none());

        // Error members can still be cleaned up.
        *backend.terminate_failure.lock().unwrap() = None;
        let cleaned = controller.terminate(&member.id).await.unwrap();
        assert_eq!(cleaned.status, MemberStatus::Terminated);
    }

    #[tokio::test]
    async fn failed_create_can_be_terminated_and_rebuilt() {
        let backend = FakeBackend::new();
        backend.fail_create_for("web-1", CloudError::Unavailable("connection refused".into()));
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");

        controller.create(&member.id).await.unwrap_err();
        let stored = store.get_member(&member.id).unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Error);
        assert!(stored.cloud_id.is_empty());

        // No provider id: nothing to delete remotely.
        let cleaned = controller.terminate(&member.id).await.unwrap();
        assert_eq!(cleaned.status, MemberStatus::Terminated);
        assert_eq!(backend.calls(), vec!["create web-1"]);
        let trail = controller.audit().trail(&member.id).unwrap();
        assert!(trail.last().unwrap().message.contains("marked terminated"));

        // Rebuild from Error also skips the remote delete and recreates.
        controller
            .override_status(&member.id, MemberStatus::Error, None)
            .await
            .unwrap();
        backend.create_failures.lock().unwrap().clear();
        let rebuilt = controller.rebuild(&member.id).await.unwrap();
        assert_eq!(rebuilt.status, MemberStatus::Creating);
        assert_eq!(rebuilt.cloud_id, "srv-web-1");
        assert_eq!(backend.calls(), vec!["create web-1", "create web-1"]);
    }

    #[tokio::test]
    async fn reboot_failure_lands_in_error() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();
        *backend.reboot_failure.lock().unwrap() = Some(CloudError::Unavailable("nova down".into()));

        let err = controller.reboot(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::BackendUnavailable(_)));

        let stored = store.get_member(&member.id).unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Error);
        assert!(stored.ip.is_none());
        assert_eq!(stored.cloud_id, "srv-web-1");
        let last = controller.audit().trail(&member.id).unwrap().pop().unwrap();
        assert_eq!(last.category, LogCategory::Error);
        assert!(last.message.starts_with("reboot failed"));
        assert!(last.message.contains("nova down"));
    }

    #[tokio::test]
    async fn unrecorded_instance_keeps_its_provider_id() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");

        // The record moves on while the provider is answering, so storing
        // the new instance id is refused.
        let hook_store = store.clone();
        let id = member.id;
        *backend.on_create.lock().unwrap() = Some(Box::new(move || {
            hook_store
                .update_member(&id, |m| {
                    m.status = MemberStatus::Terminated;
                    Ok::<(), fleetgrid_state::StateError>(())
                })
                .unwrap();
        }));

        let err = controller.create(&member.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(_)));

        let stored = store.get_member(&member.id).unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Error);
        assert_eq!(stored.cloud_id, "srv-web-1");
        let last = controller.audit().trail(&member.id).unwrap().pop().unwrap();
        assert_eq!(last.category, LogCategory::Error);
        assert!(last.message.contains("srv-web-1"));

        // The leaked instance is still reachable for cleanup.
        *backend.on_create.lock().unwrap() = None;
        controller.terminate(&member.id).await.unwrap();
        assert_eq!(backend.calls(), vec!["create web-1", "terminate web-1"]);
    }

    #[tokio::test]
    async fn reboot_only_while_running() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");

        assert!(matches!(
            controller.reboot(&member.id).await,
            Err(LifecycleError::InvalidState(_))
        ));
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();

        let rebooted = controller.reboot(&member.id).await.unwrap();
        assert_eq!(rebooted.status, MemberStatus::Running);
        assert_eq!(backend.calls(), vec!["create web-1", "reboot web-1"]);
    }

    #[tokio::test]
    async fn rebuild_goes_through_terminate_then_create() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();

        let rebuilt = controller.rebuild(&member.id).await.unwrap();
        assert_eq!(rebuilt.status, MemberStatus::Creating);
        assert!(rebuilt.ip.is_none());
        assert_eq!(
            backend.calls(),
            vec!["create web-1", "terminate web-1", "create web-1"]
        );
        let messages: Vec<String> = controller
            .audit()
            .trail(&member.id)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        let terminated_at = messages.iter().position(|m| m == "instance terminated").unwrap();
        let recreate_at = messages.iter().rposition(|m| m.starts_with("create requested")).unwrap();
        assert!(terminated_at < recreate_at);
    }

    #[tokio::test]
    async fn rebuild_aborts_when_terminate_fails() {
        let backend = FakeBackend::new();
        let (store, controller) = harness(backend.clone(), test_config());
        let member = pending_member(&store, "web-1");
        controller.create(&member.id).await.unwrap();
        controller.check_in(&member.id, ip()).await.unwrap();
        *backend.terminate_failure.lock().unwrap() = Some(CloudError::Unavailable("down".into()));

        assert!(matches!(
            controller.rebuild(&member.id).await,
            Err(LifecycleError::BackendUnavailable(_))
        ));
        assert_eq!(store.get_member(&member.id).unwrap().unwrap().status, MemberStatus::Error);
        assert_eq!(backend.calls(), vec!["create web-1", "terminate web-1"]);
    }

    #[tokio::test]
    async fn concurrent_creates_on_one_member_do_not_interleave() {
        let backend = FakeBackend::new();
        *backend.delay.lock().unwrap() = Some(Duration::from_millis(30));
        let (store, controller) = harness(backend.clone(), test_config());
        let id = pending_member(&store, "web-1").id;

        let a = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.create(&id).await })
        };
        let b = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.create(&id).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(LifecycleError::InvalidState(_)))));
        assert_eq!(backend.calls(), vec!["create web-1"]);
    }

    #[tokio::test]
    async fn override_revalidates_consistency() {
        let (store, controller) = harness(FakeBackend::new(), test_config());
        let member = pending_member(&store, "web-1");

        let err = controller
            .override_status(&member.id, MemberStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Inconsistent(_)));
        assert_eq!(
            store.get_member(&member.id).unwrap().unwrap().status,
            MemberStatus::PendingCreation
        );

        let running = controller
            .override_status(&member.id, MemberStatus::Running, Some(ip()))
            .await
            .unwrap();
        assert_eq!(running.ip, Some(ip()));

        let pending = controller
            .override_status(&member.id, MemberStatus::PendingCreation, None)
            .await
            .unwrap();
        assert!(pending.ip.is_none());
        let trail = controller.audit().trail(&member.id).unwrap();
        assert_eq!(trail.len(), 2);
        assert!(trail.iter().all(|e| e.category == LogCategory::Other));
    }

    #[tokio::test]
    async fn delete_requires_force_unless_finished() {
        let (store, controller) = harness(FakeBackend::new(), test_config());
        let member = pending_member(&store, "web-1");

        assert!(matches!(
            controller.delete(&member.id, false).await,
            Err(LifecycleError::InvalidState(_))
        ));
        controller.delete(&member.id, true).await.unwrap();
        assert!(store.get_member(&member.id).unwrap().is_none());

        let orphaned = store.list_logs(10).unwrap();
        assert_eq!(orphaned.len(), 1);
        assert!(orphaned[0].member_id.is_none());
    }
}
