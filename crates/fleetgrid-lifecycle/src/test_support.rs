//! Scripted in-process backend for lifecycle tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetgrid_cloud::{BackendRegistry, CloudBackend, CloudError, CloudResult, ProvisionRequest};
use fleetgrid_state::{CloudProvider, StateStore, SwarmMember};

use crate::controller::{LifecycleConfig, MemberController};

#[derive(Default)]
pub struct FakeBackend {
    /// `"<op> <hostname>"` for every call, in order.
    pub calls: Mutex<Vec<String>>,
    /// Hostname → error returned by `create`.
    pub create_failures: Mutex<HashMap<String, CloudError>>,
    pub terminate_failure: Mutex<Option<CloudError>>,
    pub reboot_failure: Mutex<Option<CloudError>>,
    /// Every call sleeps this long first.
    pub delay: Mutex<Option<Duration>>,
    /// Last `create` user data.
    pub last_user_data: Mutex<Option<String>>,
    /// Runs inside `create` after the call is recorded, before it answers.
    pub on_create: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create_for(&self, hostname: &str, err: CloudError) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(hostname.to_string(), err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn enter(&self, op: &str, hostname: &str) {
        self.calls.lock().unwrap().push(format!("{op} {hostname}"));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create(&self, request: &ProvisionRequest) -> CloudResult<String> {
        self.enter("create", &request.member.hostname).await;
        *self.last_user_data.lock().unwrap() = Some(request.user_data.clone());
        if let Some(hook) = self.on_create.lock().unwrap().as_ref() {
            hook();
        }
        match self.create_failures.lock().unwrap().get(&request.member.hostname) {
            Some(err) => Err(err.clone()),
            None => Ok(format!("srv-{}", request.member.hostname)),
        }
    }

    async fn terminate(&self, member: &SwarmMember) -> CloudResult<()> {
        self.enter("terminate", &member.hostname).await;
        match self.terminate_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn reboot(&self, member: &SwarmMember) -> CloudResult<()> {
        self.enter("reboot", &member.hostname).await;
        match self.reboot_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn test_config() -> LifecycleConfig {
    LifecycleConfig {
        callback_base_url: "http://fleet.test".to_string(),
        backend_timeout: Duration::from_secs(5),
        max_parallel: 4,
        hostname_attempts: 8,
    }
}

/// In-memory store plus a controller whose MOC Kaizen backend is `backend`.
pub fn harness(backend: Arc<FakeBackend>, config: LifecycleConfig) -> (StateStore, Arc<MemberController>) {
    let store = StateStore::open_in_memory().unwrap();
    let registry = BackendRegistry::new().with_backend(CloudProvider::MocKaizen, backend);
    let controller = Arc::new(MemberController::new(store.clone(), registry, config));
    (store, controller)
}

pub fn pending_member(store: &StateStore, hostname: &str) -> SwarmMember {
    let mut member = SwarmMember::new(CloudProvider::MocKaizen, hostname, "ubuntu", "m1.small");
    member.configuration = "host=%HOSTNAME% url=%URL%".to_string();
    store.insert_member(&member).unwrap();
    member
}
