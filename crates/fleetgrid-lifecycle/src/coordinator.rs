//! Swarm coordinator — bulk operations across a swarm.
//!
//! Each member is handled independently: one failure is recorded in the
//! report and the rest carry on. Fan-out runs on a `JoinSet` with a
//! semaphore capping concurrent backend calls at `max_parallel`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use fleetgrid_state::{
    LogCategory, MemberId, MemberStatus, StateError, Swarm, SwarmId, SwarmMember,
};

use crate::clone::{clone_from_template, clone_hostname, random_suffix};
use crate::controller::MemberController;
use crate::error::{LifecycleError, LifecycleResult};

/// Which controller operation a bulk run applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    CreatePending,
    TerminateRunning,
    TerminateAll,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BulkOperation::CreatePending => "create_pending",
            BulkOperation::TerminateRunning => "terminate_running",
            BulkOperation::TerminateAll => "terminate_all",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberOutcome {
    pub member_id: MemberId,
    pub hostname: String,
    pub status: MemberStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub member_id: MemberId,
    pub hostname: String,
    pub error: String,
}

/// Per-member results of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub operation: BulkOperation,
    pub succeeded: Vec<MemberOutcome>,
    pub failed: Vec<MemberFailure>,
}

impl BulkReport {
    fn new(operation: BulkOperation) -> Self {
        Self {
            operation,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Status counts for one swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSummary {
    pub swarm: Swarm,
    pub total: usize,
    pub pending: usize,
    pub creating: usize,
    pub running: usize,
    pub terminated: usize,
    pub error: usize,
}

pub struct SwarmCoordinator {
    controller: Arc<MemberController>,
}

impl SwarmCoordinator {
    pub fn new(controller: Arc<MemberController>) -> Self {
        Self { controller }
    }

    fn swarm(&self, id: &SwarmId) -> LifecycleResult<Swarm> {
        self.controller
            .store()
            .get_swarm(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("swarm {id}")))
    }

    /// Clone `quantity` pending members from a template into the swarm.
    ///
    /// The template record is read, never written.
    pub fn generate_members(
        &self,
        swarm_id: &SwarmId,
        quantity: usize,
        template_id: &MemberId,
    ) -> LifecycleResult<Vec<SwarmMember>> {
        self.generate_members_with(swarm_id, quantity, template_id, random_suffix)
    }

    /// [`generate_members`](Self::generate_members) with a caller-supplied
    /// suffix source.
    pub fn generate_members_with<S>(
        &self,
        swarm_id: &SwarmId,
        quantity: usize,
        template_id: &MemberId,
        mut suffix: S,
    ) -> LifecycleResult<Vec<SwarmMember>>
    where
        S: FnMut() -> String,
    {
        let swarm = self.swarm(swarm_id)?;
        let store = self.controller.store();
        let template = store
            .get_member(template_id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("template member {template_id}")))?;
        let attempts = self.controller.config().hostname_attempts.max(1);

        let mut generated = Vec::with_capacity(quantity);
        for _ in 0..quantity {
            let mut inserted = None;
            for _ in 0..attempts {
                let hostname = clone_hostname(&template.hostname, &suffix());
                let member = clone_from_template(&template, &hostname, Some(swarm.id));
                match store.insert_member(&member) {
                    Ok(()) => {
                        inserted = Some(member);
                        break;
                    }
                    Err(StateError::HostnameTaken(taken)) => {
                        warn!(hostname = %taken, "generated hostname taken, retrying");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let member = inserted.ok_or_else(|| {
                LifecycleError::HostnameCollision(format!(
                    "no free hostname for {} after {attempts} attempts ({} of {quantity} generated)",
                    template.hostname,
                    generated.len()
                ))
            })?;
            self.controller.audit().record(
                &member.id,
                LogCategory::Other,
                format!("generated from template {}", template.hostname),
            )?;
            generated.push(member);
        }

        info!(swarm = %swarm.id, name = %swarm.name, template = %template.hostname, count = generated.len(), "members generated");
        Ok(generated)
    }

    /// Create every `PendingCreation` member of the swarm.
    pub async fn create_pending(&self, swarm_id: &SwarmId) -> LifecycleResult<BulkReport> {
        self.swarm(swarm_id)?;
        let members = self
            .controller
            .store()
            .list_members_by_status(swarm_id, MemberStatus::PendingCreation)?;
        Ok(self.fan_out(BulkOperation::CreatePending, members).await)
    }

    /// Terminate every `Running` member of the swarm.
    pub async fn terminate_running(&self, swarm_id: &SwarmId) -> LifecycleResult<BulkReport> {
        self.swarm(swarm_id)?;
        let members = self
            .controller
            .store()
            .list_members_by_status(swarm_id, MemberStatus::Running)?;
        Ok(self.fan_out(BulkOperation::TerminateRunning, members).await)
    }

    /// Terminate every member that might hold an instance, i.e. everything
    /// not `Terminated` or `PendingCreation`.
    pub async fn terminate_all(&self, swarm_id: &SwarmId) -> LifecycleResult<BulkReport> {
        self.swarm(swarm_id)?;
        let members = self
            .controller
            .store()
            .list_members_for_swarm(swarm_id)?
            .into_iter()
            .filter(|m| {
                !matches!(
                    m.status,
                    MemberStatus::Terminated | MemberStatus::PendingCreation
                )
            })
            .collect();
        Ok(self.fan_out(BulkOperation::TerminateAll, members).await)
    }

    pub fn summary(&self, swarm_id: &SwarmId) -> LifecycleResult<SwarmSummary> {
        let swarm = self.swarm(swarm_id)?;
        let members = self.controller.store().list_members_for_swarm(swarm_id)?;
        let count = |status: MemberStatus| members.iter().filter(|m| m.status == status).count();
        Ok(SwarmSummary {
            total: members.len(),
            pending: count(MemberStatus::PendingCreation),
            creating: count(MemberStatus::Creating),
            running: count(MemberStatus::Running),
            terminated: count(MemberStatus::Terminated),
            error: count(MemberStatus::Error),
            swarm,
        })
    }

    async fn fan_out(&self, operation: BulkOperation, members: Vec<SwarmMember>) -> BulkReport {
        let semaphore = Arc::new(Semaphore::new(self.controller.config().max_parallel.max(1)));
        let mut tasks = JoinSet::new();
        let mut outstanding: HashMap<MemberId, String> = HashMap::new();

        for member in members {
            let controller = Arc::clone(&self.controller);
            let semaphore = Arc::clone(&semaphore);
            let id = member.id;
            outstanding.insert(id, member.hostname);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = match operation {
                    BulkOperation::CreatePending => controller.create(&id).await,
                    BulkOperation::TerminateRunning | BulkOperation::TerminateAll => {
                        controller.terminate(&id).await
                    }
                };
                (id, result)
            });
        }

        let mut report = BulkReport::new(operation);
        while let Some(joined) = tasks.join_next().await {
            let (member_id, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(%operation, error = %e, "bulk task did not complete");
                    continue;
                }
            };
            let hostname = outstanding.remove(&member_id).unwrap_or_default();
            match result {
                Ok(member) => report.succeeded.push(MemberOutcome {
                    member_id,
                    hostname,
                    status: member.status,
                }),
                Err(e) => report.failed.push(MemberFailure {
                    member_id,
                    hostname,
                    error: e.to_string(),
                }),
            }
        }
        // Tasks that panicked never reported back.
        for (member_id, hostname) in outstanding {
            report.failed.push(MemberFailure {
                member_id,
                hostname,
                error: "operation aborted".to_string(),
            });
        }

        report.succeeded.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        report.failed.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        if report.is_clean() {
            info!(%operation, succeeded = report.succeeded.len(), "bulk operation finished");
        } else {
            warn!(
                %operation,
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                hosts = ?report.failed.iter().map(|f| f.hostname.as_str()).collect::<Vec<_>>(),
                "bulk operation finished with failures"
            );
        }
        report
    }
}
