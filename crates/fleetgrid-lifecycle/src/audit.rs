//! Append-only audit trail for members.

use tracing::debug;

use fleetgrid_state::{LogCategory, MemberId, StateResult, StateStore, SwarmMemberLog};

#[derive(Clone)]
pub struct AuditLog {
    store: StateStore,
}

impl AuditLog {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Record a lifecycle event written by the controller.
    pub fn record(
        &self,
        member: &MemberId,
        category: LogCategory,
        message: impl Into<String>,
    ) -> StateResult<SwarmMemberLog> {
        let entry = self
            .store
            .append_log(&SwarmMemberLog::new(*member, category, message))?;
        debug!(member = %member, category = ?category, message = %entry.message, "audit entry written");
        Ok(entry)
    }

    /// Record an event reported by the instance itself, optionally pointing
    /// at an artifact it produced.
    pub fn report(
        &self,
        member: &MemberId,
        category: LogCategory,
        message: impl Into<String>,
        artifact: Option<String>,
    ) -> StateResult<SwarmMemberLog> {
        let mut entry = SwarmMemberLog::new(*member, category, message);
        entry.artifact = artifact;
        let entry = self.store.append_log(&entry)?;
        debug!(member = %member, category = ?category, "instance report written");
        Ok(entry)
    }

    pub fn trail(&self, member: &MemberId) -> StateResult<Vec<SwarmMemberLog>> {
        self.store.list_logs_for_member(member)
    }
}
