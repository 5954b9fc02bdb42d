//! StateStore — redb-backed state persistence for FleetGrid.
//!
//! Provides typed operations over swarms, swarm members, and the member
//! audit log. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).
//!
//! redb serializes write transactions, so every mutating method here is an
//! atomic single-transaction read-modify-write.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SWARMS).map_err(map_err!(Table))?;
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(HOSTNAMES).map_err(map_err!(Table))?;
        txn.open_table(MEMBER_LOGS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Swarms ─────────────────────────────────────────────────────

    /// Insert or update a swarm.
    pub fn put_swarm(&self, swarm: &Swarm) -> StateResult<()> {
        let key = swarm.id.to_string();
        let value = serde_json::to_vec(swarm).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SWARMS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, name = %swarm.name, "swarm stored");
        Ok(())
    }

    /// Get a swarm by ID.
    pub fn get_swarm(&self, id: &SwarmId) -> StateResult<Option<Swarm>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWARMS).map_err(map_err!(Table))?;
        match table.get(id.to_string().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let swarm: Swarm =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(swarm))
            }
            None => Ok(None),
        }
    }

    /// List all swarms.
    pub fn list_swarms(&self) -> StateResult<Vec<Swarm>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWARMS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let swarm: Swarm =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(swarm);
        }
        Ok(results)
    }

    /// Delete a swarm, detaching (not deleting) its members.
    ///
    /// Returns true if the swarm existed.
    pub fn delete_swarm(&self, id: &SwarmId) -> StateResult<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let mut detached = 0usize;
        {
            let mut swarms = txn.open_table(SWARMS).map_err(map_err!(Table))?;
            existed = swarms.remove(key.as_str()).map_err(map_err!(Write))?.is_some();

            let mut members = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let mut orphans = Vec::new();
            for entry in members.iter().map_err(map_err!(Read))? {
                let (k, value) = entry.map_err(map_err!(Read))?;
                let member: SwarmMember =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if member.swarm_id == Some(*id) {
                    orphans.push((k.value().to_string(), member));
                }
            }
            for (k, mut member) in orphans {
                member.swarm_id = None;
                member.updated_at = epoch_secs();
                let value = serde_json::to_vec(&member).map_err(map_err!(Serialize))?;
                members
                    .insert(k.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                detached += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, detached, "swarm deleted");
        Ok(existed)
    }

    // ── Members ────────────────────────────────────────────────────

    /// Insert a new member, claiming its hostname.
    ///
    /// Fails with `HostnameTaken` if another member already owns the
    /// hostname, and with `Inconsistent` if the record violates the
    /// status/IP invariant.
    pub fn insert_member(&self, member: &SwarmMember) -> StateResult<()> {
        member
            .check_consistency()
            .map_err(StateError::Inconsistent)?;
        let key = member.id.to_string();
        let value = serde_json::to_vec(member).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut members = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            if members.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Write(format!("member {key} already exists")));
            }

            let mut hosts = txn.open_table(HOSTNAMES).map_err(map_err!(Table))?;
            if hosts
                .get(member.hostname.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::HostnameTaken(member.hostname.clone()));
            }
            hosts
                .insert(member.hostname.as_str(), key.as_str())
                .map_err(map_err!(Write))?;
            members
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, hostname = %member.hostname, "member inserted");
        Ok(())
    }

    /// Get a member by ID.
    pub fn get_member(&self, id: &MemberId) -> StateResult<Option<SwarmMember>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        match table.get(id.to_string().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let member: SwarmMember =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(member))
            }
            None => Ok(None),
        }
    }

    /// Look up a member through the hostname index.
    pub fn find_member_by_hostname(&self, hostname: &str) -> StateResult<Option<SwarmMember>> {
        let member_id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let hosts = txn.open_table(HOSTNAMES).map_err(map_err!(Table))?;
            let found = hosts
                .get(hostname)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            found
        };
        match member_id {
            Some(id) => {
                let id = id.parse::<MemberId>().map_err(map_err!(Deserialize))?;
                self.get_member(&id)
            }
            None => Ok(None),
        }
    }

    /// True if any member already owns `hostname`.
    pub fn hostname_taken(&self, hostname: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let hosts = txn.open_table(HOSTNAMES).map_err(map_err!(Table))?;
        let taken = hosts.get(hostname).map_err(map_err!(Read))?.is_some();
        Ok(taken)
    }

    /// List all members.
    pub fn list_members(&self) -> StateResult<Vec<SwarmMember>> {
        self.scan_members(|_| true)
    }

    /// List all members attached to a swarm.
    pub fn list_members_for_swarm(&self, swarm_id: &SwarmId) -> StateResult<Vec<SwarmMember>> {
        self.scan_members(|m| m.swarm_id == Some(*swarm_id))
    }

    /// List the members of a swarm that are currently in `status`.
    pub fn list_members_by_status(
        &self,
        swarm_id: &SwarmId,
        status: MemberStatus,
    ) -> StateResult<Vec<SwarmMember>> {
        self.scan_members(|m| m.swarm_id == Some(*swarm_id) && m.status == status)
    }

    fn scan_members<F>(&self, keep: F) -> StateResult<Vec<SwarmMember>>
    where
        F: Fn(&SwarmMember) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let member: SwarmMember =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&member) {
                results.push(member);
            }
        }
        Ok(results)
    }

    /// Atomically read, modify, and write back a single member.
    ///
    /// The closure sees the current record and may veto the update by
    /// returning an error, in which case nothing is written. The member id
    /// cannot be changed; a changed hostname is re-validated against the
    /// index; the status/IP invariant is checked before commit.
    pub fn update_member<E, F>(&self, id: &MemberId, f: F) -> Result<SwarmMember, E>
    where
        F: FnOnce(&mut SwarmMember) -> Result<(), E>,
        E: From<StateError>,
    {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut members = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let current: SwarmMember = match members.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("member {key}")).into()),
            };

            let mut next = current.clone();
            f(&mut next)?;
            next.id = current.id;
            if next == current {
                return Ok(current);
            }
            next.check_consistency()
                .map_err(StateError::Inconsistent)?;
            next.updated_at = epoch_secs();

            if next.hostname != current.hostname {
                let mut hosts = txn.open_table(HOSTNAMES).map_err(map_err!(Table))?;
                if hosts
                    .get(next.hostname.as_str())
                    .map_err(map_err!(Read))?
                    .is_some()
                {
                    return Err(StateError::HostnameTaken(next.hostname.clone()).into());
                }
                hosts
                    .remove(current.hostname.as_str())
                    .map_err(map_err!(Write))?;
                hosts
                    .insert(next.hostname.as_str(), key.as_str())
                    .map_err(map_err!(Write))?;
            }

            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            members
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            next
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %updated.status, "member updated");
        Ok(updated)
    }

    /// Physically delete a member. Returns true if it existed.
    ///
    /// The member's log rows survive with their member reference cleared.
    pub fn delete_member(&self, id: &MemberId) -> StateResult<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut members = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let removed: Option<SwarmMember> =
                match members.remove(key.as_str()).map_err(map_err!(Write))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            existed = removed.is_some();

            if let Some(member) = removed {
                let mut hosts = txn.open_table(HOSTNAMES).map_err(map_err!(Table))?;
                hosts
                    .remove(member.hostname.as_str())
                    .map_err(map_err!(Write))?;

                let mut logs = txn.open_table(MEMBER_LOGS).map_err(map_err!(Table))?;
                let mut orphaned = Vec::new();
                for entry in logs.iter().map_err(map_err!(Read))? {
                    let (k, value) = entry.map_err(map_err!(Read))?;
                    let log: SwarmMemberLog =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    if log.member_id == Some(*id) {
                        orphaned.push((k.value().to_string(), log));
                    }
                }
                for (k, mut log) in orphaned {
                    log.member_id = None;
                    let value = serde_json::to_vec(&log).map_err(map_err!(Serialize))?;
                    logs.insert(k.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "member deleted");
        Ok(existed)
    }

    /// Name of the member's swarm, or `"none"` when it has no live swarm.
    pub fn swarm_name_of(&self, member: &SwarmMember) -> StateResult<String> {
        match member.swarm_id {
            Some(swarm_id) => Ok(self
                .get_swarm(&swarm_id)?
                .map(|s| s.name)
                .unwrap_or_else(|| NO_SWARM.to_string())),
            None => Ok(NO_SWARM.to_string()),
        }
    }

    // ── Member logs ────────────────────────────────────────────────

    /// Append an audit log entry and return it with its sequence number.
    ///
    /// The sequence is bumped in the same write transaction as the insert,
    /// so key order is append order even within one millisecond. Entries
    /// that already carry a sequence were stored before and are refused.
    pub fn append_log(&self, log: &SwarmMemberLog) -> StateResult<SwarmMemberLog> {
        if log.seq != 0 {
            return Err(StateError::Write(format!(
                "log entry {} already stored at seq {}",
                log.id, log.seq
            )));
        }
        let mut stored = log.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let last = counters
                .get(LOG_SEQ)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            stored.seq = last + 1;
            counters
                .insert(LOG_SEQ, stored.seq)
                .map_err(map_err!(Write))?;

            let key = stored.table_key();
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(MEMBER_LOGS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Write(format!("log entry {key} already exists")));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(stored)
    }

    /// List a member's log entries in append order.
    pub fn list_logs_for_member(&self, member_id: &MemberId) -> StateResult<Vec<SwarmMemberLog>> {
        self.scan_logs(usize::MAX, |log| log.member_id == Some(*member_id))
    }

    /// List up to `limit` log entries across all members, oldest first.
    pub fn list_logs(&self, limit: usize) -> StateResult<Vec<SwarmMemberLog>> {
        self.scan_logs(limit, |_| true)
    }

    fn scan_logs<F>(&self, limit: usize, keep: F) -> StateResult<Vec<SwarmMemberLog>>
    where
        F: Fn(&SwarmMemberLog) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MEMBER_LOGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let log: SwarmMemberLog =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&log) {
                results.push(log);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}
