//! redb table definitions for the FleetGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the hostname index which maps a hostname to a member id.

use redb::TableDefinition;

/// Swarms keyed by `{swarm_id}`.
pub const SWARMS: TableDefinition<&str, &[u8]> = TableDefinition::new("swarms");

/// Swarm members keyed by `{member_id}`.
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");

/// Hostname uniqueness index: `{hostname}` → `{member_id}`.
pub const HOSTNAMES: TableDefinition<&str, &str> = TableDefinition::new("member_hostnames");

/// Member audit log keyed by `{seq:020}`.
pub const MEMBER_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("member_logs");

/// Monotonic counters, e.g. the next member log sequence number.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter key for [`MEMBER_LOGS`] sequence numbers.
pub const LOG_SEQ: &str = "member_log_seq";
