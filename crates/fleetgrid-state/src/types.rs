//! Domain types for the FleetGrid state store.
//!
//! These types represent the persisted state of swarms, swarm members,
//! and the member audit trail. All types are serializable to/from JSON
//! for storage in redb tables.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Swarm name reported for members without a (live) swarm reference.
pub const NO_SWARM: &str = "none";

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a [`Swarm`].
    SwarmId
);
uuid_id!(
    /// Unique identifier for a [`SwarmMember`].
    MemberId
);
uuid_id!(
    /// Unique identifier for a [`SwarmMemberLog`] row.
    LogId
);

// ── Swarm ──────────────────────────────────────────────────────────

/// A named grouping of fleet members.
///
/// Membership is not embedded: members point at their swarm through
/// [`SwarmMember::swarm_id`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Swarm {
    pub id: SwarmId,
    /// Human label, not unique.
    pub name: String,
    /// Unix timestamp (seconds) when the swarm was created.
    pub created_at: u64,
}

impl Swarm {
    pub fn new(name: &str) -> Self {
        Self {
            id: SwarmId::new(),
            name: name.to_string(),
            created_at: epoch_secs(),
        }
    }
}

// ── Swarm member ───────────────────────────────────────────────────

/// Cloud provider a member is provisioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    /// MOC Kaizen (OpenStack).
    MocKaizen,
    /// MOC Engage1 (OpenStack).
    MocEngage1,
    /// IBM BlueMix.
    IbmBluemix,
    /// Google Compute Engine.
    GoogleCompute,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 4] = [
        CloudProvider::MocKaizen,
        CloudProvider::MocEngage1,
        CloudProvider::IbmBluemix,
        CloudProvider::GoogleCompute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::MocKaizen => "moc_kaizen",
            CloudProvider::MocEngage1 => "moc_engage1",
            CloudProvider::IbmBluemix => "ibm_bluemix",
            CloudProvider::GoogleCompute => "google_compute",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a swarm member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    PendingCreation,
    Creating,
    /// Only reached after the instance checks in.
    Running,
    Terminated,
    Error,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::PendingCreation => "pending_creation",
            MemberStatus::Creating => "creating",
            MemberStatus::Running => "running",
            MemberStatus::Terminated => "terminated",
            MemberStatus::Error => "error",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boot disk type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiskType {
    #[default]
    SolidState,
    Traditional,
}

fn default_disk_size() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// One managed compute instance, real or pending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmMember {
    pub id: MemberId,
    pub cloud: CloudProvider,
    /// Provider-assigned instance id; empty until created.
    #[serde(default)]
    pub cloud_id: String,
    pub status: MemberStatus,
    /// Globally unique among members.
    pub hostname: String,
    /// Set only while `Running`.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    pub image: String,
    pub flavor: String,
    #[serde(default = "default_disk_size")]
    pub disk_size_gb: u32,
    #[serde(default)]
    pub disk_type: DiskType,
    /// Release the boot volume when the instance is terminated.
    #[serde(default = "default_true")]
    pub delete_boot_volume: bool,
    /// Cloud-init user data with `%HOSTNAME%` / `%URL%` placeholders.
    #[serde(default)]
    pub configuration: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub swarm_id: Option<SwarmId>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SwarmMember {
    /// Build a fresh `PendingCreation` member with default disk settings.
    pub fn new(cloud: CloudProvider, hostname: &str, image: &str, flavor: &str) -> Self {
        let now = epoch_secs();
        Self {
            id: MemberId::new(),
            cloud,
            cloud_id: String::new(),
            status: MemberStatus::PendingCreation,
            hostname: hostname.to_string(),
            ip: None,
            image: image.to_string(),
            flavor: flavor.to_string(),
            disk_size_gb: default_disk_size(),
            disk_type: DiskType::default(),
            delete_boot_volume: true,
            configuration: String::new(),
            comment: String::new(),
            swarm_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the status/IP invariant: an IP is present iff the member is running.
    pub fn check_consistency(&self) -> Result<(), String> {
        if self.hostname.trim().is_empty() {
            return Err("hostname must not be empty".to_string());
        }
        match (self.status, self.ip) {
            (MemberStatus::Running, None) => {
                Err(format!("member {} is running without an IP address", self.hostname))
            }
            (MemberStatus::Running, Some(_)) => Ok(()),
            (status, Some(ip)) => Err(format!(
                "member {} has IP {ip} while {status}",
                self.hostname
            )),
            (_, None) => Ok(()),
        }
    }
}

// ── Audit log ──────────────────────────────────────────────────────

/// Category of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Installation,
    Notification,
    Error,
    Other,
}

/// Append-only audit entry for a swarm member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmMemberLog {
    pub id: LogId,
    /// Store-assigned append position; zero until the entry is written.
    #[serde(default)]
    pub seq: u64,
    /// Cleared when the member is deleted; the row itself survives.
    pub member_id: Option<MemberId>,
    pub category: LogCategory,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub message: String,
    /// Reference to an artifact the member produced (opaque external record).
    #[serde(default)]
    pub artifact: Option<String>,
}

impl SwarmMemberLog {
    pub fn new(member_id: MemberId, category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            id: LogId::new(),
            seq: 0,
            member_id: Some(member_id),
            category,
            timestamp_ms: epoch_millis(),
            message: message.into(),
            artifact: None,
        }
    }

    /// Build the key for the member log table.
    ///
    /// Zero-padded sequence so a key scan yields append order.
    pub fn table_key(&self) -> String {
        format!("{:020}", self.seq)
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
