//! fleetgrid-lifecycle — member state machine and swarm orchestration.
//!
//! # Architecture
//!
//! ```text
//! SwarmCoordinator ──fan-out──▶ MemberController ──▶ CloudBackend (per provider)
//!                                     │
//!                                     ├──▶ StateStore (atomic per-member update)
//!                                     └──▶ AuditLog
//! ```
//!
//! [`transition::next_status`] decides every status change. The controller
//! serializes operations per member with [`MemberLocks`] and bounds every
//! backend call with a timeout.

pub mod audit;
pub mod clone;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod locks;
pub mod queues;
pub mod transition;

#[cfg(test)]
pub(crate) mod test_support;

pub use audit::AuditLog;
pub use clone::{clone_from_template, random_suffix};
pub use controller::{CheckInResponse, LifecycleConfig, MemberController};
pub use coordinator::{
    BulkOperation, BulkReport, MemberFailure, MemberOutcome, SwarmCoordinator, SwarmSummary,
};
pub use error::{LifecycleError, LifecycleResult};
pub use locks::MemberLocks;
pub use queues::attached_queues;
pub use transition::{LifecycleEvent, Transition, next_status};
