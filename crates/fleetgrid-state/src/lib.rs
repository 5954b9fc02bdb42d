//! fleetgrid-state — member record store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for swarms, swarm members, and the member audit log.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! A separate hostname index table enforces hostname uniqueness across
//! members. Log keys are prefixed with a zero-padded timestamp so table
//! order is chronological order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Every mutation runs inside a single
//! redb write transaction, which gives the lifecycle layer its atomic
//! single-record read-modify-write.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
