//! fleetgrid-cloud — provider backends behind one `CloudBackend` trait.
//!
//! - [`OpenStackBackend`] drives the two MOC OpenStack clouds.
//! - [`GceBackend`] drives Google Compute Engine.
//! - [`StubBackend`] answers for providers that are not wired up.
//!
//! [`BackendRegistry`] maps a member's provider tag to its backend.

pub mod backend;
pub mod config;
pub mod error;
pub mod gce;
pub mod openstack;
pub mod registry;
pub mod stub;

pub use backend::{CloudBackend, ProvisionRequest, render_boot_config};
pub use config::{CloudConfig, GceConfig, OpenStackConfig};
pub use error::{CloudError, CloudResult};
pub use gce::GceBackend;
pub use openstack::OpenStackBackend;
pub use registry::BackendRegistry;
pub use stub::StubBackend;
