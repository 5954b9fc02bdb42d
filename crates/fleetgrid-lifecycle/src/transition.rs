//! Member status transitions.
//!
//! [`next_status`] is the only place a member's next status is decided.
//! The controller asks it before every write and never assigns `status`
//! any other way.

use fleetgrid_state::MemberStatus;

use crate::error::{LifecycleError, LifecycleResult};

/// Something that happened to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Operator asked for the instance to be created.
    BeginCreate,
    /// The backend accepted the create request.
    ProvisionSucceeded,
    /// The booted instance called back.
    CheckIn,
    /// Operator asked for the instance to be terminated.
    Terminate,
    /// The backend confirmed the instance is gone.
    Terminated,
    /// Operator asked for a reboot.
    Reboot,
    /// A backend call failed or timed out.
    BackendFailed,
    /// Administrative override to an explicit status.
    AdminOverride(MemberStatus),
}

/// Outcome of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(MemberStatus),
    /// Legal, but the status does not change.
    NoOp,
}

pub fn next_status(current: MemberStatus, event: LifecycleEvent) -> LifecycleResult<Transition> {
    use LifecycleEvent as E;
    use MemberStatus as S;

    let transition = match (current, event) {
        (S::PendingCreation | S::Terminated, E::BeginCreate) => Transition::To(S::Creating),
        // Running is reached only through check-in.
        (S::Creating, E::ProvisionSucceeded) => Transition::NoOp,
        (S::Creating, E::CheckIn) => Transition::To(S::Running),

        // Nothing was ever created, or it is already gone.
        (S::PendingCreation | S::Terminated, E::Terminate) => Transition::NoOp,
        (S::Creating | S::Running | S::Error, E::Terminate) => Transition::To(S::Terminated),
        (S::Creating | S::Running | S::Error, E::Terminated) => Transition::To(S::Terminated),

        (S::Running, E::Reboot) => Transition::NoOp,

        (_, E::BackendFailed) => Transition::To(S::Error),
        (_, E::AdminOverride(target)) if target == current => Transition::NoOp,
        (_, E::AdminOverride(target)) => Transition::To(target),

        (status, event) => {
            return Err(LifecycleError::InvalidState(format!(
                "{event:?} is not allowed while {status}"
            )));
        }
    };
    Ok(transition)
}
