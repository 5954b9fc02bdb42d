//! Lifecycle error taxonomy.

use fleetgrid_cloud::CloudError;
use fleetgrid_state::StateError;
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The operation is not legal in the member's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The provider could not be reached or timed out.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The provider rejected the image, flavor, or quota.
    #[error("provisioning rejected: {0}")]
    ProvisioningRejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Clone generation ran out of hostname suffix attempts.
    #[error("hostname collision: {0}")]
    HostnameCollision(String),

    /// A status override would violate the status/IP invariant.
    #[error("inconsistent member: {0}")]
    Inconsistent(String),

    #[error(transparent)]
    State(StateError),
}

impl From<StateError> for LifecycleError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => LifecycleError::NotFound(what),
            StateError::Inconsistent(why) => LifecycleError::Inconsistent(why),
            other => LifecycleError::State(other),
        }
    }
}

impl From<CloudError> for LifecycleError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::Unavailable(m) => LifecycleError::BackendUnavailable(m),
            CloudError::Rejected(m) => LifecycleError::ProvisioningRejected(m),
            CloudError::NotFound(m) => LifecycleError::NotFound(m),
            CloudError::InvalidState(m) => LifecycleError::InvalidState(m),
            CloudError::NotImplemented(m) => LifecycleError::NotImplemented(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_errors_map_onto_taxonomy() {
        assert!(matches!(
            LifecycleError::from(CloudError::Unavailable("x".into())),
            LifecycleError::BackendUnavailable(_)
        ));
        assert!(matches!(
            LifecycleError::from(CloudError::Rejected("x".into())),
            LifecycleError::ProvisioningRejected(_)
        ));
        assert!(matches!(
            LifecycleError::from(CloudError::NotImplemented("x".into())),
            LifecycleError::NotImplemented(_)
        ));
    }

    #[test]
    fn store_not_found_stays_not_found() {
        assert!(matches!(
            LifecycleError::from(StateError::NotFound("member 1".into())),
            LifecycleError::NotFound(_)
        ));
        assert!(matches!(
            LifecycleError::from(StateError::HostnameTaken("web-1".into())),
            LifecycleError::State(StateError::HostnameTaken(_))
        ));
    }
}
