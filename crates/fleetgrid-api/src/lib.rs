//! fleetgrid-api — REST API for FleetGrid.
//!
//! Provides axum route handlers for swarms, swarm members, the member
//! audit trail, and the instance check-in callback.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/checkin` | Instance check-in `{member_id, ip}` |
//! | POST | `/api/v1/members/{id}/checkin` | Instance check-in `{ip}` (the `%URL%` target) |
//! | GET | `/api/v1/swarms` | List swarms |
//! | POST | `/api/v1/swarms` | Create a swarm |
//! | GET | `/api/v1/swarms/{id}` | Swarm status summary |
//! | DELETE | `/api/v1/swarms/{id}` | Delete a swarm (members are detached) |
//! | GET | `/api/v1/swarms/{id}/members` | Members of a swarm |
//! | POST | `/api/v1/swarms/{id}/generate` | Clone members from a template |
//! | POST | `/api/v1/swarms/{id}/create-pending` | Create all pending members |
//! | POST | `/api/v1/swarms/{id}/terminate-running` | Terminate all running members |
//! | POST | `/api/v1/swarms/{id}/terminate-all` | Terminate every live member |
//! | GET | `/api/v1/members` | List members |
//! | POST | `/api/v1/members` | Register a pending member |
//! | GET | `/api/v1/members/{id}` | Member details |
//! | DELETE | `/api/v1/members/{id}` | Delete a member (`?force=true` unless finished) |
//! | POST | `/api/v1/members/{id}/create` | Create the instance |
//! | POST | `/api/v1/members/{id}/terminate` | Terminate the instance |
//! | POST | `/api/v1/members/{id}/reboot` | Reboot the instance |
//! | POST | `/api/v1/members/{id}/rebuild` | Terminate then create |
//! | PUT | `/api/v1/members/{id}/status` | Administrative status override |
//! | GET | `/api/v1/members/{id}/logs` | Member audit trail |
//! | POST | `/api/v1/members/{id}/logs` | Instance-reported log entry |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};

use fleetgrid_cloud::BackendRegistry;
use fleetgrid_lifecycle::{LifecycleConfig, MemberController, SwarmCoordinator};
use fleetgrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub controller: Arc<MemberController>,
    pub coordinator: Arc<SwarmCoordinator>,
}

impl ApiState {
    pub fn new(store: StateStore, backends: BackendRegistry, config: LifecycleConfig) -> Self {
        let controller = Arc::new(MemberController::new(store.clone(), backends, config));
        let coordinator = Arc::new(SwarmCoordinator::new(Arc::clone(&controller)));
        Self {
            store,
            controller,
            coordinator,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/checkin", post(handlers::check_in))
        .route("/swarms", get(handlers::list_swarms).post(handlers::create_swarm))
        .route("/swarms/{id}", get(handlers::get_swarm).delete(handlers::delete_swarm))
        .route("/swarms/{id}/members", get(handlers::list_swarm_members))
        .route("/swarms/{id}/generate", post(handlers::generate_members))
        .route("/swarms/{id}/create-pending", post(handlers::create_pending))
        .route("/swarms/{id}/terminate-running", post(handlers::terminate_running))
        .route("/swarms/{id}/terminate-all", post(handlers::terminate_all))
        .route("/members", get(handlers::list_members).post(handlers::create_member))
        .route("/members/{id}", get(handlers::get_member).delete(handlers::delete_member))
        .route("/members/{id}/checkin", post(handlers::member_check_in))
        .route("/members/{id}/create", post(handlers::create_instance))
        .route("/members/{id}/terminate", post(handlers::terminate_instance))
        .route("/members/{id}/reboot", post(handlers::reboot_instance))
        .route("/members/{id}/rebuild", post(handlers::rebuild_instance))
        .route("/members/{id}/status", put(handlers::override_status))
        .route("/members/{id}/logs", get(handlers::list_member_logs).post(handlers::report_log))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
