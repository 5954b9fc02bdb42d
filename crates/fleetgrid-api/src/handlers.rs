//! REST API handlers.
//!
//! Reads go straight to the `StateStore`; anything that changes a member's
//! status goes through the `MemberController` or `SwarmCoordinator`.

use std::net::IpAddr;
use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use fleetgrid_lifecycle::LifecycleError;
use fleetgrid_state::*;

use crate::ApiState;

/// Upper bound on members generated per request.
const MAX_GENERATE: usize = 500;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn state_status(e: &StateError) -> StatusCode {
    match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::HostnameTaken(_) | StateError::Inconsistent(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn state_error(e: StateError) -> Response {
    error_response(&e.to_string(), state_status(&e))
}

fn lifecycle_error(e: LifecycleError) -> Response {
    let status = match &e {
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidState(_)
        | LifecycleError::HostnameCollision(_)
        | LifecycleError::Inconsistent(_) => StatusCode::CONFLICT,
        LifecycleError::ProvisioningRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        LifecycleError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        LifecycleError::State(inner) => state_status(inner),
    };
    error_response(&e.to_string(), status)
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, Response> {
    raw.parse()
        .map_err(|_| error_response(&format!("invalid {what} id '{raw}'"), StatusCode::BAD_REQUEST))
}

fn parse_ip(raw: &str) -> Result<IpAddr, Response> {
    raw.trim()
        .parse()
        .map_err(|_| error_response(&format!("invalid ip address '{raw}'"), StatusCode::BAD_REQUEST))
}

// ── Check-in ───────────────────────────────────────────────────

/// Check-in body posted by a booted instance.
#[derive(Deserialize)]
pub struct CheckInRequest {
    pub member_id: String,
    pub ip: String,
}

/// Check-in body posted to the member's own callback URL.
#[derive(Deserialize)]
pub struct MemberCheckInRequest {
    pub ip: String,
}

async fn do_check_in(state: &ApiState, raw_id: &str, raw_ip: &str) -> Response {
    let id: MemberId = match parse_id(raw_id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let ip = match parse_ip(raw_ip) {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };
    // Instances read `queues` at the top level, so success is not enveloped.
    match state.controller.check_in(&id, ip).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            warn!(member = %id, %ip, error = %e, "check-in refused");
            lifecycle_error(e)
        }
    }
}

/// POST /api/v1/checkin
pub async fn check_in(
    State(state): State<ApiState>,
    Json(req): Json<CheckInRequest>,
) -> impl IntoResponse {
    do_check_in(&state, &req.member_id, &req.ip).await
}

/// POST /api/v1/members/:id/checkin
pub async fn member_check_in(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<MemberCheckInRequest>,
) -> impl IntoResponse {
    do_check_in(&state, &id, &req.ip).await
}

// ── Swarms ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSwarmRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub template_id: String,
    pub quantity: usize,
}

/// GET /api/v1/swarms
pub async fn list_swarms(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_swarms() {
        Ok(swarms) => ApiResponse::ok(swarms).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/swarms
pub async fn create_swarm(
    State(state): State<ApiState>,
    Json(req): Json<CreateSwarmRequest>,
) -> impl IntoResponse {
    let name = req.name.trim();
    if name.is_empty() {
        return error_response("swarm name must not be empty", StatusCode::BAD_REQUEST);
    }
    let swarm = Swarm::new(name);
    match state.store.put_swarm(&swarm) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(swarm)).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/swarms/:id
pub async fn get_swarm(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.coordinator.summary(&id) {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// DELETE /api/v1/swarms/:id
pub async fn delete_swarm(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.store.delete_swarm(&id) {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("swarm not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/swarms/:id/members
pub async fn list_swarm_members(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.store.get_swarm(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("swarm not found", StatusCode::NOT_FOUND),
        Err(e) => return state_error(e),
    }
    match state.store.list_members_for_swarm(&id) {
        Ok(members) => ApiResponse::ok(members).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/swarms/:id/generate
pub async fn generate_members(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    let swarm_id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let template_id: MemberId = match parse_id(&req.template_id, "template") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if req.quantity == 0 || req.quantity > MAX_GENERATE {
        return error_response(
            &format!("quantity must be between 1 and {MAX_GENERATE}"),
            StatusCode::BAD_REQUEST,
        );
    }
    match state
        .coordinator
        .generate_members(&swarm_id, req.quantity, &template_id)
    {
        Ok(members) => (StatusCode::CREATED, ApiResponse::ok(members)).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/swarms/:id/create-pending
pub async fn create_pending(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.coordinator.create_pending(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/swarms/:id/terminate-running
pub async fn terminate_running(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.coordinator.terminate_running(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/swarms/:id/terminate-all
pub async fn terminate_all(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: SwarmId = match parse_id(&id, "swarm") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.coordinator.terminate_all(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Members ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MemberFilter {
    pub status: Option<MemberStatus>,
}

/// Registration body for a new pending member.
#[derive(Deserialize)]
pub struct CreateMemberRequest {
    pub cloud: CloudProvider,
    pub hostname: String,
    pub image: String,
    pub flavor: String,
    pub disk_size_gb: Option<u32>,
    pub disk_type: Option<DiskType>,
    pub delete_boot_volume: Option<bool>,
    #[serde(default)]
    pub configuration: String,
    #[serde(default)]
    pub comment: String,
    pub swarm_id: Option<SwarmId>,
}

#[derive(Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct StatusOverride {
    pub status: MemberStatus,
    pub ip: Option<String>,
}

#[derive(Deserialize)]
pub struct ReportRequest {
    pub category: LogCategory,
    pub message: String,
    pub artifact: Option<String>,
}

/// GET /api/v1/members
pub async fn list_members(
    State(state): State<ApiState>,
    Query(filter): Query<MemberFilter>,
) -> impl IntoResponse {
    match state.store.list_members() {
        Ok(members) => {
            let members: Vec<SwarmMember> = members
                .into_iter()
                .filter(|m| filter.status.is_none_or(|s| m.status == s))
                .collect();
            ApiResponse::ok(members).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/members
pub async fn create_member(
    State(state): State<ApiState>,
    Json(req): Json<CreateMemberRequest>,
) -> impl IntoResponse {
    let hostname = req.hostname.trim();
    if hostname.is_empty() {
        return error_response("hostname must not be empty", StatusCode::BAD_REQUEST);
    }
    if let Some(swarm_id) = &req.swarm_id {
        match state.store.get_swarm(swarm_id) {
            Ok(Some(_)) => {}
            Ok(None) => return error_response("swarm not found", StatusCode::NOT_FOUND),
            Err(e) => return state_error(e),
        }
    }

    let mut member = SwarmMember::new(req.cloud, hostname, &req.image, &req.flavor);
    if let Some(size) = req.disk_size_gb {
        member.disk_size_gb = size;
    }
    if let Some(disk_type) = req.disk_type {
        member.disk_type = disk_type;
    }
    if let Some(delete) = req.delete_boot_volume {
        member.delete_boot_volume = delete;
    }
    member.configuration = req.configuration;
    member.comment = req.comment;
    member.swarm_id = req.swarm_id;

    match state.store.insert_member(&member) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(member)).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/members/:id
pub async fn get_member(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    let id: MemberId = match parse_id(&id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.store.get_member(&id) {
        Ok(Some(member)) => ApiResponse::ok(member).into_response(),
        Ok(None) => error_response("member not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/members/:id
pub async fn delete_member(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> impl IntoResponse {
    let id: MemberId = match parse_id(&id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.controller.delete(&id, params.force).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// Controller operations addressed by member id.
#[derive(Clone, Copy)]
enum MemberOp {
    Create,
    Terminate,
    Reboot,
    Rebuild,
}

async fn run_member_op(state: &ApiState, raw_id: &str, op: MemberOp) -> Response {
    let id: MemberId = match parse_id(raw_id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let controller = &state.controller;
    let result = match op {
        MemberOp::Create => controller.create(&id).await,
        MemberOp::Terminate => controller.terminate(&id).await,
        MemberOp::Reboot => controller.reboot(&id).await,
        MemberOp::Rebuild => controller.rebuild(&id).await,
    };
    match result {
        Ok(member) => ApiResponse::ok(member).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/members/:id/create
pub async fn create_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    run_member_op(&state, &id, MemberOp::Create).await
}

/// POST /api/v1/members/:id/terminate
pub async fn terminate_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    run_member_op(&state, &id, MemberOp::Terminate).await
}

/// POST /api/v1/members/:id/reboot
pub async fn reboot_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    run_member_op(&state, &id, MemberOp::Reboot).await
}

/// POST /api/v1/members/:id/rebuild
pub async fn rebuild_instance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    run_member_op(&state, &id, MemberOp::Rebuild).await
}

/// PUT /api/v1/members/:id/status
pub async fn override_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<StatusOverride>,
) -> impl IntoResponse {
    let id: MemberId = match parse_id(&id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let ip = match req.ip.as_deref().map(parse_ip).transpose() {
        Ok(ip) => ip,
        Err(resp) => return resp,
    };
    match state.controller.override_status(&id, req.status, ip).await {
        Ok(member) => ApiResponse::ok(member).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Logs ───────────────────────────────────────────────────────

/// GET /api/v1/members/:id/logs
pub async fn list_member_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id: MemberId = match parse_id(&id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.controller.audit().trail(&id) {
        Ok(logs) => ApiResponse::ok(logs).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/members/:id/logs
pub async fn report_log(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ReportRequest>,
) -> impl IntoResponse {
    let id: MemberId = match parse_id(&id, "member") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.store.get_member(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("member not found", StatusCode::NOT_FOUND),
        Err(e) => return state_error(e),
    }
    match state
        .controller
        .audit()
        .report(&id, req.category, req.message, req.artifact)
    {
        Ok(entry) => (StatusCode::CREATED, ApiResponse::ok(entry)).into_response(),
        Err(e) => state_error(e),
    }
}
