//! Operator endpoints.

use axum::{
    Json, Router,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use mesh_common::constants::ACCESS_ERRORS_CAP;
use mesh_common::constants::headers::X_MESH_PASSWORD;
use mesh_common::{AccessErrorEntry, ChainState, Cluster, ConnectionReport};

use crate::diagnostics::{Diagnostics, Entry};
use crate::envelope::Envelope;
use crate::output::StatusView;
use crate::state::AppState;

/// Admin routes, behind the operator password
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/clusters", get(list_clusters).post(add_cluster).delete(block_cluster))
        .route("/connect", post(connect))
        .route("/broadcast", post(broadcast))
        .route("/chain", get(get_chain).post(set_chain))
        .route("/access-errors", get(access_errors))
        .route_layer(axum::middleware::from_fn_with_state(state, require_operator))
}

async fn require_operator(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let allowed = state.is_operator(
        request
            .headers()
            .get(X_MESH_PASSWORD)
            .and_then(|v| v.to_str().ok()),
    );

    if allowed {
        next.run(request).await
    } else {
        tracing::warn!(uri = %request.uri(), "Admin request without valid password");
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Result of an operator action plus what happened along the way
#[derive(Serialize)]
struct ActionResponse<T: Serialize> {
    result: T,
    states: Vec<Entry>,
    errors: Vec<Entry>,
}

impl<T: Serialize> ActionResponse<T> {
    fn new(result: T, diag: &Diagnostics) -> Json<Self> {
        Json(Self {
            result,
            states: diag.states(),
            errors: diag.errors(),
        })
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    let diag = Diagnostics::new();
    Json(StatusView::collect(&state.mesh, &diag, state.config.debug_key).await)
}

#[derive(Serialize)]
struct ClustersResponse {
    clusters: Vec<Cluster>,
    blocked: Vec<String>,
}

async fn list_clusters(State(state): State<AppState>) -> Json<ActionResponse<ClustersResponse>> {
    let diag = Diagnostics::new();
    let registry = state.mesh.registry(&diag);
    let result = ClustersResponse {
        clusters: registry.get_all().await,
        blocked: registry.blocked().await,
    };
    ActionResponse::new(result, &diag)
}

#[derive(Deserialize)]
struct UrlParam {
    url: String,
}

async fn add_cluster(
    State(state): State<AppState>,
    Json(payload): Json<UrlParam>,
) -> Json<ActionResponse<bool>> {
    let diag = Diagnostics::new();
    let mut cluster = Cluster::new(payload.url);
    cluster.registrator = state.mesh.identity().url.clone();

    let added = state.mesh.registry(&diag).add(&cluster).await;
    ActionResponse::new(added, &diag)
}

async fn block_cluster(
    State(state): State<AppState>,
    Query(param): Query<UrlParam>,
) -> Json<ActionResponse<bool>> {
    let diag = Diagnostics::new();
    let blocked = state.mesh.registry(&diag).block(&Cluster::new(param.url)).await;
    ActionResponse::new(blocked, &diag)
}

/// Operator fields may hold nested objects; control fields are dropped
#[derive(Deserialize)]
struct ConnectRequest {
    url: String,
    #[serde(default)]
    fields: Envelope,
    #[serde(default)]
    chain_new: Option<u64>,
}

async fn connect(
    State(state): State<AppState>,
    Json(payload): Json<ConnectRequest>,
) -> Json<ActionResponse<ConnectionReport>> {
    let diag = Diagnostics::new();
    let mut envelope = payload.fields;
    envelope.retain_user_fields();
    let report = state
        .connector
        .connect(&state.mesh, &payload.url, &envelope, None, payload.chain_new, &diag)
        .await;
    ActionResponse::new(report, &diag)
}

#[derive(Deserialize)]
struct BroadcastRequest {
    #[serde(default)]
    fields: Envelope,
    #[serde(default)]
    chain_new: Option<u64>,
}

async fn broadcast(
    State(state): State<AppState>,
    Json(payload): Json<BroadcastRequest>,
) -> Json<ActionResponse<Vec<ConnectionReport>>> {
    let diag = Diagnostics::new();
    let mut envelope = payload.fields;
    envelope.retain_user_fields();
    let reports = state
        .connector
        .broadcast(&state.mesh, &envelope, None, payload.chain_new, &diag)
        .await;
    ActionResponse::new(reports, &diag)
}

async fn get_chain(State(state): State<AppState>) -> Json<ChainState> {
    let diag = Diagnostics::new();
    Json(state.mesh.chain_counter(&diag).load().await)
}

#[derive(Deserialize)]
struct SetChain {
    chain: u64,
}

async fn set_chain(
    State(state): State<AppState>,
    Json(payload): Json<SetChain>,
) -> Result<Json<ChainState>, StatusCode> {
    let diag = Diagnostics::new();
    state
        .mesh
        .chain_counter(&diag)
        .set(payload.chain, chrono::Utc::now().timestamp())
        .await
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

#[derive(Deserialize)]
struct LimitParam {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn access_errors(
    State(state): State<AppState>,
    Query(param): Query<LimitParam>,
) -> Result<Json<Vec<AccessErrorEntry>>, StatusCode> {
    let limit = param.limit.min(ACCESS_ERRORS_CAP as usize);
    state
        .mesh
        .backend()
        .access_errors(limit)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(error = %e, "Failed to read access errors");
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        })
}
