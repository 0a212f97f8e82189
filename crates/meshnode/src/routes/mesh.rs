//! The mesh endpoint: peer payloads in, signed answers out.

use axum::{
    Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Query, Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE, request::Parts},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::net::SocketAddr;

use mesh_common::constants::headers::X_MESH_PASSWORD;

use crate::diagnostics::Diagnostics;
use crate::envelope::WireFields;
use crate::node::{Outcome, Relay};
use crate::output::StatusView;
use crate::secure::RequestMeta;
use crate::state::AppState;

/// Caller details for the access log
pub struct PeerMeta(pub RequestMeta);

impl<S: Send + Sync> FromRequestParts<S> for PeerMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let remote_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default();

        // No reverse lookup; `Host` names this node, not the caller
        Ok(Self(RequestMeta {
            remote_ip,
            remote_host: String::new(),
            request_uri: parts.uri.to_string(),
        }))
    }
}

/// GET /: fields in the query string
pub async fn mesh_get(
    State(state): State<AppState>,
    PeerMeta(meta): PeerMeta,
    headers: HeaderMap,
    Query(wire): Query<WireFields>,
) -> Response {
    respond(&state, wire, &meta, &headers).await
}

/// POST /: fields as a JSON object or a urlencoded form
pub async fn mesh_post(
    State(state): State<AppState>,
    PeerMeta(meta): PeerMeta,
    request: Request,
) -> Response {
    let headers = request.headers().clone();
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    let wire = if is_form {
        axum::Form::<WireFields>::from_request(request, &state)
            .await
            .map(|axum::Form(w)| w)
            .ok()
    } else {
        Json::<WireFields>::from_request(request, &state)
            .await
            .map(|Json(w)| w)
            .ok()
    };

    match wire {
        Some(wire) => respond(&state, wire, &meta, &headers).await,
        None => {
            tracing::debug!(remote_ip = %meta.remote_ip, "Unreadable mesh payload");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn respond(state: &AppState, wire: WireFields, meta: &RequestMeta, headers: &HeaderMap) -> Response {
    let diag = Diagnostics::new();

    match state.mesh.handle(&wire, meta, &diag).await {
        Outcome::Status => {
            let password = headers
                .get(X_MESH_PASSWORD)
                .and_then(|v| v.to_str().ok());
            if state.is_operator(password) {
                Json(StatusView::collect(&state.mesh, &diag, state.config.debug_key).await)
                    .into_response()
            } else {
                StatusCode::OK.into_response()
            }
        }
        Outcome::Rejected(e) => StatusCode::from_u16(e.status_code())
            .unwrap_or(StatusCode::BAD_REQUEST)
            .into_response(),
        Outcome::Accepted { response, relay } => {
            if let Some(relay) = relay {
                spawn_relay(state, relay);
            }
            Json(response).into_response()
        }
    }
}

/// Forward an accepted payload in the background
fn spawn_relay(state: &AppState, relay: Relay) {
    let mesh = state.mesh.clone();
    let connector = state.connector.clone();

    tokio::spawn(async move {
        let diag = Diagnostics::new();
        let reports = connector
            .broadcast(&mesh, &relay.fields, Some(&relay.chain), None, &diag)
            .await;
        let accepted = reports.iter().filter(|r| r.accepted).count();
        tracing::info!(peers = reports.len(), accepted = accepted, "Relay finished");
    });
}
