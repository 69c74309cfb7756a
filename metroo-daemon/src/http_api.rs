//! Loopback control-plane HTTP API. Local state is served directly; agent
//! endpoints for other ids become CONTROL_REQs over the mesh.

use crate::control::{self, ControlOp};
use crate::supervisor::Supervisor;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metroo_core::{AgentId, Error};
use std::sync::Arc;
use tracing::info;

pub fn router(sup: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        .route("/ready", get(ready))
        .route("/agents", get(agents))
        .route("/agents/:id", get(agent_detail))
        .route("/agents/:id/routes", get(agent_routes))
        .route("/agents/:id/peers", get(agent_peers))
        .route("/routes/advertise", post(advertise))
        .with_state(sup)
}

/// Bind and serve until the supervisor shuts down.
pub async fn serve(sup: Arc<Supervisor>) -> metroo_core::Result<()> {
    let address = sup.config().api.address;
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(%address, "control API listening");
    let shutdown = {
        let sup = sup.clone();
        async move { sup.cancelled().await }
    };
    axum::serve(listener, router(sup))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::transport(format!("http api: {e}")))
}

async fn health() -> &'static str {
    "OK\n"
}

async fn healthz(State(sup): State<Arc<Supervisor>>) -> Response {
    let status = sup.status();
    let code = if status.running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn ready(State(sup): State<Arc<Supervisor>>) -> Response {
    if sup.is_running() {
        (StatusCode::OK, "READY\n").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY\n").into_response()
    }
}

async fn agents(State(sup): State<Arc<Supervisor>>) -> Response {
    if sup.control().sealing() && !sup.topology_visible() {
        // Without the private half of the management key, only local info.
        let local = sup.agents_snapshot();
        let own: Vec<_> = local
            .into_iter()
            .filter(|a| a["local"].as_bool().unwrap_or(false))
            .collect();
        return Json(own).into_response();
    }
    Json(sup.agents_snapshot()).into_response()
}

fn parse_id(raw: &str) -> Result<AgentId, Response> {
    raw.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "bad agent id" })),
        )
            .into_response()
    })
}

fn map_error(e: Error) -> Response {
    let code = match &e {
        Error::NoRoute(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Crypto(_) => StatusCode::FORBIDDEN,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (code, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn remote_op(sup: &Arc<Supervisor>, id: AgentId, op: ControlOp) -> Response {
    match control::request(sup, id, op).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => map_error(e),
    }
}

async fn agent_detail(
    State(sup): State<Arc<Supervisor>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rsp) => return rsp,
    };
    if id == sup.agent_id() {
        return Json(serde_json::json!({
            "status": sup.status(),
            "node_info": sup.build_node_info(),
        }))
        .into_response();
    }
    // A cached flooded blob answers without a round trip when we have it.
    if let Some(info) = sup.cached_node_info(id) {
        return Json(serde_json::json!({ "node_info": info })).into_response();
    }
    remote_op(&sup, id, ControlOp::NodeInfo).await
}

async fn agent_routes(
    State(sup): State<Arc<Supervisor>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rsp) => return rsp,
    };
    remote_op(&sup, id, ControlOp::Routes).await
}

async fn agent_peers(
    State(sup): State<Arc<Supervisor>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(rsp) => return rsp,
    };
    remote_op(&sup, id, ControlOp::Peers).await
}

async fn advertise(State(sup): State<Arc<Supervisor>>) -> Response {
    let reached = sup.advertise_now().await;
    Json(serde_json::json!({ "advertised_to": reached })).into_response()
}
