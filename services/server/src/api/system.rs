//! Service status and version.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tracing::error;

use crate::api::error::ApiError;
use crate::api::extract::ApiKeyAuth;
use crate::hub::HubStats;
use crate::runtime::find_container_id;
use crate::state::AppState;
use crate::update::UpdateState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/system/status", get(status))
        .route("/system/version", get(version))
        .route("/system/self", get(self_container))
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub update: UpdateState,
    pub events: HubStats,
}

/// GET /system/status
async fn status(State(state): State<AppState>, _auth: ApiKeyAuth) -> impl IntoResponse {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        update: state.updates().snapshot(),
        events: state.hub().stats(),
    })
}

/// GET /system/version
///
/// Commit the working copy holds.
async fn version(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.working_copy().describe().await.map_err(|e| {
        error!(error = %e, request_id = %auth.request_id, "Failed to describe working copy");
        ApiError::internal("version_unavailable", "Failed to read revision")
            .with_request_id(auth.request_id.clone())
    })?;

    let info = info.ok_or_else(|| {
        ApiError::not_found("not_a_repository", "Working copy has no commits")
            .with_request_id(auth.request_id.clone())
    })?;
    Ok(Json(info))
}

/// GET /system/self
///
/// Inspect document of the container hosting this process. The id read at
/// startup may be a short id, so a miss falls back to a prefix search.
async fn self_container(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
) -> Result<impl IntoResponse, ApiError> {
    let self_id = state.self_id().ok_or_else(|| {
        ApiError::not_found("self_unknown", "Not running inside a container")
            .with_request_id(auth.request_id.clone())
    })?;

    let docker = state.docker();
    match docker.inspect_container(self_id).await {
        Ok(container) => return Ok(Json(container)),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(ApiError::from(e).with_request_id(auth.request_id.clone())),
    }

    let entries = docker
        .list_containers()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    let full_id = find_container_id(&entries, self_id).ok_or_else(|| {
        ApiError::not_found(
            "self_not_found",
            format!("Self container not found (id {self_id})"),
        )
        .with_request_id(auth.request_id.clone())
    })?;

    let container = docker
        .inspect_container(full_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(container))
}
