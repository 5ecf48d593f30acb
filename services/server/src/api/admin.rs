//! Admin endpoints: access keys and the node registry.
//!
//! All routes require the admin Basic-Auth credential.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dockward_id::{KeyId, NodeId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::{ApiError, FieldError};
use crate::api::extract::AdminAuth;
use crate::db::{NewNode, NodeUpdate};
use crate::state::AppState;

const MAX_LABEL_LEN: usize = 200;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{key_id}", get(get_key).delete(revoke_key))
        .route("/nodes", get(list_nodes).post(create_node))
        .route(
            "/nodes/{node_id}",
            get(get_node).patch(update_node).delete(delete_node),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeKeyResponse {
    pub id: KeyId,
    /// False when the key was already revoked.
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteNodeResponse {
    pub id: NodeId,
    pub deleted: bool,
}

fn parse_key_id(raw: &str, request_id: &str) -> Result<KeyId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_key_id", "Invalid key ID format")
            .with_request_id(request_id.to_string())
    })
}

fn parse_node_id(raw: &str, request_id: &str) -> Result<NodeId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_node_id", "Invalid node ID format")
            .with_request_id(request_id.to_string())
    })
}

/// GET /admin/keys
async fn list_keys(
    State(state): State<AppState>,
    auth: AdminAuth,
) -> Result<impl IntoResponse, ApiError> {
    let keys = state
        .db()
        .keys()
        .list()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(keys))
}

/// POST /admin/keys
///
/// The response is the only place the plaintext token ever appears.
async fn create_key(
    State(state): State<AppState>,
    auth: AdminAuth,
    Json(req): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.label.chars().count() > MAX_LABEL_LEN {
        return Err(ApiError::bad_request("invalid_label", "Label is too long")
            .with_request_id(auth.request_id));
    }

    let issued = state
        .db()
        .keys()
        .create(&req.label)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    info!(key_id = %issued.key.id, request_id = %auth.request_id, "Access key issued");
    Ok((StatusCode::CREATED, Json(issued)))
}

/// GET /admin/keys/{key_id}
async fn get_key(
    State(state): State<AppState>,
    auth: AdminAuth,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key_id = parse_key_id(&key_id, &auth.request_id)?;
    let key = state
        .db()
        .keys()
        .get(&key_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found("key_not_found", format!("Key {key_id} not found"))
                .with_request_id(auth.request_id.clone())
        })?;
    Ok(Json(key))
}

/// DELETE /admin/keys/{key_id}
///
/// Revokes the key. The row stays for auditing; repeating the call is
/// harmless.
async fn revoke_key(
    State(state): State<AppState>,
    auth: AdminAuth,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key_id = parse_key_id(&key_id, &auth.request_id)?;
    let keys = state.db().keys();

    let revoked = keys
        .revoke(&key_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    if !revoked {
        let exists = keys
            .get(&key_id)
            .await
            .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?
            .is_some();
        if !exists {
            return Err(
                ApiError::not_found("key_not_found", format!("Key {key_id} not found"))
                    .with_request_id(auth.request_id),
            );
        }
    } else {
        info!(key_id = %key_id, request_id = %auth.request_id, "Access key revoked");
    }

    Ok(Json(RevokeKeyResponse {
        id: key_id,
        revoked,
    }))
}

/// GET /admin/nodes
async fn list_nodes(
    State(state): State<AppState>,
    auth: AdminAuth,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state
        .db()
        .nodes()
        .list()
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok(Json(nodes))
}

fn validate_node_fields(name: Option<&str>, address: Option<&str>) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if name.is_some_and(|n| n.trim().is_empty()) {
        errors.push(FieldError {
            field: "name".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if address.is_some_and(|a| a.trim().is_empty()) {
        errors.push(FieldError {
            field: "address".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    errors
}

/// POST /admin/nodes
async fn create_node(
    State(state): State<AppState>,
    auth: AdminAuth,
    Json(req): Json<NewNode>,
) -> Result<impl IntoResponse, ApiError> {
    let errors = validate_node_fields(Some(&req.name), Some(&req.address));
    if !errors.is_empty() {
        return Err(ApiError::bad_request("invalid_node", "Invalid node fields")
            .with_details(errors)
            .with_request_id(auth.request_id));
    }

    let node = state
        .db()
        .nodes()
        .create(req)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// GET /admin/nodes/{node_id}
async fn get_node(
    State(state): State<AppState>,
    auth: AdminAuth,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id = parse_node_id(&node_id, &auth.request_id)?;
    let node = state
        .db()
        .nodes()
        .get(&node_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found("node_not_found", format!("Node {node_id} not found"))
                .with_request_id(auth.request_id.clone())
        })?;
    Ok(Json(node))
}

/// PATCH /admin/nodes/{node_id}
async fn update_node(
    State(state): State<AppState>,
    auth: AdminAuth,
    Path(node_id): Path<String>,
    Json(req): Json<NodeUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id = parse_node_id(&node_id, &auth.request_id)?;

    if req.is_empty() {
        return Err(
            ApiError::bad_request("empty_update", "At least one field must be set")
                .with_request_id(auth.request_id),
        );
    }
    let errors = validate_node_fields(req.name.as_deref(), req.address.as_deref());
    if !errors.is_empty() {
        return Err(ApiError::bad_request("invalid_node", "Invalid node fields")
            .with_details(errors)
            .with_request_id(auth.request_id));
    }

    let node = state
        .db()
        .nodes()
        .update(&node_id, req)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found("node_not_found", format!("Node {node_id} not found"))
                .with_request_id(auth.request_id.clone())
        })?;
    Ok(Json(node))
}

/// DELETE /admin/nodes/{node_id}
async fn delete_node(
    State(state): State<AppState>,
    auth: AdminAuth,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node_id = parse_node_id(&node_id, &auth.request_id)?;
    let deleted = state
        .db()
        .nodes()
        .delete(&node_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(auth.request_id.clone()))?;

    if !deleted {
        return Err(
            ApiError::not_found("node_not_found", format!("Node {node_id} not found"))
                .with_request_id(auth.request_id),
        );
    }
    Ok(Json(DeleteNodeResponse {
        id: node_id,
        deleted,
    }))
}
