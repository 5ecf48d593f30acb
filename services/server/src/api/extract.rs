//! Request-scoped context and credential extractors.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dockward_id::{KeyId, RequestId};
use tracing::error;

use crate::api::error::ApiError;
use crate::auth::{AuthError, AuthOutcome, Credential, Principal};
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY: &str = "api_key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn request_id(parts: &Parts) -> String {
    header_string(&parts.headers, REQUEST_ID_HEADER)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .unwrap_or_else(|| RequestId::new().to_string())
}

/// A request carrying a valid access key.
///
/// The key comes from the `X-API-Key` header, or from the `api_key` query
/// parameter for clients that cannot set headers (browser WebSockets).
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    pub key_id: KeyId,
    pub request_id: String,
}

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = request_id(parts);

        let token = header_string(&parts.headers, API_KEY_HEADER)
            .or_else(|| {
                Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
                    .ok()
                    .and_then(|Query(mut q)| q.remove(API_KEY_QUERY))
            })
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        match authenticate(state, Credential::ApiKey(token), &request_id).await? {
            Principal::Key(key_id) => Ok(Self { key_id, request_id }),
            Principal::Admin => {
                Err(ApiError::from(AuthError::InvalidKey).with_request_id(request_id))
            }
        }
    }
}

/// A request carrying the admin Basic-Auth credential.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub request_id: String,
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = request_id(parts);

        let Some(header) = header_string(&parts.headers, AUTHORIZATION.as_str()) else {
            return Err(ApiError::from(AuthError::MissingCredentials)
                .with_basic_challenge()
                .with_request_id(request_id));
        };

        let Some((username, password)) = parse_basic(&header) else {
            return Err(ApiError::from(AuthError::InvalidAdmin).with_request_id(request_id));
        };

        let credential = Credential::Basic { username, password };
        match authenticate(state, credential, &request_id).await? {
            Principal::Admin => Ok(Self { request_id }),
            Principal::Key(_) => {
                Err(ApiError::from(AuthError::InvalidAdmin).with_request_id(request_id))
            }
        }
    }
}

async fn authenticate(
    state: &AppState,
    credential: Credential,
    request_id: &str,
) -> Result<Principal, ApiError> {
    match state.gate().authenticate(credential).await {
        Ok(AuthOutcome::Authorized(principal)) => Ok(principal),
        Ok(AuthOutcome::Rejected(reason)) => {
            Err(ApiError::from(reason).with_request_id(request_id))
        }
        Err(e) => {
            error!(error = %e, request_id = %request_id, "Credential check failed");
            Err(ApiError::internal("storage_error", "Failed to check credentials")
                .with_request_id(request_id))
        }
    }
}

/// Decode `Basic <base64(user:pass)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
