use axum::{
    http::{
        header::{CONTENT_TYPE, WWW_AUTHENTICATE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::db::DbError;
use crate::runtime::{BrowseError, RuntimeError};

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://dockward.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            retryable: false,
            details: None,
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
    challenge: Option<HeaderValue>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            problem: Box::new(ProblemDetails::new(status, code, message)),
            challenge: None,
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new(StatusCode::BAD_GATEWAY, code, message);
        err.problem.retryable = true;
        err
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.problem.details = Some(details);
        self
    }

    /// Ask the client for Basic credentials.
    pub fn with_basic_challenge(mut self) -> Self {
        self.challenge = Some(HeaderValue::from_static("Basic realm=\"dockward\""));
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(challenge) = self.challenge {
            headers.insert(WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let api = ApiError::unauthorized(err.code(), err.to_string());
        match err {
            AuthError::InvalidAdmin => api.with_basic_challenge(),
            AuthError::InvalidKey | AuthError::MissingCredentials => api,
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(message) => ApiError::conflict("conflict", message),
            other => {
                error!(error = %other, "Storage failure");
                ApiError::internal("storage_error", "Storage is unavailable")
            }
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match &err {
            RuntimeError::Api { status: 404, message } => {
                ApiError::not_found("runtime_not_found", message.clone())
            }
            RuntimeError::Api { status: 409, message } => {
                ApiError::conflict("runtime_conflict", message.clone())
            }
            RuntimeError::Api {
                status: 400,
                message,
            } => ApiError::bad_request("runtime_bad_request", message.clone()),
            RuntimeError::Api { .. } | RuntimeError::Json(_) => {
                error!(error = %err, "Runtime request failed");
                ApiError::bad_gateway("runtime_error", err.to_string())
            }
            RuntimeError::Http(_) | RuntimeError::Request(_) => {
                error!(error = %err, "Runtime unreachable");
                ApiError::bad_gateway("runtime_unavailable", "Container runtime is unreachable")
            }
        }
    }
}

impl From<BrowseError> for ApiError {
    fn from(err: BrowseError) -> Self {
        let message = err.to_string();
        match err {
            BrowseError::NotAbsolute => ApiError::bad_request("invalid_path", message),
            BrowseError::Traversal => ApiError::forbidden("path_traversal", message),
            BrowseError::NotMounted => ApiError::not_found("path_not_mounted", message),
            BrowseError::NoMountpoint => ApiError::not_found("no_mountpoint", message),
            BrowseError::NotFound => ApiError::not_found("path_not_found", message),
            BrowseError::NotDirectory => ApiError::bad_request("not_a_directory", message),
            BrowseError::IsDirectory => ApiError::bad_request("is_a_directory", message),
            BrowseError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ApiError::forbidden("permission_denied", e.to_string())
            }
            BrowseError::Io(e) => {
                error!(error = %e, "Directory listing failed");
                ApiError::internal("io_error", "Failed to read directory")
            }
        }
    }
}
