//! XRPC query handlers.

use crate::auth::{bearer_token, AuthError};
use crate::middleware::RequestId;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use skywell_index::IndexError;
use skywell_types::{ActorFilesOutput, Did, FileFromSlugOutput, ProfileView};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the XRPC handlers as `{error, message}` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 400 `InvalidRequest`: missing or malformed parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),
    /// 401 `AuthenticationRequired`: no usable service token.
    #[error("authentication required: {0}")]
    Unauthorized(String),
    /// 403: the token is valid but names another actor.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// 404: unknown actor or slug.
    #[error("not found: {0}")]
    NotFound(String),
    /// 500: store or upstream failure. The message carries no internals.
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl ApiError {
    /// Maps an index failure, logging server-side causes with the request id.
    pub fn from_index(err: IndexError, request_id: &RequestId) -> Self {
        match err {
            IndexError::Parse(_) | IndexError::Record(_) | IndexError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            IndexError::NotFound(_) => ApiError::NotFound(err.to_string()),
            IndexError::Upstream { ref did, .. } => {
                tracing::error!(request_id = %request_id, did = %did, error = %err, "upstream failure");
                ApiError::InternalServerError("identity resolution failed".to_string())
            }
            other => {
                tracing::error!(request_id = %request_id, error = %other, "request failed");
                ApiError::InternalServerError("internal error".to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, name, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "InvalidRequest", msg),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "AuthenticationRequired", msg)
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "Forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NotFound", msg),
            ApiError::InternalServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError", msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": name,
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Query string of `getActorProfile`.
#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    /// DID of the profile owner.
    pub actor: Option<String>,
}

/// Query string of `getFileFromSlug`.
#[derive(Debug, Deserialize)]
pub struct SlugQuery {
    /// Short key assigned at indexing time.
    pub slug: Option<String>,
}

/// Query string of `getActorFiles`.
#[derive(Debug, Deserialize)]
pub struct ActorFilesQuery {
    /// DID whose files are listed; must match the token issuer.
    pub actor: Option<String>,
    /// Exclusive `indexed_at` cursor from the previous page.
    pub cursor: Option<String>,
    /// Page size, 1..=100. Kept as a string so a bad value is a 400.
    pub limit: Option<String>,
}

fn require_actor(actor: Option<&str>) -> Result<Did, ApiError> {
    let raw = actor
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::BadRequest("actor parameter is required".to_string()))?;
    Did::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Handler for `GET /xrpc/dev.skywell.getActorProfile`.
pub async fn get_actor_profile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<ProfileView>, ApiError> {
    let did = require_actor(query.actor.as_deref())?;
    let view = state
        .views
        .profile_view(&did)
        .await
        .map_err(|e| ApiError::from_index(e, &request_id))?;
    Ok(Json(view))
}

/// Handler for `GET /xrpc/dev.skywell.getFileFromSlug`.
pub async fn get_file_from_slug_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<SlugQuery>,
) -> Result<Json<FileFromSlugOutput>, ApiError> {
    let slug = query
        .slug
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("slug parameter is required".to_string()))?;

    let output = state
        .views
        .file_from_slug(&slug)
        .await
        .map_err(|e| ApiError::from_index(e, &request_id))?;
    Ok(Json(output))
}

/// Handler for `GET /xrpc/dev.skywell.getActorFiles`.
///
/// The token issuer must be the actor being listed. Authentication and the
/// ownership check both happen before the store is touched.
pub async fn get_actor_files_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Query(query): Query<ActorFilesQuery>,
) -> Result<Json<ActorFilesOutput>, ApiError> {
    let token = bearer_token(&headers)?;
    let issuer = state.auth.validate(token).await.map_err(|e| {
        tracing::debug!(request_id = %request_id, error = %e, "rejected service token");
        ApiError::from(e)
    })?;

    let actor = require_actor(query.actor.as_deref())?;
    if issuer != actor {
        tracing::warn!(
            request_id = %request_id,
            issuer = %issuer,
            actor = %actor,
            "token issuer does not own the requested files"
        );
        return Err(ApiError::Forbidden(
            "token issuer does not match actor".to_string(),
        ));
    }

    let output = state
        .views
        .actor_files(&actor, query.cursor.as_deref(), query.limit.as_deref())
        .await
        .map_err(|e| ApiError::from_index(e, &request_id))?;

    tracing::debug!(
        request_id = %request_id,
        did = %actor,
        files = output.files.len(),
        "listed actor files"
    );
    Ok(Json(output))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Handler for `GET /health`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
