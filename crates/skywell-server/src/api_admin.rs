//! Administrative handlers.

use crate::{api::ApiError, middleware::RequestId, AppState};
use axum::{
    extract::{rejection::JsonRejection, Extension, Json},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use skywell_index::Outcome;
use skywell_types::Did;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct IndexActorProfileRequest {
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct IndexActorProfileResponse {
    pub did: String,
    pub indexed: bool,
}

/// Handler for `POST /xrpc/dev.skywell.indexActorProfile`.
///
/// Creates the user row if needed and refreshes its profile from upstream,
/// whether or not the account has published any files.
pub async fn index_actor_profile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<IndexActorProfileRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IndexActorProfileResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let did = Did::parse(&request.actor).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = state
        .indexer
        .index_actor_profile(&did)
        .await
        .map_err(|e| ApiError::from_index(e, &request_id))?;

    tracing::info!(request_id = %request_id, did = %did, ?outcome, "indexed actor profile");

    Ok((
        StatusCode::OK,
        Json(IndexActorProfileResponse {
            did: did.to_string(),
            indexed: matches!(outcome, Outcome::ProfileRefreshed),
        }),
    ))
}
