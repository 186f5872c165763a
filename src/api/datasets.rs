use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use tracing::{event, instrument, Level};

use super::{paths::drop_leading_slash, AppState};
use crate::auth;
use crate::directory::DatasetId;
use crate::error::Result;
use crate::routing::ProxiedResponse;

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifiersResponse {
    #[serde(rename = "Identifiers")]
    pub identifiers: Vec<DatasetId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidationResponse {
    #[serde(rename = "IsInvalidated")]
    pub is_invalidated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectDescriptionResponse {
    #[serde(rename = "ProjectDescription")]
    pub project_description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectDescriptionRequest {
    pub project_description: String,
}

#[instrument(skip(state), level = "debug")]
pub async fn list_ids(State(state): State<AppState>) -> Result<axum::Json<IdentifiersResponse>> {
    let identifiers = state.routing.list_network_dataset_ids().await?;
    Ok(axum::Json(IdentifiersResponse { identifiers }))
}

#[instrument(skip(state), level = "debug")]
pub async fn metadata(
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
) -> Result<ProxiedResponse> {
    state
        .routing
        .resolve_metadata(drop_leading_slash(&dataset_id))
        .await
}

#[instrument(skip(state, headers), level = "debug")]
pub async fn data(
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ProxiedResponse> {
    let token = auth::bearer_token(&headers).map_err(|err| {
        event!(
            Level::INFO,
            message = "Rejected dataset request without a usable token",
            dataset_id = dataset_id.as_str()
        );
        err
    })?;
    state
        .routing
        .resolve_dataset(drop_leading_slash(&dataset_id), token)
        .await
}

#[instrument(skip(state), level = "debug")]
pub async fn verify(
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
) -> Result<axum::Json<InvalidationResponse>> {
    let is_invalidated = state
        .routing
        .invalidation_status(drop_leading_slash(&dataset_id))
        .await?;
    Ok(axum::Json(InvalidationResponse { is_invalidated }))
}

#[instrument(skip(state, body), level = "debug")]
pub async fn set_project_description(
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ProjectDescriptionRequest>,
) -> Result<StatusCode> {
    state
        .routing
        .set_project_description(drop_leading_slash(&dataset_id), body.project_description)
        .await?;
    Ok(StatusCode::OK)
}

#[instrument(skip(state), level = "debug")]
pub async fn get_project_description(
    Path(dataset_id): Path<String>,
    State(state): State<AppState>,
) -> Result<axum::Json<ProjectDescriptionResponse>> {
    let project_description = state
        .routing
        .project_description(drop_leading_slash(&dataset_id))
        .await?;
    Ok(axum::Json(ProjectDescriptionResponse {
        project_description,
    }))
}
