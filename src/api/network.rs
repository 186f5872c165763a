use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::AppState;
use crate::directory::NodeSummary;
use crate::error::Result;
use crate::membership::PeerAddress;

#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    #[serde(rename = "Nodes")]
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlacklistRequest {
    pub addresses: Vec<PeerAddress>,
}

#[derive(Debug, Deserialize)]
pub struct RecipientsQuery {
    pub fanout: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecipientsResponse {
    #[serde(rename = "Recipients")]
    pub recipients: Vec<PeerAddress>,
}

#[instrument(skip(state), level = "debug")]
pub async fn nodes(State(state): State<AppState>) -> Result<axum::Json<NodesResponse>> {
    let nodes = state.routing.network_nodes().await?;
    Ok(axum::Json(NodesResponse { nodes }))
}

#[instrument(skip(state), level = "debug")]
pub async fn set_blacklist(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<BlacklistRequest>,
) -> Result<StatusCode> {
    state.selector.set_blacklist(body.addresses)?;
    Ok(StatusCode::OK)
}

/// Runs a real selection, so fairness counts move like for any multicast
#[instrument(skip(state), level = "debug")]
pub async fn recipients(
    State(state): State<AppState>,
    Query(query): Query<RecipientsQuery>,
) -> Result<axum::Json<RecipientsResponse>> {
    let fanout = query.fanout.unwrap_or(1);
    let recipients = state.selector.select_recipients(fanout)?;
    Ok(axum::Json(RecipientsResponse { recipients }))
}
