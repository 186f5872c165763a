mod base;
mod datasets;
mod network;

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use base::AboutResponse;
pub use datasets::{
    IdentifiersResponse, InvalidationResponse, ProjectDescriptionRequest,
    ProjectDescriptionResponse,
};
pub use network::{BlacklistRequest, NodesResponse, RecipientsResponse};

use crate::multicast::FairRecipientSelector;
use crate::routing::RoutingService;

/// Everything a handler may reach
#[derive(Clone, Debug)]
pub struct AppState {
    pub routing: Arc<RoutingService>,
    pub selector: Arc<FairRecipientSelector>,
}

impl AppState {
    pub fn new(routing: RoutingService, selector: Arc<FairRecipientSelector>) -> Self {
        Self {
            routing: Arc::new(routing),
            selector,
        }
    }
}

/// Build the directory API. `request_timeout` bounds each handler up to the
/// point it starts answering; streamed bodies are not cut off by it.
pub fn api(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        // Datasets
        .route(paths::dataset::IDS, routing::get(datasets::list_ids))
        .route(paths::dataset::METADATA, routing::get(datasets::metadata))
        .route(paths::dataset::DATA, routing::get(datasets::data))
        .route(paths::dataset::VERIFY, routing::get(datasets::verify))
        .route(
            paths::dataset::SET_PROJECT_DESCRIPTION,
            routing::post(datasets::set_project_description),
        )
        .route(
            paths::dataset::GET_PROJECT_DESCRIPTION,
            routing::get(datasets::get_project_description),
        )
        // Network and multicast administration
        .route(paths::network::NODES, routing::get(network::nodes))
        .route(paths::network::BLACKLIST, routing::put(network::set_blacklist))
        .route(paths::network::RECIPIENTS, routing::get(network::recipients))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(request_timeout),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::checkout::InMemoryCheckoutTracker;
    use crate::directory::{InMemoryDirectory, NodeDescriptor};
    use crate::membership::StaticMembership;
    use crate::multicast::SelectorConfig;
    use crate::policy::InMemoryPolicyStore;
    use crate::routing::RoutingConfig;

    fn app() -> (Router, Arc<InMemoryPolicyStore>) {
        let directory = InMemoryDirectory::new();
        directory.insert_node("node-a", NodeDescriptor::new("127.0.0.1", 9));
        directory.assign("doi:10.1/b", "node-a");
        directory.assign("doi:10.1/a", "node-a");
        let policies = Arc::new(InMemoryPolicyStore::new());
        let routing = RoutingService::new(
            Arc::new(directory),
            policies.clone(),
            Arc::new(InMemoryCheckoutTracker::new()),
            RoutingConfig::default(),
        )
        .unwrap();
        let membership = Arc::new(StaticMembership::with_active_peers(["A", "B", "C", "D"]));
        let selector = Arc::new(FairRecipientSelector::new(
            membership,
            SelectorConfig::default(),
        ));
        let state = AppState::new(routing, selector);
        (api(state, Duration::from_secs(10)), policies)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_about() {
        let (app, _) = app();
        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/about")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["name"], "govnet");
    }

    #[tokio::test]
    async fn test_ids_are_sorted() {
        let (app, _) = app();
        let response = app.oneshot(get("/dataset/ids")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"Identifiers": ["doi:10.1/a", "doi:10.1/b"]})
        );
    }

    #[tokio::test]
    async fn test_verify_reports_invalidation() {
        let (app, policies) = app();
        let response = app
            .clone()
            .oneshot(get("/dataset/verify/doi:10.1/a"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"IsInvalidated": false}));

        policies.invalidate("doi:10.1/a").unwrap();
        let response = app.oneshot(get("/dataset/verify/doi:10.1/a")).await.unwrap();
        assert_eq!(json_body(response).await, json!({"IsInvalidated": true}));
    }

    #[tokio::test]
    async fn test_unknown_metadata_is_404() {
        let (app, _) = app();
        let response = app
            .oneshot(get("/dataset/metadata/doi:10.1/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn test_data_without_token_is_400() {
        let (app, _) = app();
        let response = app.oneshot(get("/dataset/data/doi:10.1/a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_project_description_round_trip() {
        let (app, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/dataset/set_project_description/doi:10.1/a")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"project_description":"cohort study"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get("/dataset/get_project_description/doi:10.1/a"))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await,
            json!({"ProjectDescription": "cohort study"})
        );

        let response = app
            .oneshot(get("/dataset/get_project_description/doi:10.1/zzz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blacklist_and_recipients() {
        let (app, _) = app();
        let request = Request::builder()
            .method("PUT")
            .uri("/network/multicast/blacklist")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"addresses":["A","C"]}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get("/network/multicast/recipients?fanout=4"))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"Recipients": ["B", "D"]}));
    }

    #[tokio::test]
    async fn test_network_nodes() {
        let (app, _) = app();
        let response = app.oneshot(get("/network/nodes")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["Nodes"][0]["name"], "node-a");
        assert_eq!(body["Nodes"][0]["datasets"], json!(["doi:10.1/a", "doi:10.1/b"]));
    }
}
