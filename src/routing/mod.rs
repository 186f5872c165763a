//! Dataset routing: resolve a dataset to its owning node, relay the node's
//! answer to the client, and record checkouts of full datasets.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::AUTHORIZATION;
use futures::{FutureExt, StreamExt};
use reqwest::Url;
use tracing::{error, info, instrument, warn};

use crate::auth::{BearerToken, CallerIdentity, TokenValidator};
use crate::{bad_request, internal_error};
use crate::checkout::{CheckoutRecord, CheckoutTracker};
use crate::directory::{DatasetDirectory, DatasetId, NodeDescriptor, NodeSummary};
use crate::error::{GovnetError, Result};
use crate::policy::PolicyStore;
use crate::settings::{DATASET_CHUNK_SIZE, METADATA_CHUNK_SIZE};

mod relay;

pub use relay::{ProxiedResponse, RelayBody};

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub node_scheme: String,
    // Bounds every directory lookup and the wait for an owning node's headers
    pub fetch_timeout: Duration,
    // Bounds network-wide inventory calls
    pub discovery_timeout: Duration,
    // Bounds one identifier discovery round
    pub discovery_deadline: Duration,
    pub metadata_chunk_size: usize,
    pub dataset_chunk_size: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            node_scheme: "http".to_string(),
            fetch_timeout: Duration::from_secs(20),
            discovery_timeout: Duration::from_secs(30),
            discovery_deadline: Duration::from_secs(5),
            metadata_chunk_size: METADATA_CHUNK_SIZE,
            dataset_chunk_size: DATASET_CHUNK_SIZE,
        }
    }
}

/// What client-facing handlers call into. Cheap to clone; every request
/// gets its own lookup and its own upstream connection.
#[derive(Clone)]
pub struct RoutingService {
    directory: Arc<dyn DatasetDirectory>,
    policies: Arc<dyn PolicyStore>,
    checkouts: Arc<dyn CheckoutTracker>,
    validator: Option<TokenValidator>,
    client: reqwest::Client,
    config: RoutingConfig,
}

impl std::fmt::Debug for RoutingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingService")
            .field("verifies_tokens", &self.validator.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl RoutingService {
    pub fn new(
        directory: Arc<dyn DatasetDirectory>,
        policies: Arc<dyn PolicyStore>,
        checkouts: Arc<dyn CheckoutTracker>,
        config: RoutingConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.fetch_timeout)
            .build()?;
        Ok(Self {
            directory,
            policies,
            checkouts,
            validator: None,
            client,
            config,
        })
    }

    /// Require dataset tokens to carry a valid signature
    pub fn with_validator(mut self, validator: TokenValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    async fn bounded<T, F>(&self, limit: Duration, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {}s", what, limit.as_secs());
                Err(GovnetError::ServiceUnavailable(format!(
                    "{} timed out",
                    what
                )))
            }
        }
    }

    /// Find the node hosting `dataset_id`: unknown datasets are `NotFound`,
    /// known datasets without an available node are `Gone`.
    async fn locate(&self, dataset_id: &str) -> Result<NodeDescriptor> {
        if dataset_id.is_empty() {
            return Err(bad_request!("Missing dataset identifier"));
        }

        let limit = self.config.fetch_timeout;
        let exists = self
            .bounded(limit, "directory lookup", self.directory.exists(dataset_id))
            .await?;
        if !exists {
            let err = GovnetError::NotFound(format!(
                "Dataset '{}' is not stored in the network",
                dataset_id
            ));
            info!("{}", err);
            return Err(err);
        }

        match self
            .bounded(limit, "directory lookup", self.directory.owning_node(dataset_id))
            .await?
        {
            Some(node) => Ok(node),
            None => {
                let err = GovnetError::Gone(format!(
                    "The network node that stores the dataset '{}' is not available",
                    dataset_id
                ));
                info!("{}", err);
                Err(err)
            }
        }
    }

    /// The owning node's endpoint for `dataset_id`. Each `/`-separated part
    /// of the identifier is percent-encoded as its own path segment, so `?`,
    /// `#` and `%` reach the node as part of the identifier.
    fn node_url(&self, node: &NodeDescriptor, kind: &str, dataset_id: &str) -> Result<Url> {
        let segments: Vec<&str> = dataset_id.split('/').collect();
        // dot segments would be dropped from the path and name another dataset
        if segments.iter().any(|segment| matches!(*segment, "." | "..")) {
            return Err(bad_request!("Invalid dataset identifier '{}'", dataset_id));
        }

        let base = format!("{}://{}:{}/", self.config.node_scheme, node.address, node.port);
        let mut url = Url::parse(&base)
            .map_err(|e| internal_error!("Invalid node address {}: {}", base, e))?;
        url.path_segments_mut()
            .map_err(|_| internal_error!("Node address {} cannot carry a path", base))?
            .pop_if_empty()
            .push("dataset")
            .push(kind)
            .extend(segments);
        Ok(url)
    }

    /// Send the request to the owning node and wait for its headers.
    /// Anything but a 2xx is handed back as `Upstream` with the node's own
    /// status and message.
    async fn fetch(
        &self,
        request: reqwest::RequestBuilder,
        node: &NodeDescriptor,
    ) -> Result<reqwest::Response> {
        let limit = self.config.fetch_timeout;
        let response = match tokio::time::timeout(limit, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(%node, "Owning node unreachable: {}", e);
                return Err(GovnetError::ServiceUnavailable(format!(
                    "Service is not available: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(%node, "Owning node did not answer within {}s", limit.as_secs());
                return Err(GovnetError::ServiceUnavailable(
                    "Service is not available".to_string(),
                ));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let cap = self.config.metadata_chunk_size;
        let message = match tokio::time::timeout(limit, read_capped(response, cap)).await {
            Ok(text) if !text.is_empty() => text,
            _ => status.canonical_reason().unwrap_or("").to_string(),
        };
        error!(%node, status = status.as_u16(), "Owning node refused request: {}", message);
        Err(GovnetError::Upstream { status, message })
    }

    /// Relay a dataset's metadata from its owning node.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve_metadata(&self, dataset_id: &str) -> Result<ProxiedResponse> {
        let node = self.locate(dataset_id).await?;
        let request = self.client.get(self.node_url(&node, "metadata", dataset_id)?);
        let response = self.fetch(request, &node).await?;
        Ok(ProxiedResponse::relay(
            response,
            self.config.metadata_chunk_size,
            self.config.fetch_timeout,
            None,
        ))
    }

    /// Relay a full dataset, forwarding the caller's token to the owning node.
    /// A checkout is recorded once the whole body has been streamed out.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn resolve_dataset(
        &self,
        dataset_id: &str,
        token: BearerToken,
    ) -> Result<ProxiedResponse> {
        let caller = CallerIdentity::from_token(&token)?;
        if let Some(validator) = &self.validator {
            validator.verify(&token).map_err(|e| {
                warn!(dataset_id, caller = %caller.subject, "Rejected dataset request: {}", e);
                e
            })?;
        }

        let node = self.locate(dataset_id).await?;
        let request = self
            .client
            .get(self.node_url(&node, "data", dataset_id)?)
            .header(AUTHORIZATION, token.header_value());
        let response = self.fetch(request, &node).await?;

        let checkouts = self.checkouts.clone();
        let record_for = dataset_id.to_string();
        let on_complete = async move {
            let record = CheckoutRecord::now(record_for, caller);
            let (dataset_id, subject) = (record.dataset_id.clone(), record.caller.subject.clone());
            if let Err(e) = checkouts.record(record).await {
                error!(%dataset_id, caller = %subject, "Failed to record checkout: {}", e);
            }
        }
        .boxed();

        Ok(ProxiedResponse::relay(
            response,
            self.config.dataset_chunk_size,
            self.config.fetch_timeout,
            Some(on_complete),
        ))
    }

    /// Whether the dataset's policy changed since it was checked out
    #[instrument(skip(self), level = "debug")]
    pub async fn invalidation_status(&self, dataset_id: &str) -> Result<bool> {
        self.bounded(
            self.config.fetch_timeout,
            "invalidation lookup",
            self.policies.is_invalidated(dataset_id),
        )
        .await
    }

    /// Every dataset identifier in the network, sorted
    #[instrument(skip(self), level = "debug")]
    pub async fn list_network_dataset_ids(&self) -> Result<Vec<DatasetId>> {
        let mut ids = self
            .bounded(
                self.config.discovery_deadline,
                "dataset discovery",
                self.directory.dataset_identifiers(),
            )
            .await?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn require_known(&self, dataset_id: &str) -> Result<()> {
        if dataset_id.is_empty() {
            return Err(bad_request!("Missing dataset identifier"));
        }
        let exists = self
            .bounded(
                self.config.fetch_timeout,
                "directory lookup",
                self.directory.exists(dataset_id),
            )
            .await?;
        if exists {
            Ok(())
        } else {
            Err(GovnetError::NotFound(format!(
                "Dataset '{}' is not stored in the network",
                dataset_id
            )))
        }
    }

    #[instrument(skip(self, description), level = "debug")]
    pub async fn set_project_description(
        &self,
        dataset_id: &str,
        description: String,
    ) -> Result<()> {
        self.require_known(dataset_id).await?;
        self.policies
            .set_project_description(dataset_id, description)
            .await
    }

    /// The dataset's project description, empty if none was set
    #[instrument(skip(self), level = "debug")]
    pub async fn project_description(&self, dataset_id: &str) -> Result<String> {
        self.require_known(dataset_id).await?;
        Ok(self
            .policies
            .project_description(dataset_id)
            .await?
            .unwrap_or_default())
    }

    pub async fn network_nodes(&self) -> Result<Vec<NodeSummary>> {
        self.bounded(
            self.config.discovery_timeout,
            "node inventory",
            self.directory.nodes(),
        )
        .await
    }
}

/// At most `cap` bytes of an error body, decoded lossily
async fn read_capped(response: reqwest::Response, cap: usize) -> String {
    let mut body = response.bytes_stream();
    let mut collected: Vec<u8> = Vec::new();
    while let Some(Ok(chunk)) = body.next().await {
        let room = cap.saturating_sub(collected.len());
        collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if collected.len() >= cap {
            break;
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
