//! Dataset directory: which storage node currently hosts which dataset.
//!
//! The directory itself is an external collaborator; this module defines the
//! interface the routing layer consumes plus an in-memory implementation.
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod memory;

pub use memory::InMemoryDirectory;

/// Persistent identifier of a dataset, e.g. `doi:10.1/X`
pub type DatasetId = String;

/// Where a dataset currently lives. Only valid for the lifetime of a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub address: String,
    pub port: u16,
}

impl NodeDescriptor {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for NodeDescriptor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid node address '{}': expected host:port", s))?;
        if address.is_empty() {
            return Err(format!("Invalid node address '{}': empty host", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("Invalid node port in '{}': {}", s, e))?;
        Ok(Self::new(address, port))
    }
}

/// One entry of the network node inventory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub available: bool,
    pub datasets: Vec<DatasetId>,
}

#[async_trait]
pub trait DatasetDirectory: Send + Sync {
    /// True if any node has ever announced the dataset
    async fn exists(&self, dataset_id: &str) -> Result<bool>;

    /// The node currently hosting the dataset, `None` if it is unavailable
    async fn owning_node(&self, dataset_id: &str) -> Result<Option<NodeDescriptor>>;

    /// Every dataset identifier known across the network, in no particular order
    async fn dataset_identifiers(&self) -> Result<Vec<DatasetId>>;

    async fn nodes(&self) -> Result<Vec<NodeSummary>>;
}
