use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{DatasetDirectory, DatasetId, NodeDescriptor, NodeSummary};
use crate::error::Result;

#[derive(Clone, Debug)]
struct NodeEntry {
    descriptor: NodeDescriptor,
    available: bool,
}

/// Directory kept in process memory. Datasets stay known after their node
/// goes away; lookups then report the owner as absent.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    nodes: DashMap<String, NodeEntry>,
    // dataset id -> node name
    placements: DashMap<DatasetId, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a directory from `dataset id -> node` placements, naming each node
    /// after its address.
    pub fn from_placements<I>(placements: I) -> Self
    where
        I: IntoIterator<Item = (DatasetId, NodeDescriptor)>,
    {
        let directory = Self::new();
        for (dataset_id, node) in placements {
            let name = node.to_string();
            directory.insert_node(name.clone(), node);
            directory.assign(dataset_id, name);
        }
        directory
    }

    pub fn insert_node(&self, name: impl Into<String>, descriptor: NodeDescriptor) {
        let name = name.into();
        debug!("Directory: node '{}' at {}", name, descriptor);
        self.nodes.insert(
            name,
            NodeEntry {
                descriptor,
                available: true,
            },
        );
    }

    /// Record that `node_name` now hosts `dataset_id`
    pub fn assign(&self, dataset_id: impl Into<DatasetId>, node_name: impl Into<String>) {
        self.placements.insert(dataset_id.into(), node_name.into());
    }

    pub fn set_available(&self, node_name: &str, available: bool) -> bool {
        match self.nodes.get_mut(node_name) {
            Some(mut entry) => {
                entry.available = available;
                true
            }
            None => false,
        }
    }

    pub fn remove_node(&self, node_name: &str) -> Option<NodeDescriptor> {
        self.nodes.remove(node_name).map(|(_, entry)| entry.descriptor)
    }
}

#[async_trait]
impl DatasetDirectory for InMemoryDirectory {
    async fn exists(&self, dataset_id: &str) -> Result<bool> {
        Ok(self.placements.contains_key(dataset_id))
    }

    async fn owning_node(&self, dataset_id: &str) -> Result<Option<NodeDescriptor>> {
        let node_name = match self.placements.get(dataset_id) {
            Some(name) => name.value().clone(),
            None => return Ok(None),
        };
        Ok(self
            .nodes
            .get(&node_name)
            .filter(|entry| entry.available)
            .map(|entry| entry.descriptor.clone()))
    }

    async fn dataset_identifiers(&self) -> Result<Vec<DatasetId>> {
        Ok(self
            .placements
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn nodes(&self) -> Result<Vec<NodeSummary>> {
        let mut summaries: Vec<NodeSummary> = self
            .nodes
            .iter()
            .map(|entry| {
                let mut datasets: Vec<DatasetId> = self
                    .placements
                    .iter()
                    .filter(|p| p.value() == entry.key())
                    .map(|p| p.key().clone())
                    .collect();
                datasets.sort();
                NodeSummary {
                    name: entry.key().clone(),
                    ip_address: entry.descriptor.address.clone(),
                    port: entry.descriptor.port,
                    available: entry.available,
                    datasets,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}
