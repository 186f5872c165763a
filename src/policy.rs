//! Dataset policy state consulted by the directory: invalidation flags and
//! project descriptions.
use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::concurrency_error;
use crate::directory::DatasetId;
use crate::error::Result;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Whether the dataset's policy changed since it was checked out
    async fn is_invalidated(&self, dataset_id: &str) -> Result<bool>;

    async fn project_description(&self, dataset_id: &str) -> Result<Option<String>>;

    async fn set_project_description(&self, dataset_id: &str, description: String)
        -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    invalidated: RwLock<HashSet<DatasetId>>,
    descriptions: DashMap<DatasetId, String>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self, dataset_id: impl Into<DatasetId>) -> Result<()> {
        self.invalidated
            .write()
            .map_err(|e| concurrency_error!("Failed to acquire invalidation lock: {}", e))?
            .insert(dataset_id.into());
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn is_invalidated(&self, dataset_id: &str) -> Result<bool> {
        let invalidated = self
            .invalidated
            .read()
            .map_err(|e| concurrency_error!("Failed to acquire invalidation lock: {}", e))?;
        Ok(invalidated.contains(dataset_id))
    }

    async fn project_description(&self, dataset_id: &str) -> Result<Option<String>> {
        Ok(self
            .descriptions
            .get(dataset_id)
            .map(|description| description.value().clone()))
    }

    async fn set_project_description(
        &self,
        dataset_id: &str,
        description: String,
    ) -> Result<()> {
        self.descriptions.insert(dataset_id.to_string(), description);
        Ok(())
    }
}
