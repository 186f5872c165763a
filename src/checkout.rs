//! Checkout events: a record that a caller retrieved a dataset.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::CallerIdentity;
use crate::directory::DatasetId;
use crate::error::Result;

/// Immutable once created
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub dataset_id: DatasetId,
    pub timestamp: DateTime<Utc>,
    pub caller: CallerIdentity,
}

impl CheckoutRecord {
    pub fn now(dataset_id: impl Into<DatasetId>, caller: CallerIdentity) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            timestamp: Utc::now(),
            caller,
        }
    }
}

#[async_trait]
pub trait CheckoutTracker: Send + Sync {
    async fn record(&self, record: CheckoutRecord) -> Result<()>;
}

/// Append-only checkout log kept in memory, grouped by dataset
#[derive(Debug, Default)]
pub struct InMemoryCheckoutTracker {
    records: DashMap<DatasetId, Vec<CheckoutRecord>>,
}

impl InMemoryCheckoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkouts(&self, dataset_id: &str) -> Vec<CheckoutRecord> {
        self.records
            .get(dataset_id)
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl CheckoutTracker for InMemoryCheckoutTracker {
    async fn record(&self, record: CheckoutRecord) -> Result<()> {
        info!(
            dataset_id = %record.dataset_id,
            caller = %record.caller.subject,
            "Dataset checked out"
        );
        self.records
            .entry(record.dataset_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}
