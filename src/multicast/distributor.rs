//! Policy distribution driver: pushes each policy update to a fair fan-out
//! of gossip peers.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::FairRecipientSelector;
use crate::directory::DatasetId;
use crate::error::{GovnetError, Result};
use crate::membership::PeerAddress;

/// A new usage policy for one dataset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub dataset_id: DatasetId,
    pub version: u64,
    pub policy: String,
}

/// Delivers a policy update to one peer over the gossip transport
#[async_trait]
pub trait PolicySender: Send + Sync {
    async fn send(&self, peer: &PeerAddress, update: &PolicyUpdate) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct DistributorConfig {
    pub fanout: usize,
    // wait before retrying when nobody is eligible
    pub retry_interval: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            fanout: 4,
            retry_interval: Duration::from_secs(5),
        }
    }
}

pub struct PolicyDistributor {
    selector: Arc<FairRecipientSelector>,
    sender: Arc<dyn PolicySender>,
    config: DistributorConfig,
}

impl PolicyDistributor {
    pub fn new(
        selector: Arc<FairRecipientSelector>,
        sender: Arc<dyn PolicySender>,
        config: DistributorConfig,
    ) -> Self {
        Self {
            selector,
            sender,
            config,
        }
    }

    /// Send one update to the next fan-out. Returns the peers that accepted it.
    /// A failing peer does not stop delivery to the others.
    pub async fn distribute(&self, update: &PolicyUpdate) -> Result<Vec<PeerAddress>> {
        let recipients = self.selector.select_recipients(self.config.fanout)?;
        let mut delivered = Vec::with_capacity(recipients.len());
        for peer in recipients {
            match self.sender.send(&peer, update).await {
                Ok(()) => delivered.push(peer),
                Err(e) => warn!(
                    dataset_id = %update.dataset_id,
                    "Failed to send policy update to {}: {}", peer, e
                ),
            }
        }
        debug!(
            dataset_id = %update.dataset_id,
            version = update.version,
            "Policy update delivered to {:?}",
            delivered
        );
        Ok(delivered)
    }

    /// Drain `updates` until the queue closes or `shutdown` flips to true.
    /// Updates that find no eligible member are retried after
    /// `retry_interval`.
    pub fn spawn(
        self,
        mut updates: mpsc::Receiver<PolicyUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Policy distributor started with fan-out {}",
                self.config.fanout
            );
            'updates: loop {
                let update = tokio::select! {
                    next = updates.recv() => match next {
                        Some(update) => update,
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                loop {
                    match self.distribute(&update).await {
                        Ok(_) => break,
                        Err(GovnetError::EmptyMembership) => {
                            warn!(
                                dataset_id = %update.dataset_id,
                                "No multicast members, retrying in {}s",
                                self.config.retry_interval.as_secs()
                            );
                        }
                        Err(e) => {
                            warn!(dataset_id = %update.dataset_id, "Dropping policy update: {}", e);
                            break;
                        }
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break 'updates;
                            }
                        }
                    }
                }
            }
            info!("Policy distributor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::membership::{PeerStatus, StaticMembership};
    use crate::multicast::SelectorConfig;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(PeerAddress, u64)>>,
        failing: Vec<PeerAddress>,
    }

    #[async_trait]
    impl PolicySender for RecordingSender {
        async fn send(&self, peer: &PeerAddress, update: &PolicyUpdate) -> Result<()> {
            if self.failing.contains(peer) {
                return Err(GovnetError::ServiceUnavailable(format!("{} unreachable", peer)));
            }
            self.sent.lock().unwrap().push((peer.clone(), update.version));
            Ok(())
        }
    }

    fn update(version: u64) -> PolicyUpdate {
        PolicyUpdate {
            dataset_id: "doi:10.1/X".to_string(),
            version,
            policy: "allow:research".to_string(),
        }
    }

    fn distributor(
        membership: Arc<StaticMembership>,
        sender: Arc<RecordingSender>,
    ) -> PolicyDistributor {
        let selector = Arc::new(FairRecipientSelector::new(
            membership,
            SelectorConfig::default(),
        ));
        PolicyDistributor::new(
            selector,
            sender,
            DistributorConfig {
                fanout: 4,
                retry_interval: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_distribute_skips_failing_peer() {
        let membership = Arc::new(StaticMembership::with_active_peers(["A", "B", "C", "D"]));
        let sender = Arc::new(RecordingSender {
            failing: vec!["C".to_string()],
            ..Default::default()
        });
        let distributor = distributor(membership, sender.clone());

        let delivered = distributor.distribute(&update(1)).await.unwrap();
        assert_eq!(delivered, vec!["A", "B", "D"]);
        assert_eq!(sender.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_driver_retries_until_members_appear() {
        let membership = Arc::new(StaticMembership::new());
        let sender = Arc::new(RecordingSender::default());
        let distributor = distributor(membership.clone(), sender.clone());

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = distributor.spawn(rx, shutdown_rx);

        tx.send(update(7)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sender.sent.lock().unwrap().is_empty());

        membership.add_peer("A", PeerStatus::Active);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            sender.sent.lock().unwrap().clone(),
            vec![("A".to_string(), 7)]
        );

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_spawned_driver_stops_when_queue_closes() {
        let membership = Arc::new(StaticMembership::with_active_peers(["A", "B", "C", "D"]));
        let sender = Arc::new(RecordingSender::default());
        let distributor = distributor(membership, sender.clone());

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = distributor.spawn(rx, shutdown_rx);

        tx.send(update(1)).await.unwrap();
        tx.send(update(2)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 8);
        assert!(sent.iter().filter(|(_, v)| *v == 2).count() == 4);
    }
}
