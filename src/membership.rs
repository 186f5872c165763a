//! Gossip group membership as seen by the policy layer.
//!
//! Discovery and failure detection belong to the gossip transport; the policy
//! layer only ever asks for the current list of live peers.
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

/// Transport-level address of a gossip group member
pub type PeerAddress = String;

pub trait MembershipView: Send + Sync {
    /// Live peers right now. No ordering is implied.
    fn members(&self) -> Vec<PeerAddress>;
}

/// Peer status in the membership lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Joining,
    Active,
    Leaving,
    Failed,
    Left,
}

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub address: PeerAddress,
    pub status: PeerStatus,
    pub joined_at: u64,
    pub last_seen: u64,
}

/// Membership list fed by whoever observes the gossip group (a transport
/// callback, an admin tool, or a static seed list). Only `Active` peers are
/// reported as live.
#[derive(Debug, Default)]
pub struct StaticMembership {
    peers: RwLock<HashMap<PeerAddress, PeerInfo>>,
    membership_version: RwLock<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership where every seed address is already active
    pub fn with_active_peers<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerAddress>,
    {
        let membership = Self::new();
        for peer in peers {
            membership.add_peer(peer, PeerStatus::Active);
        }
        membership
    }

    /// Add a peer; returns false if it is already known
    pub fn add_peer(&self, address: impl Into<PeerAddress>, status: PeerStatus) -> bool {
        let address = address.into();
        let now = now_secs();
        let Ok(mut peers) = self.peers.write() else {
            warn!("Membership lock poisoned, dropping add of {}", address);
            return false;
        };
        if peers.contains_key(&address) {
            return false;
        }
        info!("Membership: peer {} joined as {:?}", address, status);
        peers.insert(
            address.clone(),
            PeerInfo {
                address,
                status,
                joined_at: now,
                last_seen: now,
            },
        );
        drop(peers);
        self.bump_version();
        true
    }

    pub fn remove_peer(&self, address: &str) -> Option<PeerInfo> {
        let removed = self.peers.write().ok()?.remove(address);
        if removed.is_some() {
            info!("Membership: peer {} removed", address);
            self.bump_version();
        }
        removed
    }

    /// Update a peer's status and refresh its last-seen time
    pub fn update_status(&self, address: &str, status: PeerStatus) -> bool {
        let updated = match self.peers.write() {
            Ok(mut peers) => match peers.get_mut(address) {
                Some(peer) => {
                    peer.status = status;
                    peer.last_seen = now_secs();
                    true
                }
                None => false,
            },
            Err(_) => false,
        };
        if updated {
            self.bump_version();
        }
        updated
    }

    /// Mark active peers not seen within `failure_timeout` as failed
    pub fn detect_failed(&self, failure_timeout: Duration) -> Vec<PeerAddress> {
        let now = now_secs();
        let timeout_secs = failure_timeout.as_secs();
        let mut failed = Vec::new();

        if let Ok(mut peers) = self.peers.write() {
            for (address, peer) in peers.iter_mut() {
                if peer.status == PeerStatus::Active
                    && now.saturating_sub(peer.last_seen) > timeout_secs
                {
                    peer.status = PeerStatus::Failed;
                    failed.push(address.clone());
                }
            }
        }

        if !failed.is_empty() {
            warn!("Membership: peers failed: {:?}", failed);
            self.bump_version();
        }
        failed
    }

    pub fn version(&self) -> u64 {
        self.membership_version.read().map(|v| *v).unwrap_or(0)
    }

    fn bump_version(&self) {
        if let Ok(mut version) = self.membership_version.write() {
            *version += 1;
        }
    }

    #[cfg(test)]
    fn set_last_seen(&self, address: &str, last_seen: u64) {
        if let Some(peer) = self.peers.write().unwrap().get_mut(address) {
            peer.last_seen = last_seen;
        }
    }
}

impl MembershipView for StaticMembership {
    fn members(&self) -> Vec<PeerAddress> {
        match self.peers.read() {
            Ok(peers) => peers
                .values()
                .filter(|peer| peer.status == PeerStatus::Active)
                .map(|peer| peer.address.clone())
                .collect(),
            Err(e) => {
                warn!("Membership lock poisoned, reporting no members: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut members: Vec<PeerAddress>) -> Vec<PeerAddress> {
        members.sort();
        members
    }

    #[test]
    fn test_only_active_peers_are_members() {
        let membership = StaticMembership::with_active_peers(["a:1", "b:1"]);
        assert!(membership.add_peer("c:1", PeerStatus::Joining));
        assert_eq!(sorted(membership.members()), vec!["a:1", "b:1"]);

        assert!(membership.update_status("c:1", PeerStatus::Active));
        assert!(membership.update_status("a:1", PeerStatus::Leaving));
        assert_eq!(sorted(membership.members()), vec!["b:1", "c:1"]);
    }

    #[test]
    fn test_add_and_remove() {
        let membership = StaticMembership::new();
        assert!(membership.add_peer("a:1", PeerStatus::Active));
        assert!(!membership.add_peer("a:1", PeerStatus::Active));
        let version = membership.version();

        assert!(membership.remove_peer("a:1").is_some());
        assert!(membership.remove_peer("a:1").is_none());
        assert!(membership.members().is_empty());
        assert_eq!(membership.version(), version + 1);
        assert!(!membership.update_status("a:1", PeerStatus::Active));
    }

    #[test]
    fn test_detect_failed() {
        let membership = StaticMembership::with_active_peers(["a:1", "b:1"]);
        membership.set_last_seen("a:1", now_secs() - 120);

        let failed = membership.detect_failed(Duration::from_secs(30));
        assert_eq!(failed, vec!["a:1".to_string()]);
        assert_eq!(membership.members(), vec!["b:1".to_string()]);
    }
}
