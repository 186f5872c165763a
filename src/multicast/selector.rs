//! Fair multicast recipient selection.
//!
//! Every live, non-blacklisted peer carries a count of how many times it has
//! been picked as a direct recipient. A selection takes the peers with the
//! lowest counts first and bumps the count of each one it returns, so over
//! time every peer carries the same share of the fan-out load.
//!
//! Ties between equal counts are broken by ascending peer address, which
//! makes repeated single-recipient selections over a stable membership a
//! strict round-robin.
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::concurrency_error;
use crate::error::{GovnetError, Result};
use crate::membership::{MembershipView, PeerAddress};
use crate::settings::DEFAULT_FANOUT_CLAMP_THRESHOLD;

#[derive(Clone, Copy, Debug)]
pub struct SelectorConfig {
    /// Requests for fewer recipients than this are reduced to a single one
    pub clamp_threshold: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            clamp_threshold: DEFAULT_FANOUT_CLAMP_THRESHOLD,
        }
    }
}

#[derive(Debug, Default)]
struct SelectorState {
    // peer -> times selected
    counts: BTreeMap<PeerAddress, u64>,
    blacklist: HashSet<PeerAddress>,
}

impl SelectorState {
    /// Mirror the live membership: keep counts of peers still present, start
    /// newcomers at zero, drop departed and blacklisted peers.
    fn reconcile(&mut self, live: Vec<PeerAddress>) {
        let previous = std::mem::take(&mut self.counts);
        for peer in live {
            if self.blacklist.contains(&peer) {
                continue;
            }
            let count = previous.get(&peer).copied().unwrap_or(0);
            self.counts.insert(peer, count);
        }
    }

    fn take_least_used(&mut self, n: usize) -> Vec<PeerAddress> {
        let mut ranked: Vec<(u64, &PeerAddress)> = self
            .counts
            .iter()
            .map(|(peer, count)| (*count, peer))
            .collect();
        // BTreeMap iteration is already address-ordered; a stable sort on the
        // count keeps that as the tie-break.
        ranked.sort_by_key(|(count, _)| *count);

        let chosen: Vec<PeerAddress> = ranked
            .into_iter()
            .take(n)
            .map(|(_, peer)| peer.clone())
            .collect();
        for peer in &chosen {
            if let Some(count) = self.counts.get_mut(peer) {
                *count += 1;
            }
        }
        chosen
    }
}

/// Picks the direct recipients of each policy multicast.
///
/// Counters and blacklist live behind a single lock, so a selection's
/// read-modify-write and a blacklist replacement never interleave.
pub struct FairRecipientSelector {
    membership: Arc<dyn MembershipView>,
    config: SelectorConfig,
    state: Mutex<SelectorState>,
}

impl std::fmt::Debug for FairRecipientSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairRecipientSelector")
            .field("config", &self.config)
            .finish()
    }
}

impl FairRecipientSelector {
    pub fn new(membership: Arc<dyn MembershipView>, config: SelectorConfig) -> Self {
        Self {
            membership,
            config,
            state: Mutex::new(SelectorState::default()),
        }
    }

    fn clamp(&self, requested: usize) -> usize {
        if requested == 0 || requested < self.config.clamp_threshold {
            1
        } else {
            requested
        }
    }

    /// Choose up to `n` distinct recipients, least-used first.
    pub fn select_recipients(&self, n: usize) -> Result<Vec<PeerAddress>> {
        // snapshot outside the lock; the transport may be slow to answer
        let live = self.membership.members();

        let mut state = self
            .state
            .lock()
            .map_err(|e| concurrency_error!("Failed to acquire selector lock: {}", e))?;
        state.reconcile(live);

        if state.counts.is_empty() {
            return Err(GovnetError::EmptyMembership);
        }

        let n = self.clamp(n);
        let recipients = state.take_least_used(n);
        debug!(
            "Selected {} of {} members for multicast: {:?}",
            recipients.len(),
            state.counts.len(),
            recipients
        );
        Ok(recipients)
    }

    /// Replace the blacklist wholesale. Applied at the next selection.
    pub fn set_blacklist<I, S>(&self, addresses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerAddress>,
    {
        let blacklist: HashSet<PeerAddress> = addresses.into_iter().map(Into::into).collect();
        let mut state = self
            .state
            .lock()
            .map_err(|e| concurrency_error!("Failed to acquire selector lock: {}", e))?;
        info!("Multicast blacklist replaced with {} addresses", blacklist.len());
        state.blacklist = blacklist;
        Ok(())
    }

    pub fn blacklist(&self) -> Result<Vec<PeerAddress>> {
        let state = self
            .state
            .lock()
            .map_err(|e| concurrency_error!("Failed to acquire selector lock: {}", e))?;
        let mut addresses: Vec<PeerAddress> = state.blacklist.iter().cloned().collect();
        addresses.sort();
        Ok(addresses)
    }

    /// Current fairness counts, as of the last selection
    pub fn counts(&self) -> Result<BTreeMap<PeerAddress, u64>> {
        let state = self
            .state
            .lock()
            .map_err(|e| concurrency_error!("Failed to acquire selector lock: {}", e))?;
        Ok(state.counts.clone())
    }

    /// Forget every count
    pub fn reset(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| concurrency_error!("Failed to acquire selector lock: {}", e))?;
        state.counts.clear();
        Ok(())
    }
}
