//! Policy multicast over the gossip group: who receives the next update, and
//! the driver that sends it.
pub mod distributor;
pub mod selector;

pub use distributor::{DistributorConfig, PolicyDistributor, PolicySender, PolicyUpdate};
pub use selector::{FairRecipientSelector, SelectorConfig};
