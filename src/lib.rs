//! govnet: dataset directory and policy-distribution overlay for federated
//! storage nodes.
pub mod api;
pub mod auth;
pub mod checkout;
pub mod cli;
pub mod directory;
pub mod error;
pub mod membership;
pub mod multicast;
pub mod policy;
pub mod routing;
pub mod settings;
