//! govnet application settings
use std::collections::BTreeMap;
use std::time::Duration;

use crate::auth::KeyCacheConfig;
use crate::directory::NodeDescriptor;
use crate::multicast::SelectorConfig;
use crate::routing::RoutingConfig;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8080;
pub const DEFAULT_PORT_HTTP: &str = "8080";

pub const DEFAULT_JWKS_URL: &str = "https://login.microsoftonline.com/common/discovery/v2.0/keys";

pub const METADATA_CHUNK_SIZE: usize = 100 * 1024;
pub const DATASET_CHUNK_SIZE: usize = 1000 * 1024;
pub const DEFAULT_FANOUT_CLAMP_THRESHOLD: usize = 4;

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // Identity provider JSON Web Key Set document
    pub jwks_url: String,
    pub key_refresh_interval_secs: u64,
    pub max_signing_keys: usize,
    // When false, dataset requests only need a well-formed token
    pub verify_token_signatures: bool,

    // Outbound calls to owning nodes
    pub node_scheme: String,
    pub fetch_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub discovery_deadline_secs: u64,
    pub metadata_chunk_size: usize,
    pub dataset_chunk_size: usize,

    // Multicast recipient selection
    pub fanout_clamp_threshold: usize,

    // Inbound request handling
    pub handler_timeout_secs: u64,
    pub shutdown_grace_secs: u64,

    // Static gossip membership seed
    pub gossip_peers: Vec<String>,

    // Dataset placements for the in-memory directory: dataset id -> node
    pub dataset_placements: BTreeMap<String, NodeDescriptor>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            jwks_url: DEFAULT_JWKS_URL.to_string(),
            key_refresh_interval_secs: 300,
            max_signing_keys: 64,
            verify_token_signatures: true,
            node_scheme: "http".to_string(),
            fetch_timeout_secs: 20,
            discovery_timeout_secs: 30,
            discovery_deadline_secs: 5,
            metadata_chunk_size: METADATA_CHUNK_SIZE,
            dataset_chunk_size: DATASET_CHUNK_SIZE,
            fanout_clamp_threshold: DEFAULT_FANOUT_CLAMP_THRESHOLD,
            handler_timeout_secs: 3600,
            shutdown_grace_secs: 60,
            gossip_peers: Vec::new(),
            dataset_placements: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn routing_config(&self) -> RoutingConfig {
        RoutingConfig {
            node_scheme: self.node_scheme.clone(),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            discovery_deadline: Duration::from_secs(self.discovery_deadline_secs),
            metadata_chunk_size: self.metadata_chunk_size,
            dataset_chunk_size: self.dataset_chunk_size,
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            clamp_threshold: self.fanout_clamp_threshold,
        }
    }

    pub fn key_cache_config(&self) -> KeyCacheConfig {
        KeyCacheConfig {
            jwks_url: self.jwks_url.clone(),
            refresh_interval: Duration::from_secs(self.key_refresh_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_keys: self.max_signing_keys,
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Parse a `dataset_id=host:port` placement. The dataset id may itself
/// contain `=`, so the last one separates the node.
pub fn parse_placement(raw: &str) -> Result<(String, NodeDescriptor), String> {
    let (dataset_id, node) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("Invalid placement '{}': expected id=host:port", raw))?;
    if dataset_id.is_empty() {
        return Err(format!("Invalid placement '{}': empty dataset id", raw));
    }
    let node: NodeDescriptor = node.parse()?;
    Ok((dataset_id.to_string(), node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_placement() {
        let (id, node) = parse_placement("doi:10.1/X=10.0.0.4:9000").unwrap();
        assert_eq!(id, "doi:10.1/X");
        assert_eq!(node.address, "10.0.0.4");
        assert_eq!(node.port, 9000);
    }

    #[test]
    fn test_parse_placement_rejects_garbage() {
        assert!(parse_placement("no-separator").is_err());
        assert!(parse_placement("=10.0.0.4:9000").is_err());
        assert!(parse_placement("id=10.0.0.4").is_err());
    }

    #[test]
    fn test_derived_configs() {
        let settings = Settings::default();
        let routing = settings.routing_config();
        assert_eq!(routing.fetch_timeout, Duration::from_secs(20));
        assert_eq!(routing.metadata_chunk_size, 100 * 1024);
        assert!(routing.dataset_chunk_size > routing.metadata_chunk_size);
        assert_eq!(settings.selector_config().clamp_threshold, 4);
        assert_eq!(
            settings.key_cache_config().refresh_interval,
            Duration::from_secs(300)
        );
    }
}
