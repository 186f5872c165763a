//! CLI for this application
//!
use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = settings::APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("GOVNET_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("GOVNET_HTTP_LISTEN_PORT"),
        help = "Port to bind the directory HTTP API server to"
    )]
    pub listen_port: u16,

    #[clap(
        long,
        default_value = settings::DEFAULT_JWKS_URL,
        env("GOVNET_JWKS_URL"),
        help = "URL of the identity provider's JSON Web Key Set"
    )]
    pub jwks_url: String,

    #[clap(
        long,
        default_value = "300",
        env("GOVNET_KEY_REFRESH_INTERVAL_SECONDS"),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Interval in seconds between signing key refreshes"
    )]
    pub key_refresh_interval_seconds: u64,

    #[clap(
        long,
        default_value = "64",
        env("GOVNET_MAX_SIGNING_KEYS"),
        help = "Maximum number of signing keys kept from the key set"
    )]
    pub max_signing_keys: usize,

    #[clap(
        long,
        env("GOVNET_SKIP_TOKEN_VERIFICATION"),
        help = "Only check that dataset requests carry a well-formed bearer token"
    )]
    pub skip_token_verification: bool,

    #[clap(
        long,
        default_value = "http",
        env("GOVNET_NODE_SCHEME"),
        help = "Scheme used to reach storage nodes"
    )]
    pub node_scheme: String,

    #[clap(
        long,
        default_value = "20",
        env("GOVNET_FETCH_TIMEOUT_SECONDS"),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Timeout in seconds for dataset and metadata fetches"
    )]
    pub fetch_timeout_seconds: u64,

    #[clap(
        long,
        default_value = "30",
        env("GOVNET_DISCOVERY_TIMEOUT_SECONDS"),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Timeout in seconds for network-wide identifier discovery"
    )]
    pub discovery_timeout_seconds: u64,

    #[clap(
        long,
        default_value = "5",
        env("GOVNET_DISCOVERY_DEADLINE_SECONDS"),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Deadline in seconds for a single discovery round"
    )]
    pub discovery_deadline_seconds: u64,

    #[clap(
        long,
        default_value = "4",
        env("GOVNET_FANOUT_CLAMP_THRESHOLD"),
        help = "Requested multicast fan-outs below this value are reduced to 1"
    )]
    pub fanout_clamp_threshold: usize,

    #[clap(
        long,
        default_value = "60",
        env("GOVNET_SHUTDOWN_GRACE_SECONDS"),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds to let outstanding requests drain on shutdown"
    )]
    pub shutdown_grace_seconds: u64,

    #[clap(
        long,
        default_value = "3600",
        env("GOVNET_HANDLER_TIMEOUT_SECONDS"),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds a request handler may take before it starts answering"
    )]
    pub handler_timeout_seconds: u64,

    // Relay chunk sizes
    #[clap(
        long,
        default_value_t = settings::METADATA_CHUNK_SIZE,
        env("GOVNET_METADATA_CHUNK_SIZE"),
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        help = "Largest chunk in bytes relayed from a metadata response"
    )]
    pub metadata_chunk_size: usize,

    #[clap(
        long,
        default_value_t = settings::DATASET_CHUNK_SIZE,
        env("GOVNET_DATASET_CHUNK_SIZE"),
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
        help = "Largest chunk in bytes relayed from a dataset response"
    )]
    pub dataset_chunk_size: usize,

    // Gossip membership seed
    #[clap(
        long,
        env("GOVNET_GOSSIP_PEERS"),
        value_delimiter = ',',
        help = "Gossip peer addresses (e.g., 10.0.0.2:5000,10.0.0.3:5000)"
    )]
    pub gossip_peers: Vec<String>,

    // Dataset placements for the in-memory directory
    #[clap(
        long = "dataset",
        env("GOVNET_DATASETS"),
        value_delimiter = ',',
        value_parser = settings::parse_placement,
        help = "Dataset placement as id=host:port; repeatable"
    )]
    pub datasets: Vec<(String, crate::directory::NodeDescriptor)>,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            jwks_url: self.jwks_url,
            key_refresh_interval_secs: self.key_refresh_interval_seconds,
            max_signing_keys: self.max_signing_keys,
            verify_token_signatures: !self.skip_token_verification,
            node_scheme: self.node_scheme,
            fetch_timeout_secs: self.fetch_timeout_seconds,
            discovery_timeout_secs: self.discovery_timeout_seconds,
            discovery_deadline_secs: self.discovery_deadline_seconds,
            fanout_clamp_threshold: self.fanout_clamp_threshold,
            shutdown_grace_secs: self.shutdown_grace_seconds,
            handler_timeout_secs: self.handler_timeout_seconds,
            metadata_chunk_size: self.metadata_chunk_size,
            dataset_chunk_size: self.dataset_chunk_size,
            gossip_peers: self.gossip_peers,
            dataset_placements: self.datasets.into_iter().collect(),
            ..settings::Settings::default()
        }
    }
}
