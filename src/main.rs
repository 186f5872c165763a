use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use govnet::api;
use govnet::auth::{key_cache, HttpKeySetSource};
use govnet::checkout::InMemoryCheckoutTracker;
use govnet::cli;
use govnet::directory::InMemoryDirectory;
use govnet::membership::StaticMembership;
use govnet::multicast::FairRecipientSelector;
use govnet::policy::InMemoryPolicyStore;
use govnet::routing::RoutingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "govnet=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    // Socket server listen address setup
    let listen_address: IpAddr = settings
        .listen_address
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid ip address '{}'", settings.listen_address))?;
    let socket_address = SocketAddr::from((listen_address, settings.listen_port));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Collaborators
    let directory = Arc::new(InMemoryDirectory::from_placements(
        settings.dataset_placements.clone(),
    ));
    let membership = Arc::new(StaticMembership::with_active_peers(
        settings.gossip_peers.iter().cloned(),
    ));
    let selector = Arc::new(FairRecipientSelector::new(
        membership,
        settings.selector_config(),
    ));

    let mut routing = RoutingService::new(
        directory,
        Arc::new(InMemoryPolicyStore::new()),
        Arc::new(InMemoryCheckoutTracker::new()),
        settings.routing_config(),
    )?;

    // Signing keys: the first fetch must succeed before we accept requests
    let refresher_handle = if settings.verify_token_signatures {
        let key_config = settings.key_cache_config();
        let source = Arc::new(HttpKeySetSource::new(&key_config)?);
        let (refresher, validator) = key_cache(source, key_config.refresh_interval);
        refresher
            .warm()
            .await
            .with_context(|| format!("Could not load signing keys from {}", key_config.jwks_url))?;
        routing = routing.with_validator(validator);
        Some(refresher.spawn(shutdown_rx.clone()))
    } else {
        warn!("Token signature verification is disabled");
        None
    };

    // Build Axum Router
    let state = api::AppState::new(routing, selector);
    let api = api::api(state, settings.handler_timeout());

    // Start server
    info!("Starting govnet on {}", socket_address);
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(
        axum::Server::bind(&socket_address)
            .serve(api.into_make_service())
            .with_graceful_shutdown(async move {
                while !*server_shutdown.borrow() {
                    if server_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            }),
    );

    shutdown_signal().await;
    info!(
        "Shutting down, draining requests for up to {}s",
        settings.shutdown_grace_secs
    );
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(settings.shutdown_grace(), server).await {
        Ok(Ok(Ok(()))) => info!("Server stopped"),
        Ok(Ok(Err(e))) => error!("Server error: {}", e),
        Ok(Err(e)) => error!("Server task failed: {}", e),
        Err(_) => warn!("Grace period elapsed with requests still in flight"),
    }
    if let Some(handle) = refresher_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
