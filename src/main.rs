use std::sync::Arc;

use alloy_provider::{ProviderBuilder, WsConnect};
use anyhow::{Context, Result, anyhow};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use name_registry_feed::metrics::Metrics;
use name_registry_feed::utils::load_config;
use name_registry_feed::utils::retry::RetryConfig;
use name_registry_feed::{Feed, FeedReconciler, FeedSettings, RpcEventSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config = match load_config("config.yml") {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Metrics::new(config.chain_name.clone())?;
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(Arc::new(metrics))
    } else {
        info!("Metrics are disabled");
        None
    };

    // Create RPC provider
    info!("RPC URL: {:?}", config.rpc_url);
    let provider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(config.rpc_url.clone()))
        .await
        .context("failed to connect to websocket RPC")?;

    let source = Arc::new(RpcEventSource::new(
        provider,
        config.contract_address,
        RetryConfig::from(config.retry.clone()),
        metrics.clone(),
    ));
    let reconciler = FeedReconciler::new(source, FeedSettings::from(&config), metrics);

    println!();
    info!(
        "===================== STARTING FEED ({} / {}) =====================",
        config.chain_name, config.chain_id
    );
    info!("Contract: {}", config.contract_address);

    let activation = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.activate().await })
    };

    let mut feed = reconciler.watch();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal, initiating shutdown...");
                break;
            }
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&feed.borrow_and_update());
            }
        }
    }

    reconciler.teardown();
    if !activation.is_finished() {
        activation.abort();
    }
    info!("Shut down cleanly");
    Ok(())
}

fn render(feed: &Feed) {
    info!("-------------------- Feed ({} events) --------------------", feed.len());
    for event in feed.iter() {
        info!("{}", event);
    }
}
