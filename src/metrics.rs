use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub chain_name: String,

    // Feed metrics
    pub events_ingested: Counter<u64>,
    pub duplicates_skipped: Counter<u64>,
    pub feed_size: Gauge<u64>,
    pub backfill_duration: Gauge<f64>,

    // Chain metrics
    pub chain_tip_block: Gauge<u64>,

    // Name resolution metrics
    pub names_resolved: Counter<u64>,
    pub name_resolution_failures: Counter<u64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new(chain_name: String) -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("feed_metrics");

        let events_ingested = meter
            .u64_counter("feed_events_ingested")
            .with_description("Events added to the feed")
            .build();

        let duplicates_skipped = meter
            .u64_counter("feed_duplicates_skipped")
            .with_description("Events dropped by merge because their id was already present")
            .build();

        let feed_size = meter
            .u64_gauge("feed_size")
            .with_description("Current number of entries in the feed")
            .build();

        let backfill_duration = meter
            .f64_gauge("feed_backfill_duration")
            .with_description("Time spent on the historical backfill")
            .with_unit("s")
            .build();

        let chain_tip_block = meter
            .u64_gauge("feed_chain_tip_block")
            .with_description("Block height observed when the backfill window was computed")
            .build();

        let names_resolved = meter
            .u64_counter("feed_names_resolved")
            .with_description("Hashed names recovered from transaction call data")
            .build();

        let name_resolution_failures = meter
            .u64_counter("feed_name_resolution_failures")
            .with_description("Hashed names left unresolved")
            .build();

        let rpc_requests = meter
            .u64_counter("feed_rpc_requests")
            .with_description("Number of RPC requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("feed_rpc_errors")
            .with_description("Number of RPC errors encountered")
            .build();

        let rpc_latency = meter
            .f64_histogram("feed_rpc_latency")
            .with_description("RPC request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            chain_name,
            events_ingested,
            duplicates_skipped,
            feed_size,
            backfill_duration,
            chain_tip_block,
            names_resolved,
            name_resolution_failures,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    fn chain_label(&self) -> KeyValue {
        KeyValue::new("chain", self.chain_name.clone())
    }

    pub fn record_rpc(&self, method: &'static str, elapsed: Duration, is_error: bool) {
        let labels = [self.chain_label(), KeyValue::new("method", method)];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency.record(elapsed.as_secs_f64(), &labels);
        if is_error {
            self.rpc_errors.add(1, &labels);
        }
    }

    pub fn record_merge(
        &self,
        origin: &'static str,
        added: usize,
        skipped: usize,
        feed_len: usize,
    ) {
        let labels = [self.chain_label(), KeyValue::new("origin", origin)];
        self.events_ingested.add(added as u64, &labels);
        self.duplicates_skipped.add(skipped as u64, &labels);
        self.feed_size.record(feed_len as u64, &[self.chain_label()]);
    }

    pub fn record_resolution(&self, resolved: bool) {
        if resolved {
            self.names_resolved.add(1, &[self.chain_label()]);
        } else {
            self.name_resolution_failures.add(1, &[self.chain_label()]);
        }
    }

    pub fn record_backfill(&self, chain_tip: u64, elapsed: Duration) {
        self.chain_tip_block.record(chain_tip, &[self.chain_label()]);
        self.backfill_duration
            .record(elapsed.as_secs_f64(), &[self.chain_label()]);
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {addr}"))?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
