pub mod contract;
pub mod resolver;
pub mod rpc;
pub mod source;
pub mod transformations;

use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use alloy_consensus::Transaction as _;
use alloy_primitives::{Address, B256, Bytes};
use alloy_provider::Provider;
use alloy_pubsub::Subscription;
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::indexer::contract::signature_hash;
use crate::indexer::rpc::logs::LogParser;
use crate::indexer::source::{EventSource, LogBatch, SubscriptionHandle};
use crate::metrics::Metrics;
use crate::models::common::EventKind;
use crate::models::datasets::events::RawLog;
use crate::models::errors::SourceError;
use crate::utils::retry::{Backoff, RetryConfig, retry};
use crate::utils::strip_html;

/// Most logs handed to a live sink in a single batch.
const MAX_LIVE_BATCH: usize = 64;

/// [`EventSource`] backed by an alloy provider. Live subscriptions need a pubsub (ws) transport.
#[derive(Clone)]
pub struct RpcEventSource<P> {
    provider: P,
    contract: Address,
    retry_config: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<P> RpcEventSource<P>
where
    P: Provider + Clone + 'static,
{
    pub fn new(
        provider: P,
        contract: Address,
        retry_config: RetryConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            provider,
            contract,
            retry_config,
            metrics,
        }
    }

    fn filter(&self, kind: EventKind) -> Filter {
        Filter::new()
            .address(self.contract)
            .event_signature(signature_hash(kind))
    }

    fn record_rpc(&self, method: &'static str, start: Instant, is_error: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, start.elapsed(), is_error);
        }
    }

    async fn try_subscribe(&self, filter: &Filter) -> Result<Subscription<Log>, SourceError> {
        let start = Instant::now();
        let result = self.provider.subscribe_logs(filter).await;
        self.record_rpc("subscribe_logs", start, result.is_err());
        result.map_err(|e| unavailable("subscribe_logs", e))
    }

    async fn open_subscription(
        &self,
        filter: &Filter,
        kind: EventKind,
    ) -> Result<Subscription<Log>, SourceError> {
        retry(
            || self.try_subscribe(filter),
            &self.retry_config,
            &format!("subscribe_logs({kind})"),
        )
        .await
    }

    /// Keeps trying to resubscribe with backoff. Gives up only once the consumer is gone.
    async fn reopen_subscription(
        &self,
        filter: &Filter,
        kind: EventKind,
        sink: &mpsc::Sender<LogBatch>,
    ) -> Option<Subscription<Log>> {
        let mut backoff = Backoff::new(&self.retry_config);
        while !sink.is_closed() {
            match self.try_subscribe(filter).await {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        "Could not resubscribe to {} logs: {}. Retrying in {}ms",
                        kind,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
            }
        }
        None
    }
}

fn unavailable(context: &str, e: impl ToString) -> SourceError {
    SourceError::unavailable(context, strip_html(&e.to_string()))
}

#[async_trait]
impl<P> EventSource for RpcEventSource<P>
where
    P: Provider + Clone + 'static,
{
    async fn fetch_historical(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, SourceError> {
        let filter = self.filter(kind).from_block(from_block).to_block(to_block);

        let start = Instant::now();
        let result = self.provider.get_logs(&filter).await;
        self.record_rpc("get_logs", start, result.is_err());

        let logs = result.map_err(|e| {
            warn!(
                "Failed to get {} logs for blocks {}..={}. Error details:\n{:#?}",
                kind, from_block, to_block, e
            );
            unavailable("get_logs", e)
        })?;

        Ok(logs.parse_registry_logs(kind))
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        sink: mpsc::Sender<LogBatch>,
    ) -> Result<SubscriptionHandle, SourceError> {
        let filter = self.filter(kind);
        let source = self.clone();

        // Establish the first subscription up front so the caller learns about a dead endpoint
        let mut subscription = source.open_subscription(&filter, kind).await?;

        let task = tokio::spawn(async move {
            loop {
                let mut batches = pin!(subscription.into_stream().ready_chunks(MAX_LIVE_BATCH));
                while let Some(logs) = batches.next().await {
                    let batch = logs.parse_registry_logs(kind);
                    if batch.is_empty() {
                        continue;
                    }
                    if sink.send(batch).await.is_err() {
                        info!("Live {} consumer went away, closing subscription", kind);
                        return;
                    }
                }

                warn!("Live {} subscription ended, resubscribing", kind);
                subscription = match source.reopen_subscription(&filter, kind, &sink).await {
                    Some(subscription) => subscription,
                    None => {
                        info!("Live {} consumer went away, closing subscription", kind);
                        return;
                    }
                };
            }
        });

        Ok(SubscriptionHandle::new(kind, task))
    }

    async fn fetch_transaction_input(&self, tx_hash: B256) -> Result<Bytes, SourceError> {
        let start = Instant::now();
        let result = self.provider.get_transaction_by_hash(tx_hash).await;
        self.record_rpc("get_transaction_by_hash", start, result.is_err());

        let transaction = result
            .map_err(|e| unavailable("get_transaction_by_hash", e))?
            .ok_or(SourceError::TransactionNotFound(tx_hash))?;

        Ok(transaction.input().clone())
    }

    async fn current_block_height(&self) -> Result<u64, SourceError> {
        retry(
            || async {
                let start = Instant::now();
                let result = self.provider.get_block_number().await;
                self.record_rpc("get_block_number", start, result.is_err());
                result.map_err(|e| unavailable("get_block_number", e))
            },
            &self.retry_config,
            "get_block_number",
        )
        .await
    }
}
