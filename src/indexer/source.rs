use alloy_primitives::{B256, Bytes};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::common::EventKind;
use crate::models::datasets::events::RawLog;
use crate::models::errors::SourceError;

/// Buffer between a live subscription and whoever drains it.
pub const LIVE_BATCH_BUFFER: usize = 1024;

pub type LogBatch = Vec<RawLog>;

/// Read-only access to the registry's logs on the ledger.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Every log of `kind` emitted in `[from_block, to_block]`, in no particular order.
    async fn fetch_historical(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, SourceError>;

    /// Starts pushing newly confirmed batches of `kind` into `sink` until the returned
    /// handle is stopped or dropped.
    async fn subscribe(
        &self,
        kind: EventKind,
        sink: mpsc::Sender<LogBatch>,
    ) -> Result<SubscriptionHandle, SourceError>;

    /// Raw call data of the transaction that emitted a log.
    async fn fetch_transaction_input(&self, tx_hash: B256) -> Result<Bytes, SourceError>;

    async fn current_block_height(&self) -> Result<u64, SourceError>;
}

/// Owns the task feeding one live subscription. Aborts it on `stop` or drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    kind: EventKind,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn new(kind: EventKind, task: JoinHandle<()>) -> Self {
        Self { kind, task }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
