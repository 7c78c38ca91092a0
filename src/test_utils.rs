//! In-memory [`EventSource`] for exercising the resolver and reconciler without a node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::indexer::source::{EventSource, LogBatch, SubscriptionHandle};
use crate::models::common::EventKind;
use crate::models::datasets::events::{EventPayload, RawLog};
use crate::models::errors::SourceError;

#[derive(Default)]
struct MockState {
    height: Option<u64>,
    historical: HashMap<EventKind, Result<Vec<RawLog>, SourceError>>,
    transactions: HashMap<B256, Result<Bytes, SourceError>>,
    sinks: HashMap<EventKind, mpsc::Sender<LogBatch>>,
    subscription_tasks: Vec<AbortHandle>,
    failing_subscriptions: Vec<EventKind>,
    stalled_subscriptions: bool,
    requested_windows: Vec<(EventKind, u64, u64)>,
}

pub struct MockSource {
    state: Mutex<MockState>,
    lookups: AtomicUsize,
    // Historical fetches wait here until the gate is opened
    gate: watch::Sender<bool>,
}

impl MockSource {
    pub fn new(height: u64) -> Self {
        Self {
            state: Mutex::new(MockState {
                height: Some(height),
                ..Default::default()
            }),
            lookups: AtomicUsize::new(0),
            gate: watch::channel(true).0,
        }
    }

    /// A source whose every call fails.
    pub fn unreachable() -> Self {
        let source = Self::new(0);
        {
            let mut state = source.state();
            state.height = None;
            for kind in EventKind::ALL {
                state.historical.insert(kind, Err(unreachable_error("get_logs")));
                state.failing_subscriptions.push(kind);
            }
        }
        source
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_historical(&self, kind: EventKind, logs: Vec<RawLog>) {
        self.state().historical.insert(kind, Ok(logs));
    }

    pub fn fail_historical(&self, kind: EventKind) {
        self.state()
            .historical
            .insert(kind, Err(unreachable_error("get_logs")));
    }

    pub fn set_transaction_input(&self, tx_hash: B256, input: Bytes) {
        self.state().transactions.insert(tx_hash, Ok(input));
    }

    pub fn fail_transaction(&self, tx_hash: B256, error: SourceError) {
        self.state().transactions.insert(tx_hash, Err(error));
    }

    /// Makes every later `subscribe` call hang forever.
    pub fn stall_subscriptions(&self) {
        self.state().stalled_subscriptions = true;
    }

    /// Holds every historical fetch until [`MockSource::open_gate`] is called.
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn transaction_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn requested_windows(&self) -> Vec<(EventKind, u64, u64)> {
        self.state().requested_windows.clone()
    }

    pub fn subscribed_kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<_> = self.state().sinks.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.event_name());
        kinds
    }

    /// True while any subscription task handed out by this source is still running.
    pub fn has_running_subscriptions(&self) -> bool {
        self.state()
            .subscription_tasks
            .iter()
            .any(|task| !task.is_finished())
    }

    /// Delivers a live batch. Returns false once the consumer side is gone.
    pub async fn push_live(&self, kind: EventKind, batch: LogBatch) -> bool {
        let sink = self.state().sinks.get(&kind).cloned();
        match sink {
            Some(sink) => sink.send(batch).await.is_ok(),
            None => false,
        }
    }
}

fn unreachable_error(context: &str) -> SourceError {
    SourceError::unavailable(context, "connection refused")
}

#[async_trait]
impl EventSource for MockSource {
    async fn fetch_historical(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, SourceError> {
        self.state()
            .requested_windows
            .push((kind, from_block, to_block));

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.state()
            .historical
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        sink: mpsc::Sender<LogBatch>,
    ) -> Result<SubscriptionHandle, SourceError> {
        let stalled = self.state().stalled_subscriptions;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();
        if state.failing_subscriptions.contains(&kind) {
            return Err(unreachable_error("subscribe_logs"));
        }
        state.sinks.insert(kind, sink);

        let task = tokio::spawn(std::future::pending::<()>());
        state.subscription_tasks.push(task.abort_handle());
        Ok(SubscriptionHandle::new(kind, task))
    }

    async fn fetch_transaction_input(&self, tx_hash: B256) -> Result<Bytes, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.state()
            .transactions
            .get(&tx_hash)
            .cloned()
            .unwrap_or(Err(SourceError::TransactionNotFound(tx_hash)))
    }

    async fn current_block_height(&self) -> Result<u64, SourceError> {
        self.state()
            .height
            .ok_or_else(|| unreachable_error("get_block_number"))
    }
}

pub fn tx_hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}

pub fn registered_log(tx_hash: B256, log_index: u64, name: &str) -> RawLog {
    RawLog {
        transaction_hash: tx_hash,
        log_index,
        block_number: Some(1),
        args: EventPayload::Registered {
            name: name.to_string(),
            owner: Address::repeat_byte(0x11),
            image_hash: "QmImage".to_string(),
        },
    }
}

pub fn transferred_log(tx_hash: B256, log_index: u64, name: &str) -> RawLog {
    RawLog {
        transaction_hash: tx_hash,
        log_index,
        block_number: Some(1),
        args: EventPayload::Transferred {
            name: name.to_string(),
            old_owner: Address::repeat_byte(0x11),
            new_owner: Address::repeat_byte(0x22),
        },
    }
}

pub fn updated_log(tx_hash: B256, log_index: u64, name: &str) -> RawLog {
    RawLog {
        transaction_hash: tx_hash,
        log_index,
        block_number: Some(1),
        args: EventPayload::Updated {
            name: name.to_string(),
            new_address: Address::repeat_byte(0x33),
            new_image_hash: "QmOther".to_string(),
        },
    }
}
