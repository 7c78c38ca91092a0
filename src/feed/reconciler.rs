use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::feed::{Feed, FeedState, MergeOutcome, newest_first};
use crate::indexer::resolver::NameResolver;
use crate::indexer::source::{EventSource, LIVE_BATCH_BUFFER, LogBatch, SubscriptionHandle};
use crate::indexer::transformations::events::EventNormalizer;
use crate::metrics::Metrics;
use crate::models::common::{EventKind, FeedSettings};
use crate::models::datasets::events::DomainEvent;

/// Inclusive block range covering the last `window` blocks up to `height`, clamped at genesis.
pub fn scan_window(height: u64, window: u64) -> (u64, u64) {
    (height.saturating_sub(window), height)
}

struct LiveSubscription {
    handle: SubscriptionHandle,
    consumer: JoinHandle<()>,
}

impl LiveSubscription {
    fn stop(self) {
        drop(self);
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.handle.stop();
        self.consumer.abort();
    }
}

/// Owns the feed and keeps it current from one historical backfill plus three live
/// subscriptions.
///
/// Live consumers only hold a weak reference; dropping the last [`Arc`] stops the
/// subscriptions as well.
pub struct FeedReconciler<S: ?Sized> {
    source: Arc<S>,
    normalizer: EventNormalizer<S>,
    settings: FeedSettings,
    feed: watch::Sender<Feed>,
    state: watch::Sender<FeedState>,
    cancelled: AtomicBool,
    live: Mutex<Vec<LiveSubscription>>,
    metrics: Option<Arc<Metrics>>,
}

impl<S> FeedReconciler<S>
where
    S: EventSource + ?Sized + 'static,
{
    pub fn new(
        source: Arc<S>,
        settings: FeedSettings,
        metrics: Option<Arc<Metrics>>,
    ) -> Arc<Self> {
        let resolver = NameResolver::new(Arc::clone(&source), metrics.clone());
        Arc::new(Self {
            source,
            normalizer: EventNormalizer::new(resolver),
            settings,
            feed: watch::channel(Feed::new(settings.capacity)).0,
            state: watch::channel(FeedState::Uninitialized).0,
            cancelled: AtomicBool::new(false),
            live: Mutex::new(Vec::new()),
            metrics,
        })
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    /// Continuously updated, read-only view of the feed.
    pub fn watch(&self) -> watch::Receiver<Feed> {
        self.feed.subscribe()
    }

    pub fn snapshot(&self) -> Vec<DomainEvent> {
        self.feed.borrow().to_vec()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Runs the historical backfill and starts the live subscriptions side by side.
    /// Only the first call does anything. Failures are logged and absorbed.
    pub async fn activate(self: &Arc<Self>) {
        let started = self.state.send_if_modified(|state| {
            if *state == FeedState::Uninitialized {
                *state = FeedState::Backfilling;
                true
            } else {
                false
            }
        });
        if !started {
            warn!("Feed already activated (state {:?}), ignoring", self.state());
            return;
        }

        // Publishing the backfill must not wait on subscriptions that are slow to open
        tokio::join!(self.start_live_subscriptions(), async {
            let historical = self.backfill().await;
            self.publish_backfill(historical);
        });
    }

    pub async fn on_live_batch(&self, kind: EventKind, raw_logs: LogBatch) {
        if self.is_cancelled() {
            return;
        }
        debug!("Live {} batch of {} logs", kind, raw_logs.len());

        let events = self.normalizer.normalize_batch(raw_logs).await;
        if self.is_cancelled() {
            return;
        }
        self.merge_from("live", events);
    }

    /// The only mutation of the feed. Returns how many events were added; nothing is added
    /// once the reconciler has been torn down.
    pub fn merge(&self, new_events: Vec<DomainEvent>) -> usize {
        self.merge_from("direct", new_events).unwrap_or(0)
    }

    /// Stops all live subscriptions and makes any in-flight backfill discard its result.
    pub fn teardown(&self) {
        // Set under the feed's write lock so no merge is half-way through once this returns
        let mut already_cancelled = false;
        self.feed.send_if_modified(|_| {
            already_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
            false
        });
        if already_cancelled {
            return;
        }

        let live = std::mem::take(&mut *self.live());
        let count = live.len();
        for subscription in live {
            subscription.stop();
        }
        info!("Feed torn down, stopped {} live subscriptions", count);
    }

    fn publish_backfill(&self, historical: Vec<DomainEvent>) {
        let count = historical.len();
        match self.merge_from("historical", historical) {
            Some(added) => {
                self.state.send_replace(FeedState::Live);
                info!("Backfill complete: {} events added, feed is live", added);
            }
            None => info!(
                "Feed torn down during backfill, discarding {} historical events",
                count
            ),
        }
    }

    /// Returns `None` without touching the feed when torn down.
    fn merge_from(&self, origin: &'static str, new_events: Vec<DomainEvent>) -> Option<usize> {
        let mut outcome = None;
        let mut feed_len = 0;
        // The flag is read under the channel's write lock, so a merge either completes before
        // teardown or is dropped entirely
        self.feed.send_if_modified(|feed| {
            if self.is_cancelled() {
                return false;
            }
            let merged = feed.merge(new_events);
            feed_len = feed.len();
            outcome = Some(merged);
            merged.added > 0
        });
        let outcome: MergeOutcome = outcome?;

        if outcome.duplicates > 0 {
            debug!("Skipped {} already-present {} events", outcome.duplicates, origin);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_merge(origin, outcome.added, outcome.duplicates, feed_len);
        }
        Some(outcome.added)
    }

    async fn backfill(&self) -> Vec<DomainEvent> {
        let started = Instant::now();

        let height = match self.source.current_block_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!("Skipping backfill, could not read block height: {}", e);
                return Vec::new();
            }
        };
        let (from_block, to_block) = scan_window(height, self.settings.scan_window_blocks);
        info!("Backfilling blocks {}..={}", from_block, to_block);

        let per_kind = join_all(
            EventKind::ALL.map(|kind| self.backfill_kind(kind, from_block, to_block)),
        )
        .await;

        let mut events: Vec<DomainEvent> = per_kind.into_iter().flatten().collect();
        events.sort_by(|a, b| newest_first(&a.id, &b.id));

        if let Some(metrics) = &self.metrics {
            metrics.record_backfill(height, started.elapsed());
        }
        events
    }

    async fn backfill_kind(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Vec<DomainEvent> {
        match self.source.fetch_historical(kind, from_block, to_block).await {
            Ok(logs) => {
                debug!("Fetched {} historical {} logs", logs.len(), kind);
                self.normalizer.normalize_batch(logs).await
            }
            Err(e) => {
                warn!("No historical {} events: {}", kind, e);
                Vec::new()
            }
        }
    }

    async fn start_live_subscriptions(self: &Arc<Self>) {
        join_all(EventKind::ALL.map(|kind| self.start_live(kind))).await;
    }

    async fn start_live(self: &Arc<Self>, kind: EventKind) {
        let (sink, mut batches) = mpsc::channel(LIVE_BATCH_BUFFER);
        let handle = match self.source.subscribe(kind, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("No live {} events: {}", kind, e);
                return;
            }
        };

        let this = Arc::downgrade(self);
        let consumer = tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let Some(reconciler) = this.upgrade() else {
                    break;
                };
                reconciler.on_live_batch(kind, batch).await;
            }
        });
        let subscription = LiveSubscription { handle, consumer };

        // Checked under the lock teardown drains, so a late subscription is never leaked
        let mut live = self.live();
        if self.is_cancelled() {
            subscription.stop();
        } else {
            info!("Live {} subscription started", kind);
            live.push(subscription);
        }
    }

    fn live(&self) -> MutexGuard<'_, Vec<LiveSubscription>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasets::events::EventPayload;
    use crate::test_utils::{MockSource, registered_log, tx_hash};
    use alloy_primitives::Address;
    use chrono::Utc;
    use std::time::Duration;

    fn event(id: &str) -> DomainEvent {
        DomainEvent {
            id: id.to_string(),
            kind: EventKind::Registered,
            payload: EventPayload::Registered {
                name: "alice".to_string(),
                owner: Address::ZERO,
                image_hash: String::new(),
            },
            block_number: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_scan_window_is_clamped_at_genesis() {
        assert_eq!(scan_window(100_000, 50_000), (50_000, 100_000));
        assert_eq!(scan_window(10_000, 50_000), (0, 10_000));
        assert_eq!(scan_window(50_000, 50_000), (0, 50_000));
        assert_eq!(scan_window(0, 50_000), (0, 0));
    }

    #[tokio::test]
    async fn test_merges_after_teardown_are_dropped() {
        let source = Arc::new(MockSource::new(1_000));
        let reconciler = FeedReconciler::new(source, FeedSettings::default(), None);

        assert_eq!(reconciler.merge(vec![event("0xaa-0")]), 1);
        reconciler.teardown();

        assert_eq!(reconciler.merge(vec![event("0xbb-0")]), 0);
        reconciler
            .on_live_batch(EventKind::Registered, vec![registered_log(tx_hash(0xcc), 0, "bob")])
            .await;
        reconciler.publish_backfill(vec![event("0xdd-0")]);

        let ids: Vec<_> = reconciler.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["0xaa-0"]);
        assert_eq!(reconciler.state(), FeedState::Uninitialized);
    }

    #[tokio::test]
    async fn test_dropping_reconciler_releases_it_and_stops_subscriptions() {
        let source = Arc::new(MockSource::new(1_000));
        let reconciler = FeedReconciler::new(Arc::clone(&source), FeedSettings::default(), None);
        reconciler.activate().await;
        assert!(source.has_running_subscriptions());

        let weak = Arc::downgrade(&reconciler);
        drop(reconciler);
        assert!(weak.upgrade().is_none());

        for _ in 0..100 {
            if !source.has_running_subscriptions() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!source.has_running_subscriptions());
    }
}
