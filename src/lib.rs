//! Live event feed for a name registry contract.
//!
//! [`FeedReconciler`] merges a one-off historical backfill with three live log subscriptions
//! (registrations, transfers, updates) into one deduplicated, newest-first, capacity-bounded
//! [`Feed`]. Names that only arrive as the hash of an indexed string are recovered from the
//! emitting transaction's call data by [`NameResolver`]; when that fails the hash is shown
//! instead. Source failures shrink the feed, they never surface as errors.

pub mod feed;
pub mod indexer;
pub mod metrics;
pub mod models;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use feed::{Feed, FeedEntry, FeedReconciler, FeedState};
pub use indexer::RpcEventSource;
pub use indexer::resolver::{NameResolver, looks_opaque};
pub use indexer::source::{EventSource, SubscriptionHandle};
pub use models::common::{Config, EventKind, FeedSettings};
pub use models::datasets::events::{DomainEvent, EventPayload, RawLog};
pub use models::errors::{DecodeError, SourceError};
