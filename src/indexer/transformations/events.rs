use chrono::Utc;
use futures::future::join_all;

use crate::indexer::resolver::NameResolver;
use crate::indexer::source::EventSource;
use crate::models::datasets::events::{DomainEvent, RawLog};

/// Turns raw registry logs into feed records, resolving hashed names on the way.
pub struct EventNormalizer<S: ?Sized> {
    resolver: NameResolver<S>,
}

impl<S> EventNormalizer<S>
where
    S: EventSource + ?Sized,
{
    pub fn new(resolver: NameResolver<S>) -> Self {
        Self { resolver }
    }

    pub async fn normalize(&self, log: RawLog) -> DomainEvent {
        let id = log.event_id();
        let kind = log.kind();
        let name = self
            .resolver
            .resolve(log.args.name(), log.transaction_hash)
            .await;

        DomainEvent {
            id,
            kind,
            payload: log.args.with_name(name),
            block_number: log.block_number,
            observed_at: Utc::now(),
        }
    }

    /// Normalizes a batch concurrently; output order matches input order.
    pub async fn normalize_batch(&self, logs: Vec<RawLog>) -> Vec<DomainEvent> {
        join_all(logs.into_iter().map(|log| self.normalize(log))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::contract::INameRegistry::transferNameCall;
    use crate::models::common::EventKind;
    use crate::models::datasets::events::EventPayload;
    use crate::test_utils::{MockSource, registered_log, transferred_log, tx_hash, updated_log};
    use alloy_primitives::{Address, Bytes, keccak256};
    use alloy_sol_types::SolCall;
    use std::sync::Arc;

    fn normalizer(source: Arc<MockSource>) -> EventNormalizer<MockSource> {
        EventNormalizer::new(NameResolver::new(source, None))
    }

    #[tokio::test]
    async fn test_normalize_builds_id_and_payload() {
        let source = Arc::new(MockSource::new(0));
        let before = Utc::now();

        let event = normalizer(source)
            .normalize(registered_log(tx_hash(0xaa), 4, "alice"))
            .await;

        assert_eq!(event.id, format!("0x{}-4", "aa".repeat(32)));
        assert_eq!(event.kind, EventKind::Registered);
        assert_eq!(event.block_number, Some(1));
        assert_eq!(
            event.payload,
            EventPayload::Registered {
                name: "alice".to_string(),
                owner: Address::repeat_byte(0x11),
                image_hash: "QmImage".to_string(),
            }
        );
        assert!(event.observed_at >= before);
    }

    #[tokio::test]
    async fn test_normalize_batch_resolves_hashed_names_in_order() {
        let hashed = keccak256("alice").to_string();
        let source = Arc::new(MockSource::new(0));
        source.set_transaction_input(
            tx_hash(0x02),
            Bytes::from(
                transferNameCall {
                    name: "alice".into(),
                    newOwner: Address::repeat_byte(0x22),
                }
                .abi_encode(),
            ),
        );

        let events = normalizer(source.clone())
            .normalize_batch(vec![
                registered_log(tx_hash(0x01), 0, "bob"),
                transferred_log(tx_hash(0x02), 1, &hashed),
                updated_log(tx_hash(0x03), 2, &hashed),
            ])
            .await;

        let names: Vec<_> = events.iter().map(|e| e.payload.name()).collect();
        // The third lookup misses, so its hash is kept
        assert_eq!(names, vec!["bob", "alice", hashed.as_str()]);
        assert_eq!(source.transaction_lookups(), 2);
    }
}
