pub mod reconciler;

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use crate::models::datasets::events::DomainEvent;

pub use reconciler::{FeedReconciler, scan_window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Uninitialized,
    Backfilling,
    Live,
}

/// A feed entry tagged with the merge that inserted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub generation: u64,
    pub event: DomainEvent,
}

impl FeedEntry {
    /// Feed order is descending on this key: later merges first, then higher ids.
    pub fn order_key(&self) -> (u64, &str) {
        (self.generation, self.event.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
}

/// Newest-first, id-unique, capacity-bounded list of events.
#[derive(Debug, Clone)]
pub struct Feed {
    entries: VecDeque<FeedEntry>,
    capacity: usize,
    generation: u64,
}

impl Feed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            generation: 0,
        }
    }

    /// Prepends every event whose id is not yet present, then evicts from the tail past
    /// capacity. Re-delivering events that are already in the feed is a no-op.
    pub fn merge(&mut self, new_events: Vec<DomainEvent>) -> MergeOutcome {
        let incoming = new_events.len();
        let mut seen: HashSet<String> = self.entries.iter().map(|e| e.event.id.clone()).collect();

        let mut fresh: Vec<DomainEvent> = new_events
            .into_iter()
            .filter(|event| seen.insert(event.id.clone()))
            .collect();

        let outcome = MergeOutcome {
            added: fresh.len(),
            duplicates: incoming - fresh.len(),
        };
        if fresh.is_empty() {
            return outcome;
        }

        fresh.sort_by(|a, b| newest_first(&a.id, &b.id));

        self.generation += 1;
        for event in fresh.into_iter().rev() {
            self.entries.push_front(FeedEntry {
                generation: self.generation,
                event,
            });
        }
        self.entries.truncate(self.capacity);

        outcome
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEvent> {
        self.entries.iter().map(|entry| &entry.event)
    }

    pub fn entries(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.event.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<DomainEvent> {
        self.iter().cloned().collect()
    }
}

/// Descending id order. Ids embed the transaction hash, so this only approximates chronology
/// across transactions.
pub fn newest_first(a: &str, b: &str) -> Ordering {
    b.cmp(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::EventKind;
    use crate::models::datasets::events::EventPayload;
    use alloy_primitives::Address;
    use chrono::Utc;

    fn event(id: &str) -> DomainEvent {
        DomainEvent {
            id: id.to_string(),
            kind: EventKind::Updated,
            payload: EventPayload::Updated {
                name: "alice".to_string(),
                new_address: Address::ZERO,
                new_image_hash: String::new(),
            },
            block_number: None,
            observed_at: Utc::now(),
        }
    }

    fn ids(feed: &Feed) -> Vec<&str> {
        feed.iter().map(|e| e.id.as_str()).collect()
    }

    fn assert_ordered(feed: &Feed) {
        let keys: Vec<_> = feed.entries().map(FeedEntry::order_key).collect();
        assert!(
            keys.windows(2).all(|pair| pair[0] >= pair[1]),
            "feed out of order: {keys:?}"
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut feed = Feed::new(50);
        feed.merge(vec![event("0xbb-0"), event("0xaa-1")]);
        let once = ids(&feed).join(",");

        let outcome = feed.merge(vec![event("0xaa-1")]);
        assert_eq!(outcome, MergeOutcome { added: 0, duplicates: 1 });
        assert_eq!(ids(&feed).join(","), once);
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_merge_dedupes_within_batch() {
        let mut feed = Feed::new(50);
        let outcome = feed.merge(vec![event("0xaa-0"), event("0xaa-0"), event("0xbb-0")]);

        assert_eq!(outcome, MergeOutcome { added: 2, duplicates: 1 });
        assert_eq!(ids(&feed), vec!["0xbb-0", "0xaa-0"]);
    }

    #[test]
    fn test_new_entries_go_in_front() {
        let mut feed = Feed::new(50);
        feed.merge(vec![event("0xcc-0"), event("0xbb-0")]);
        // Lower id than anything present, still newest because it arrived later
        feed.merge(vec![event("0x01-0"), event("0x02-0")]);

        assert_eq!(ids(&feed), vec!["0x02-0", "0x01-0", "0xcc-0", "0xbb-0"]);
        assert_ordered(&feed);
    }

    #[test]
    fn test_cap_evicts_oldest_entries() {
        let mut feed = Feed::new(50);
        for batch in 0..12 {
            let events = (0..7).map(|i| event(&format!("0x{batch:02x}-{i}"))).collect();
            feed.merge(events);
            assert!(feed.len() <= 50);
            assert_ordered(&feed);
        }

        assert_eq!(feed.len(), 50);
        // Batch 0 and most of batch 1 are gone, the latest batch is first
        assert_eq!(feed.iter().next().map(|e| e.id.as_str()), Some("0x0b-6"));
        assert!(!feed.contains("0x00-0"));
        assert!(feed.contains("0x05-3"));
    }

    #[test]
    fn test_empty_merge_does_not_bump_generation() {
        let mut feed = Feed::new(3);
        feed.merge(vec![event("0xaa-0")]);
        feed.merge(vec![]);
        feed.merge(vec![event("0xaa-0")]);

        let generations: Vec<_> = feed.entries().map(|e| e.generation).collect();
        assert_eq!(generations, vec![1]);
    }
}
