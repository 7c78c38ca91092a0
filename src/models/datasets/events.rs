use std::fmt;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::models::common::EventKind;
use crate::utils::truncate_addr;

/// Kind-specific event arguments. The same shape is used before and after name resolution;
/// on a raw log `name` may still be the hex form of the indexed topic hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)] // `kind` already sits next to the payload
pub enum EventPayload {
    Registered {
        name: String,
        owner: Address,
        image_hash: String,
    },
    Transferred {
        name: String,
        old_owner: Address,
        new_owner: Address,
    },
    Updated {
        name: String,
        new_address: Address,
        new_image_hash: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Registered { .. } => EventKind::Registered,
            EventPayload::Transferred { .. } => EventKind::Transferred,
            EventPayload::Updated { .. } => EventKind::Updated,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EventPayload::Registered { name, .. }
            | EventPayload::Transferred { name, .. }
            | EventPayload::Updated { name, .. } => name,
        }
    }

    pub fn with_name(mut self, resolved: String) -> Self {
        match &mut self {
            EventPayload::Registered { name, .. }
            | EventPayload::Transferred { name, .. }
            | EventPayload::Updated { name, .. } => *name = resolved,
        }
        self
    }
}

////////////////////////////////////// RPC Data ////////////////////////////////////////
/// One decoded registry log as delivered by an event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: Option<u64>,
    pub args: EventPayload,
}

impl RawLog {
    pub fn kind(&self) -> EventKind {
        self.args.kind()
    }

    /// Deduplication key: `{tx_hash}-{log_index}`.
    pub fn event_id(&self) -> String {
        format!("{}-{}", self.transaction_hash, self.log_index)
    }
}

/////////////////////////////////// Transformed Data ///////////////////////////////////
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEvent {
    pub id: String,
    pub kind: EventKind,
    pub payload: EventPayload,
    pub block_number: Option<u64>,
    /// Ingestion time, display only.
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::Registered { name, owner, .. } => {
                write!(f, "Registered {} by {}", name, truncate_addr(&owner.to_string(), 6))?
            }
            EventPayload::Transferred {
                name, new_owner, ..
            } => write!(
                f,
                "Transferred {} to {}",
                name,
                truncate_addr(&new_owner.to_string(), 6)
            )?,
            EventPayload::Updated {
                name, new_address, ..
            } => write!(
                f,
                "Updated {} -> {}",
                name,
                truncate_addr(&new_address.to_string(), 6)
            )?,
        }
        write!(
            f,
            " ({})",
            self.observed_at.with_timezone(&Local).format("%H:%M:%S")
        )
    }
}
