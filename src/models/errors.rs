use alloy_primitives::{hex, B256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Ledger source unavailable during {context}: {reason}")]
    Unavailable { context: String, reason: String },
    #[error("Transaction not found: {0}")]
    TransactionNotFound(B256),
}

impl SourceError {
    pub fn unavailable(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Call data does not match a known registry function (selector 0x{})", hex::encode(.0))]
    UnknownFunction([u8; 4]),
    #[error("Malformed call data: {0}")]
    Malformed(String),
    #[error("Transaction lookup failed: {0}")]
    Lookup(#[from] SourceError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("Missing required field in log: {field}")]
    MissingField { field: String },
    #[error("Log was removed by a reorg")]
    Removed,
    #[error("Log does not decode as {event}: {reason}")]
    Undecodable { event: &'static str, reason: String },
}
