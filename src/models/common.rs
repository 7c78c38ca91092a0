use std::fmt;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCAN_WINDOW_BLOCKS: u64 = 50_000;
pub const DEFAULT_FEED_CAPACITY: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain_name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_address: Address,
    #[serde(default = "default_scan_window")]
    pub scan_window_blocks: u64,
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_scan_window() -> u64 {
    DEFAULT_SCAN_WINDOW_BLOCKS
}

fn default_feed_capacity() -> usize {
    DEFAULT_FEED_CAPACITY
}

/// Settings the reconciler needs, split out of [`Config`] so tests can build one directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub scan_window_blocks: u64,
    pub capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            scan_window_blocks: DEFAULT_SCAN_WINDOW_BLOCKS,
            capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl From<&Config> for FeedSettings {
    fn from(config: &Config) -> Self {
        Self {
            scan_window_blocks: config.scan_window_blocks,
            capacity: config.feed_capacity,
        }
    }
}

/// The three events emitted by the registry contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Registered,
    Transferred,
    Updated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::Registered,
        EventKind::Transferred,
        EventKind::Updated,
    ];

    /// Solidity event name, used for log filters and metric labels.
    pub fn event_name(self) -> &'static str {
        match self {
            EventKind::Registered => "NameRegistered",
            EventKind::Transferred => "NameTransferred",
            EventKind::Updated => "NameUpdated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}
