use alloy_rpc_types_eth::Log;
use alloy_sol_types::SolEvent;
use tracing::warn;

use crate::indexer::contract::INameRegistry::{NameRegistered, NameTransferred, NameUpdated};
use crate::models::common::EventKind;
use crate::models::datasets::events::{EventPayload, RawLog};
use crate::models::errors::LogError;

pub trait LogParser {
    /// Decodes registry logs of one kind. Logs that are pending, removed or undecodable are
    /// skipped with a warning.
    fn parse_registry_logs(self, kind: EventKind) -> Vec<RawLog>;
}

impl LogParser for Vec<Log> {
    fn parse_registry_logs(self, kind: EventKind) -> Vec<RawLog> {
        self.iter()
            .filter_map(|log| match parse_log(log, kind) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(
                        "Skipping {} log (tx {:?}, index {:?}): {}",
                        kind, log.transaction_hash, log.log_index, e
                    );
                    None
                }
            })
            .collect()
    }
}

pub fn parse_log(log: &Log, kind: EventKind) -> Result<RawLog, LogError> {
    if log.removed {
        return Err(LogError::Removed);
    }

    let transaction_hash = log.transaction_hash.ok_or_else(|| LogError::MissingField {
        field: "transactionHash".to_string(),
    })?;
    let log_index = log.log_index.ok_or_else(|| LogError::MissingField {
        field: "logIndex".to_string(),
    })?;

    let undecodable = |e: alloy_sol_types::Error| LogError::Undecodable {
        event: kind.event_name(),
        reason: e.to_string(),
    };

    // Indexed strings arrive as their topic hash; keep the hex form until it's resolved
    let args = match kind {
        EventKind::Registered => {
            let event = NameRegistered::decode_log_data(log.data()).map_err(undecodable)?;
            EventPayload::Registered {
                name: event.name.to_string(),
                owner: event.owner,
                image_hash: event.imageHash,
            }
        }
        EventKind::Transferred => {
            let event = NameTransferred::decode_log_data(log.data()).map_err(undecodable)?;
            EventPayload::Transferred {
                name: event.name.to_string(),
                old_owner: event.oldOwner,
                new_owner: event.newOwner,
            }
        }
        EventKind::Updated => {
            let event = NameUpdated::decode_log_data(log.data()).map_err(undecodable)?;
            EventPayload::Updated {
                name: event.name.to_string(),
                new_address: event.newAddress,
                new_image_hash: event.newImageHash,
            }
        }
    };

    Ok(RawLog {
        transaction_hash,
        log_index,
        block_number: log.block_number,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, LogData, keccak256};

    fn registered_log(tx_hash: Option<B256>, log_index: Option<u64>) -> Log {
        let event = NameRegistered {
            name: keccak256("alice"),
            owner: Address::repeat_byte(0x11),
            imageHash: "QmImage".to_string(),
        };
        let data: LogData = event.encode_log_data();
        Log {
            inner: alloy_primitives::Log {
                address: Address::repeat_byte(0x42),
                data,
            },
            block_number: Some(7),
            transaction_hash: tx_hash,
            log_index,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_registered_log_keeps_hashed_name() {
        let tx_hash = B256::repeat_byte(0xaa);
        let raw = parse_log(&registered_log(Some(tx_hash), Some(3)), EventKind::Registered)
            .expect("log should decode");

        assert_eq!(raw.transaction_hash, tx_hash);
        assert_eq!(raw.log_index, 3);
        assert_eq!(raw.block_number, Some(7));
        assert_eq!(raw.args.name(), keccak256("alice").to_string());
        assert_eq!(
            raw.args,
            EventPayload::Registered {
                name: keccak256("alice").to_string(),
                owner: Address::repeat_byte(0x11),
                image_hash: "QmImage".to_string(),
            }
        );
    }

    #[test]
    fn test_pending_logs_are_skipped() {
        let logs = vec![
            registered_log(None, Some(0)),
            registered_log(Some(B256::repeat_byte(0x01)), None),
            registered_log(Some(B256::repeat_byte(0x02)), Some(1)),
        ];
        let parsed = logs.parse_registry_logs(EventKind::Registered);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].transaction_hash, B256::repeat_byte(0x02));
    }
}
