//! Recovers plaintext names from events whose indexed `name` topic only carries a hash.
//!
//! Every mutating registry function takes the name as its first argument, so decoding the
//! emitting transaction's call data yields the original string.

use std::sync::Arc;

use alloy_primitives::B256;
use alloy_sol_types::SolInterface;
use tracing::{debug, warn};

use crate::indexer::contract::INameRegistry::INameRegistryCalls;
use crate::indexer::source::EventSource;
use crate::metrics::Metrics;
use crate::models::errors::DecodeError;

/// `0x` followed by exactly 64 hex digits: the shape of a keccak topic.
pub fn looks_opaque(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|digits| digits.len() == 64 && digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Decodes registry call data and returns its first argument.
pub fn decode_name_argument(input: &[u8]) -> Result<String, DecodeError> {
    let selector: [u8; 4] = input
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| DecodeError::Malformed(format!("{} bytes of call data", input.len())))?;

    if !INameRegistryCalls::valid_selector(selector) {
        return Err(DecodeError::UnknownFunction(selector));
    }

    let call =
        INameRegistryCalls::abi_decode(input).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    Ok(match call {
        INameRegistryCalls::registerName(c) => c.name,
        INameRegistryCalls::transferName(c) => c.name,
        INameRegistryCalls::updateAddress(c) => c.name,
        INameRegistryCalls::updateImage(c) => c.name,
    })
}

pub struct NameResolver<S: ?Sized> {
    source: Arc<S>,
    metrics: Option<Arc<Metrics>>,
}

impl<S> NameResolver<S>
where
    S: EventSource + ?Sized,
{
    pub fn new(source: Arc<S>, metrics: Option<Arc<Metrics>>) -> Self {
        Self { source, metrics }
    }

    /// Returns the plaintext name, or `name` itself when it isn't opaque or can't be recovered.
    pub async fn resolve(&self, name: &str, tx_hash: B256) -> String {
        if !looks_opaque(name) {
            return name.to_string();
        }

        match self.recover(tx_hash).await {
            Ok(plaintext) => {
                debug!("Resolved {} to '{}' via tx {}", name, plaintext, tx_hash);
                self.record(true);
                plaintext
            }
            Err(e) => {
                warn!("Leaving name {} unresolved (tx {}): {}", name, tx_hash, e);
                self.record(false);
                name.to_string()
            }
        }
    }

    async fn recover(&self, tx_hash: B256) -> Result<String, DecodeError> {
        let input = self.source.fetch_transaction_input(tx_hash).await?;
        decode_name_argument(&input)
    }

    fn record(&self, resolved: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_resolution(resolved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::contract::INameRegistry::{
        registerNameCall, transferNameCall, updateAddressCall, updateImageCall,
    };
    use crate::models::errors::SourceError;
    use crate::test_utils::MockSource;
    use alloy_primitives::{Address, Bytes, keccak256};
    use alloy_sol_types::SolCall;

    const HASHED: &str = "0x9c0257114eb9399a2985f8e75dad7600c5d89fe3824ffa99ec1c3eb8bf3b0501";

    #[test]
    fn test_looks_opaque() {
        assert!(looks_opaque(HASHED));
        assert!(looks_opaque(&keccak256("alice").to_string()));
        assert!(looks_opaque(&format!("0x{}", "AbCdEf0123456789".repeat(4))));

        assert!(!looks_opaque("alice"));
        assert!(!looks_opaque(""));
        assert!(!looks_opaque(&HASHED[2..]));
        assert!(!looks_opaque(&HASHED[..65]));
        assert!(!looks_opaque(&format!("{HASHED}0")));
        assert!(!looks_opaque(&format!("0x{}", "g".repeat(64))));
    }

    #[test]
    fn test_decode_each_registry_function() {
        let owner = Address::repeat_byte(0x11);
        let inputs = [
            registerNameCall {
                name: "alice".into(),
                imageHash: "QmImage".into(),
                targetAddress: owner,
            }
            .abi_encode(),
            transferNameCall {
                name: "alice".into(),
                newOwner: owner,
            }
            .abi_encode(),
            updateAddressCall {
                name: "alice".into(),
                newAddress: owner,
            }
            .abi_encode(),
            updateImageCall {
                name: "alice".into(),
                newImageHash: "QmOther".into(),
            }
            .abi_encode(),
        ];

        for input in inputs {
            assert_eq!(decode_name_argument(&input), Ok("alice".to_string()));
        }
    }

    #[test]
    fn test_decode_rejects_unknown_and_malformed_input() {
        assert_eq!(
            decode_name_argument(&[0xde, 0xad, 0xbe, 0xef, 0x00]),
            Err(DecodeError::UnknownFunction([0xde, 0xad, 0xbe, 0xef]))
        );
        assert!(matches!(
            decode_name_argument(&[0x01, 0x02]),
            Err(DecodeError::Malformed(_))
        ));

        // Known selector, truncated arguments
        let mut input = transferNameCall {
            name: "alice".into(),
            newOwner: Address::ZERO,
        }
        .abi_encode();
        input.truncate(20);
        assert!(matches!(
            decode_name_argument(&input),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_plaintext_name_skips_lookup() {
        let source = Arc::new(MockSource::new(0));
        let resolver = NameResolver::new(source.clone(), None);

        assert_eq!(resolver.resolve("alice", B256::ZERO).await, "alice");
        assert_eq!(source.transaction_lookups(), 0);
    }

    #[tokio::test]
    async fn test_opaque_name_is_recovered_from_call_data() {
        let tx_hash = B256::repeat_byte(0xaa);
        let source = Arc::new(MockSource::new(0));
        source.set_transaction_input(
            tx_hash,
            Bytes::from(
                updateImageCall {
                    name: "alice".into(),
                    newImageHash: "QmOther".into(),
                }
                .abi_encode(),
            ),
        );
        let resolver = NameResolver::new(source.clone(), None);

        assert_eq!(resolver.resolve(HASHED, tx_hash).await, "alice");
        assert_eq!(source.transaction_lookups(), 1);
    }

    #[tokio::test]
    async fn test_resolution_failures_fall_back_to_opaque_value() {
        let unavailable = B256::repeat_byte(0x01);
        let garbage = B256::repeat_byte(0x02);
        let missing = B256::repeat_byte(0x03);

        let source = Arc::new(MockSource::new(0));
        source.fail_transaction(unavailable, SourceError::unavailable("test", "connection reset"));
        source.set_transaction_input(garbage, Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]));
        let resolver = NameResolver::new(source.clone(), None);

        for tx_hash in [unavailable, garbage, missing] {
            assert_eq!(resolver.resolve(HASHED, tx_hash).await, HASHED);
        }
        assert_eq!(source.transaction_lookups(), 3);
    }
}
