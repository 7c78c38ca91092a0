use alloy_primitives::B256;
use alloy_sol_types::{SolEvent, sol};

use crate::models::common::EventKind;

sol! {
    /// Events and mutating functions of the name registry contract.
    ///
    /// `name` is an indexed string on every event, so logs only carry its keccak hash.
    /// Every mutating function takes the plaintext name as its first argument.
    interface INameRegistry {
        event NameRegistered(string indexed name, address indexed owner, string imageHash);
        event NameTransferred(string indexed name, address indexed oldOwner, address indexed newOwner);
        event NameUpdated(string indexed name, address indexed newAddress, string newImageHash);

        function registerName(string name, string imageHash, address targetAddress) external;
        function transferName(string name, address newOwner) external;
        function updateAddress(string name, address newAddress) external;
        function updateImage(string name, string newImageHash) external;
    }
}

pub fn signature_hash(kind: EventKind) -> B256 {
    match kind {
        EventKind::Registered => INameRegistry::NameRegistered::SIGNATURE_HASH,
        EventKind::Transferred => INameRegistry::NameTransferred::SIGNATURE_HASH,
        EventKind::Updated => INameRegistry::NameUpdated::SIGNATURE_HASH,
    }
}
