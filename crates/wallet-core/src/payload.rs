//! Signable payloads and subdigest derivation
//!
//! A payload becomes signable only once it is bound to a wallet and chain:
//! `subdigest = keccak256(0x19 0x01 || keccak256(chainId || wallet) || payloadHash)`.
//! Chain id 0 is reserved for chain-agnostic payloads such as configuration
//! updates.

use crate::types::{keccak256_concat, keccak256_hash};
use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Chain id reserved for chain-agnostic payloads
pub const CHAIN_ID_AGNOSTIC: u64 = 0;

/// Error behavior of a single call inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorOnError {
    /// Continue with the next call
    Ignore,
    /// Revert the whole batch
    #[default]
    Revert,
    /// Stop executing further calls without reverting
    Abort,
}

impl BehaviorOnError {
    fn flag(&self) -> u8 {
        match self {
            BehaviorOnError::Ignore => 0,
            BehaviorOnError::Revert => 1,
            BehaviorOnError::Abort => 2,
        }
    }
}

/// One call of a `Payload::Calls` batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Target contract
    pub to: Address,
    /// Native value forwarded with the call
    pub value: U256,
    /// Calldata
    pub data: Bytes,
    /// Gas limit (0 = forward all available gas)
    pub gas_limit: U256,
    /// Execute as DELEGATECALL instead of CALL
    pub delegate_call: bool,
    /// What the wallet does when this call fails
    pub behavior_on_error: BehaviorOnError,
}

impl Call {
    /// Create a plain call with default gas and error behavior
    pub fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self {
            to,
            value,
            data,
            gas_limit: U256::ZERO,
            delegate_call: false,
            behavior_on_error: BehaviorOnError::default(),
        }
    }

    /// Structural hash of this call
    pub fn hash(&self) -> B256 {
        let mut to_word = [0u8; 32];
        to_word[12..].copy_from_slice(self.to.as_slice());
        keccak256_concat(&[
            b"Sequence call:\n",
            &to_word,
            &self.value.to_be_bytes::<32>(),
            keccak256_hash(&self.data).as_slice(),
            &self.gas_limit.to_be_bytes::<32>(),
            &[self.delegate_call as u8, self.behavior_on_error.flag()],
        ])
    }
}

/// Payload consumed by the signing and state engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A batch of calls executed under a nonce space
    Calls {
        space: U256,
        nonce: U256,
        calls: Vec<Call>,
    },
    /// An off-chain message (EIP-1271 style)
    Message { message: Bytes },
    /// A configuration update pointing at the next image hash
    ConfigUpdate { image_hash: B256 },
    /// A pre-computed digest signed as-is
    Digest { digest: B256 },
}

impl Payload {
    /// Convenience constructor for a single-nonce call batch
    pub fn calls(calls: Vec<Call>) -> Self {
        Payload::Calls {
            space: U256::ZERO,
            nonce: U256::ZERO,
            calls,
        }
    }

    /// Structural hash of this payload
    pub fn hash(&self) -> B256 {
        match self {
            Payload::Calls {
                space,
                nonce,
                calls,
            } => {
                let mut call_hashes = Vec::with_capacity(calls.len() * 32);
                for call in calls {
                    call_hashes.extend_from_slice(call.hash().as_slice());
                }
                keccak256_concat(&[
                    b"Sequence calls:\n",
                    &space.to_be_bytes::<32>(),
                    &nonce.to_be_bytes::<32>(),
                    keccak256_hash(&call_hashes).as_slice(),
                ])
            }
            Payload::Message { message } => keccak256_concat(&[
                b"Sequence message:\n",
                keccak256_hash(message).as_slice(),
            ]),
            Payload::ConfigUpdate { image_hash } => keccak256_concat(&[
                b"Sequence config update:\n",
                image_hash.as_slice(),
            ]),
            // A digest payload pins the exact digest, no re-hashing
            Payload::Digest { digest } => *digest,
        }
    }

    /// The proposed image hash if this is a configuration update
    pub fn as_config_update(&self) -> Option<B256> {
        match self {
            Payload::ConfigUpdate { image_hash } => Some(*image_hash),
            _ => None,
        }
    }
}

/// Derive the subdigest identifying one signable instance of a payload
pub fn subdigest(wallet: Address, chain_id: u64, payload: &Payload) -> B256 {
    let mut chain_word = [0u8; 32];
    chain_word[24..].copy_from_slice(&chain_id.to_be_bytes());
    let domain = keccak256_concat(&[&chain_word, wallet.as_slice()]);
    keccak256_concat(&[&[0x19, 0x01], domain.as_slice(), payload.hash().as_slice()])
}
