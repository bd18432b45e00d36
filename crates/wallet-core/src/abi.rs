//! ABI helpers: 4-byte selectors, 32-byte word packing and the calldata
//! layouts consumed at the on-chain boundary
//!
//! The wallet contract itself is out of scope; this module only produces the
//! byte shapes the contract expects.

use crate::types::keccak256_hash;
use alloy_primitives::{Address, B256, Bytes, U256};

/// Compute the 4-byte selector of a canonical function signature,
/// e.g. `selector("transfer(address,uint256)")`
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256_hash(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Selectors of the wallet contract surface consumed by this engine
pub mod selectors {
    use super::selector;

    /// `getImplementation()`
    pub fn get_implementation() -> [u8; 4] {
        selector("getImplementation()")
    }

    /// `imageHash()`
    pub fn image_hash() -> [u8; 4] {
        selector("imageHash()")
    }

    /// `readNonce(uint256)`
    pub fn read_nonce() -> [u8; 4] {
        selector("readNonce(uint256)")
    }

    /// `execute(bytes,bytes)`
    pub fn execute() -> [u8; 4] {
        selector("execute(bytes,bytes)")
    }

    /// `updateImageHash(bytes32)`
    pub fn update_image_hash() -> [u8; 4] {
        selector("updateImageHash(bytes32)")
    }

    /// `recoverSapientSignature(bytes,bytes)`
    pub fn recover_sapient_signature() -> [u8; 4] {
        selector("recoverSapientSignature(bytes,bytes)")
    }

    /// `incrementUsageLimit((bytes32,uint256)[])`
    pub fn increment_usage_limit() -> [u8; 4] {
        selector("incrementUsageLimit((bytes32,uint256)[])")
    }
}

/// Right-align an address into a 32-byte ABI word
pub fn word_from_address(address: Address) -> B256 {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_slice());
    B256::from(out)
}

/// Encode a u256 as a 32-byte ABI word
pub fn word_from_u256(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

/// Encode a u64 as a 32-byte ABI word
pub fn word_from_u64(value: u64) -> B256 {
    word_from_u256(U256::from(value))
}

/// Read the 32-byte word at `offset`, zero-padding past the end of the data
pub fn read_word(data: &[u8], offset: usize) -> B256 {
    let mut out = [0u8; 32];
    if offset < data.len() {
        let end = usize::min(offset + 32, data.len());
        out[..end - offset].copy_from_slice(&data[offset..end]);
    }
    B256::from(out)
}

/// Build `incrementUsageLimit((bytes32,uint256)[])` calldata for a list of
/// usage increments
pub fn encode_increment_usage_limit(increments: &[(B256, U256)]) -> Bytes {
    let mut data = Vec::with_capacity(4 + 64 + increments.len() * 64);
    data.extend_from_slice(&selectors::increment_usage_limit());
    // Head: offset of the dynamic array, then its length
    data.extend_from_slice(word_from_u64(32).as_slice());
    data.extend_from_slice(word_from_u64(increments.len() as u64).as_slice());
    for (usage_hash, amount) in increments {
        data.extend_from_slice(usage_hash.as_slice());
        data.extend_from_slice(&amount.to_be_bytes::<32>());
    }
    Bytes::from(data)
}
