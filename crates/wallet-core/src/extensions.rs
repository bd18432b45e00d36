//! Sapient signer extensions
//!
//! A sapient signer delegates validity to an external algorithm (session
//! manager, passkeys, recovery module) instead of plain ECDSA recovery. The
//! registry mapping extension addresses to their verification algorithms is
//! an explicit value passed into providers and signers, never a module-level
//! singleton.

use crate::payload::Payload;
use crate::Result;
use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Known extension addresses of a wallet deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    /// Session manager extension
    pub sessions: Address,
    /// Passkeys extension
    pub passkeys: Address,
}

impl Extensions {
    /// Fixed addresses used by unit tests and local development
    pub fn dev() -> Self {
        Self {
            sessions: Address::repeat_byte(0x5e),
            passkeys: Address::repeat_byte(0x9a),
        }
    }
}

/// A signer whose validity is determined by an external algorithm
///
/// Implementations own a side topology identified by its own image hash,
/// referenced from the wallet configuration through a sapient leaf.
#[async_trait]
pub trait SapientSigner: Send + Sync {
    /// On-chain address of the extension acting as the signer
    fn address(&self) -> Address;

    /// Current image hash of the signer's side topology
    fn image_hash(&self) -> B256;

    /// Produce a sapient signature for a payload bound to a wallet and chain
    async fn sign_sapient(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
        image_hash: B256,
    ) -> Result<Bytes>;

    /// Validate a sapient signature, returning the image hash it recovers to
    async fn is_valid_sapient_signature(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
        signature: &Bytes,
    ) -> Result<B256>;
}

/// Registry of sapient verification algorithms by extension address
pub type SapientRegistry = HashMap<Address, Arc<dyn SapientSigner>>;
