//! # State Store
//!
//! Pluggable persistence for configurations, counterfactual wallet records,
//! witnessed payloads and signatures, and generic content-addressed trees.
//! Only the [`Store`] contract is specified here; the in-memory
//! implementation backs tests and local development, while embedded KV or
//! remote backends implement the same trait.
//!
//! All keys are typed (`Address` / `B256`), which canonicalizes the
//! case-insensitive hex forms before indexing. The subdigests-of-signer
//! index is set-valued and must be merged, never overwritten, under
//! concurrent writers.

pub mod memory;
pub mod provider;

pub use memory::MemoryStore;
pub use provider::{ConfigurationUpdate, StateProvider, WalletWitness};

use crate::config::Configuration;
use crate::payload::Payload;
use crate::types::{keccak256_concat, keccak256_hash, Context, SignerSignature};
use crate::Result;
use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Payload record stored under its subdigest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRecord {
    /// Wallet the payload was bound to
    pub wallet: Address,
    /// Chain the payload was bound to (0 = chain-agnostic)
    pub chain_id: u64,
    /// The payload itself
    pub payload: Payload,
}

/// Counterfactual deployment record stored under the wallet address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterfactualRecord {
    /// Initial image hash the wallet was derived from
    pub image_hash: B256,
    /// Deployment context used for the derivation
    pub context: Context,
}

/// Generic content-addressed Merkle tree, used for session topologies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenericTree {
    /// Interior node over one or more children
    Branch { children: Vec<GenericTree> },
    /// Raw leaf bytes
    Leaf { data: Bytes },
    /// Redacted subtree
    Hash { hash: B256 },
}

impl GenericTree {
    /// Content hash: leaves hash their bytes, branches fold their children's
    /// hashes pairwise left to right, redacted subtrees pass through
    pub fn hash(&self) -> B256 {
        match self {
            GenericTree::Leaf { data } => keccak256_hash(data),
            GenericTree::Hash { hash } => *hash,
            GenericTree::Branch { children } => {
                let mut hashes = children.iter().map(GenericTree::hash);
                match hashes.next() {
                    None => B256::ZERO,
                    Some(first) => hashes.fold(first, |acc, next| {
                        keccak256_concat(&[acc.as_slice(), next.as_slice()])
                    }),
                }
            }
        }
    }
}

/// Persistence contract consumed by [`StateProvider`]
///
/// Implementations must be safe to share across concurrent logical sessions;
/// writes to the same key are expected to be value-identical, so
/// last-write-wins semantics are acceptable everywhere except the set-valued
/// signer index, which `save_signature_of_subdigest` (and its sapient
/// variant) must merge into.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load a configuration by image hash
    async fn load_config(&self, image_hash: B256) -> Result<Option<Configuration>>;

    /// Persist a configuration under its image hash
    async fn save_config(&self, image_hash: B256, config: &Configuration) -> Result<()>;

    /// Load the counterfactual deployment record of a wallet
    async fn load_counterfactual_wallet(
        &self,
        wallet: Address,
    ) -> Result<Option<CounterfactualRecord>>;

    /// Persist the counterfactual deployment record of a wallet
    async fn save_counterfactual_wallet(
        &self,
        wallet: Address,
        record: &CounterfactualRecord,
    ) -> Result<()>;

    /// Load the payload recorded under a subdigest
    async fn load_payload_of_subdigest(&self, subdigest: B256) -> Result<Option<PayloadRecord>>;

    /// Persist a payload under its subdigest
    async fn save_payload_of_subdigest(
        &self,
        subdigest: B256,
        record: &PayloadRecord,
    ) -> Result<()>;

    /// Every subdigest a signer has ever witnessed
    async fn load_subdigests_of_signer(&self, signer: Address) -> Result<Vec<B256>>;

    /// Load a witnessed signature by (signer, subdigest)
    async fn load_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
    ) -> Result<Option<SignerSignature>>;

    /// Persist a witnessed signature and merge the signer's subdigest index
    async fn save_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
        signature: &SignerSignature,
    ) -> Result<()>;

    /// Load a witnessed sapient signature by (signer, subdigest, imageHash)
    async fn load_sapient_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
        image_hash: B256,
    ) -> Result<Option<Bytes>>;

    /// Persist a witnessed sapient signature and merge the signer index
    async fn save_sapient_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
        image_hash: B256,
        signature: &Bytes,
    ) -> Result<()>;

    /// Load a generic tree by root hash
    async fn load_tree(&self, root: B256) -> Result<Option<GenericTree>>;

    /// Persist a generic tree under its root hash
    async fn save_tree(&self, root: B256, tree: &GenericTree) -> Result<()>;
}
