//! In-memory store for testing and local development

use super::{CounterfactualRecord, GenericTree, PayloadRecord, Store};
use crate::config::Configuration;
use crate::types::SignerSignature;
use crate::Result;
use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// In-memory [`Store`] backed by per-table maps
///
/// Useful for unit and integration testing and single-process development.
/// The signer index is kept as a set so concurrent witness writes merge
/// instead of clobbering each other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    configs: RwLock<HashMap<B256, Configuration>>,
    wallets: RwLock<HashMap<Address, CounterfactualRecord>>,
    payloads: RwLock<HashMap<B256, PayloadRecord>>,
    subdigests: RwLock<HashMap<Address, HashSet<B256>>>,
    signatures: RwLock<HashMap<(Address, B256), SignerSignature>>,
    sapient_signatures: RwLock<HashMap<(Address, B256, B256), Bytes>>,
    trees: RwLock<HashMap<B256, GenericTree>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_config(&self, image_hash: B256) -> Result<Option<Configuration>> {
        Ok(self.configs.read().await.get(&image_hash).cloned())
    }

    async fn save_config(&self, image_hash: B256, config: &Configuration) -> Result<()> {
        self.configs
            .write()
            .await
            .insert(image_hash, config.clone());
        Ok(())
    }

    async fn load_counterfactual_wallet(
        &self,
        wallet: Address,
    ) -> Result<Option<CounterfactualRecord>> {
        Ok(self.wallets.read().await.get(&wallet).cloned())
    }

    async fn save_counterfactual_wallet(
        &self,
        wallet: Address,
        record: &CounterfactualRecord,
    ) -> Result<()> {
        self.wallets.write().await.insert(wallet, record.clone());
        Ok(())
    }

    async fn load_payload_of_subdigest(&self, subdigest: B256) -> Result<Option<PayloadRecord>> {
        Ok(self.payloads.read().await.get(&subdigest).cloned())
    }

    async fn save_payload_of_subdigest(
        &self,
        subdigest: B256,
        record: &PayloadRecord,
    ) -> Result<()> {
        self.payloads
            .write()
            .await
            .insert(subdigest, record.clone());
        Ok(())
    }

    async fn load_subdigests_of_signer(&self, signer: Address) -> Result<Vec<B256>> {
        let subdigests = self.subdigests.read().await;
        let mut out: Vec<B256> = subdigests
            .get(&signer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        // Deterministic iteration for callers
        out.sort();
        Ok(out)
    }

    async fn load_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
    ) -> Result<Option<SignerSignature>> {
        Ok(self
            .signatures
            .read()
            .await
            .get(&(signer, subdigest))
            .cloned())
    }

    async fn save_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
        signature: &SignerSignature,
    ) -> Result<()> {
        self.signatures
            .write()
            .await
            .insert((signer, subdigest), signature.clone());
        self.subdigests
            .write()
            .await
            .entry(signer)
            .or_default()
            .insert(subdigest);
        Ok(())
    }

    async fn load_sapient_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
        image_hash: B256,
    ) -> Result<Option<Bytes>> {
        Ok(self
            .sapient_signatures
            .read()
            .await
            .get(&(signer, subdigest, image_hash))
            .cloned())
    }

    async fn save_sapient_signature_of_subdigest(
        &self,
        signer: Address,
        subdigest: B256,
        image_hash: B256,
        signature: &Bytes,
    ) -> Result<()> {
        self.sapient_signatures
            .write()
            .await
            .insert((signer, subdigest, image_hash), signature.clone());
        self.subdigests
            .write()
            .await
            .entry(signer)
            .or_default()
            .insert(subdigest);
        Ok(())
    }

    async fn load_tree(&self, root: B256) -> Result<Option<GenericTree>> {
        Ok(self.trees.read().await.get(&root).cloned())
    }

    async fn save_tree(&self, root: B256, tree: &GenericTree) -> Result<()> {
        self.trees.write().await.insert(root, tree.clone());
        Ok(())
    }
}
