//! # StateProvider
//!
//! Orchestrates a [`Store`]: wallet-address derivation, witness recording
//! and configuration-update-chain resolution. The provider holds no mutable
//! state beyond its injected store and sapient registry, so it can be shared
//! freely across concurrent logical sessions.

use super::{CounterfactualRecord, PayloadRecord, Store};
use crate::config::signature::{
    fill_leaves, RawSignature, SignatureTopology, SignedConfiguration,
};
use crate::config::{merge_configuration, Configuration, Topology};
use crate::extensions::{SapientRegistry, SapientSigner};
use crate::payload::{subdigest, Payload, CHAIN_ID_AGNOSTIC};
use crate::types::{wallet_address, Context, SignerSignature};
use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes};
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Options for [`StateProvider::get_configuration_updates`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Emit every valid hop instead of only the minimal chain
    pub all_updates: bool,
}

/// One hop of a resolved configuration-update chain
#[derive(Debug, Clone)]
pub struct ConfigurationUpdate {
    /// Image hash the wallet transitions to
    pub image_hash: B256,
    /// Signature envelope replayable on-chain for this hop
    pub signature: RawSignature,
}

/// One witnessed payload of a signer for one wallet
#[derive(Debug, Clone)]
pub struct WalletWitness {
    pub wallet: Address,
    pub chain_id: u64,
    pub payload: Payload,
    pub signature: SignerSignature,
}

struct UpdateCandidate {
    checkpoint: u64,
    image_hash: B256,
    config: Configuration,
    signature: RawSignature,
}

enum SignedLeaf {
    Ecdsa {
        address: Address,
        signature: SignerSignature,
    },
    Sapient {
        address: Address,
        image_hash: B256,
        data: Bytes,
    },
}

/// Content-addressed store orchestrator and update-chain resolver
#[derive(Clone)]
pub struct StateProvider {
    store: Arc<dyn Store>,
    sapient: SapientRegistry,
}

impl StateProvider {
    /// Create a provider over a store, with no sapient verifiers registered
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            sapient: SapientRegistry::new(),
        }
    }

    /// Register a sapient verification algorithm under its extension address
    pub fn with_sapient_signer(mut self, signer: Arc<dyn SapientSigner>) -> Self {
        self.sapient.insert(signer.address(), signer);
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Persist a configuration and record its counterfactual wallet address
    ///
    /// The configuration is merged with any previously-known partial view of
    /// the same image hash before writing. Returns the derived address.
    pub async fn save_wallet(&self, config: &Configuration, context: &Context) -> Result<Address> {
        config.validate()?;
        let image_hash = self.merge_and_save_config(config).await?;
        let wallet = wallet_address(&image_hash, context);
        self.store
            .save_counterfactual_wallet(
                wallet,
                &CounterfactualRecord {
                    image_hash,
                    context: context.clone(),
                },
            )
            .await?;
        debug!(%wallet, %image_hash, "saved counterfactual wallet");
        Ok(wallet)
    }

    /// Persist a payload and fan its signature topology out into per-leaf
    /// witness records
    ///
    /// Regular leaves are recovered via ECDSA and must match their claimed
    /// address; sapient leaves are validated against their registered
    /// verification algorithm. Invalid or unsupported leaves are logged and
    /// skipped; every valid leaf is persisted.
    pub async fn save_witnesses(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
        topology: &SignatureTopology,
    ) -> Result<()> {
        let digest = subdigest(wallet, chain_id, payload);
        self.store
            .save_payload_of_subdigest(
                digest,
                &PayloadRecord {
                    wallet,
                    chain_id,
                    payload: payload.clone(),
                },
            )
            .await?;
        self.fan_out_witnesses(wallet, chain_id, payload, digest, topology)
            .await
    }

    /// Persist a signed configuration update (chain-agnostic payload) and
    /// fan its signatures out exactly like `save_witnesses`
    ///
    /// Fails closed before any mutation if the aggregated weight is below
    /// the signing configuration's threshold.
    pub async fn save_update(
        &self,
        wallet: Address,
        configuration: &Configuration,
        signature: &RawSignature,
    ) -> Result<()> {
        signature.configuration.validate_weight()?;

        let image_hash = configuration.image_hash();
        self.merge_and_save_config(configuration).await?;

        let payload = Payload::ConfigUpdate { image_hash };
        let digest = subdigest(wallet, CHAIN_ID_AGNOSTIC, &payload);
        self.store
            .save_payload_of_subdigest(
                digest,
                &PayloadRecord {
                    wallet,
                    chain_id: CHAIN_ID_AGNOSTIC,
                    payload: payload.clone(),
                },
            )
            .await?;
        self.fan_out_witnesses(
            wallet,
            CHAIN_ID_AGNOSTIC,
            &payload,
            digest,
            &signature.configuration.topology,
        )
        .await
    }

    /// One witnessed payload per wallet for a regular signer
    ///
    /// When a signer witnessed several payloads for the same wallet, the
    /// survivor is deterministic (highest-sorting subdigest) but carries no
    /// recency meaning; the store does not record witness timestamps.
    pub async fn get_wallets(&self, signer: Address) -> Result<Vec<WalletWitness>> {
        let mut witnesses: BTreeMap<Address, WalletWitness> = BTreeMap::new();
        for digest in self.store.load_subdigests_of_signer(signer).await? {
            let Some(record) = self.store.load_payload_of_subdigest(digest).await? else {
                continue;
            };
            let Some(signature) = self
                .store
                .load_signature_of_subdigest(signer, digest)
                .await?
            else {
                continue;
            };
            witnesses.insert(
                record.wallet,
                WalletWitness {
                    wallet: record.wallet,
                    chain_id: record.chain_id,
                    payload: record.payload,
                    signature,
                },
            );
        }
        Ok(witnesses.into_values().collect())
    }

    /// One witnessed payload per wallet for a sapient signer, with the same
    /// deterministic tie-break as [`get_wallets`](Self::get_wallets)
    pub async fn get_wallets_for_sapient(
        &self,
        signer: Address,
        image_hash: B256,
    ) -> Result<Vec<WalletWitness>> {
        let mut witnesses: BTreeMap<Address, WalletWitness> = BTreeMap::new();
        for digest in self.store.load_subdigests_of_signer(signer).await? {
            let Some(record) = self.store.load_payload_of_subdigest(digest).await? else {
                continue;
            };
            let Some(data) = self
                .store
                .load_sapient_signature_of_subdigest(signer, digest, image_hash)
                .await?
            else {
                continue;
            };
            witnesses.insert(
                record.wallet,
                WalletWitness {
                    wallet: record.wallet,
                    chain_id: record.chain_id,
                    payload: record.payload,
                    signature: SignerSignature::Sapient(data),
                },
            );
        }
        Ok(witnesses.into_values().collect())
    }

    /// Resolve the signed hop chain bringing a wallet from `from_image_hash`
    /// to its newest reachable configuration
    ///
    /// Every previously-witnessed config-update payload is an edge from the
    /// configuration active at signing time to the proposed image hash,
    /// weighted by the destination checkpoint. Candidates below the current
    /// configuration's threshold are discarded. In default mode each round
    /// takes the smallest valid checkpoint jump; with `all_updates` every
    /// valid hop is emitted (ascending by checkpoint, then image hash) and
    /// the search continues from the highest accepted one. Revisiting an
    /// image hash means the store is malformed and fails closed.
    #[instrument(skip(self, options), fields(wallet = %wallet, from = %from_image_hash))]
    pub async fn get_configuration_updates(
        &self,
        wallet: Address,
        from_image_hash: B256,
        options: UpdateOptions,
    ) -> Result<Vec<ConfigurationUpdate>> {
        let mut current = self
            .store
            .load_config(from_image_hash)
            .await?
            .ok_or_else(|| Error::NotFound(format!("configuration {from_image_hash}")))?;
        let mut visited: HashSet<B256> = HashSet::from([from_image_hash]);
        let mut updates = Vec::new();

        loop {
            let candidates = self.find_update_candidates(wallet, &current).await?;
            if candidates.is_empty() {
                break;
            }

            let mut next = None;
            for candidate in candidates {
                if !visited.insert(candidate.image_hash) {
                    return Err(Error::ConfigurationCycleDetected(candidate.image_hash));
                }
                debug!(
                    image_hash = %candidate.image_hash,
                    checkpoint = candidate.checkpoint,
                    "accepted update hop"
                );
                updates.push(ConfigurationUpdate {
                    image_hash: candidate.image_hash,
                    signature: candidate.signature,
                });
                next = Some(candidate.config);
                if !options.all_updates {
                    // Default mode: only the smallest checkpoint jump per round
                    break;
                }
            }

            match next {
                Some(config) => current = config,
                None => break,
            }
        }

        Ok(updates)
    }

    /// Merge a configuration with any stored partial view and persist it
    async fn merge_and_save_config(&self, config: &Configuration) -> Result<B256> {
        let image_hash = config.image_hash();
        let merged = match self.store.load_config(image_hash).await? {
            Some(existing) => merge_configuration(&existing, config)?,
            None => config.clone(),
        };
        self.store.save_config(image_hash, &merged).await?;
        Ok(image_hash)
    }

    async fn fan_out_witnesses(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
        digest: B256,
        topology: &SignatureTopology,
    ) -> Result<()> {
        let mut leaves = Vec::new();
        collect_signed_leaves(topology, &mut leaves);

        for leaf in leaves {
            match leaf {
                SignedLeaf::Ecdsa { address, signature } => {
                    let recovered = match signature.recover(&digest) {
                        Ok(recovered) => recovered,
                        Err(err) => {
                            warn!(%address, %err, "skipping unrecoverable witness leaf");
                            continue;
                        }
                    };
                    if recovered != address {
                        warn!(
                            expected = %address,
                            %recovered,
                            "skipping witness leaf with mismatched signer"
                        );
                        continue;
                    }
                    self.store
                        .save_signature_of_subdigest(recovered, digest, &signature)
                        .await?;
                }
                SignedLeaf::Sapient {
                    address,
                    image_hash,
                    data,
                } => {
                    let Some(verifier) = self.sapient.get(&address) else {
                        warn!(%address, "skipping witness leaf of unknown sapient signer");
                        continue;
                    };
                    let recovered = match verifier
                        .is_valid_sapient_signature(wallet, chain_id, payload, &data)
                        .await
                    {
                        Ok(recovered) => recovered,
                        Err(err) => {
                            warn!(%address, %err, "skipping invalid sapient witness leaf");
                            continue;
                        }
                    };
                    if recovered != image_hash {
                        warn!(
                            %address,
                            expected = %image_hash,
                            %recovered,
                            "skipping sapient witness leaf with mismatched image hash"
                        );
                        continue;
                    }
                    self.store
                        .save_sapient_signature_of_subdigest(address, digest, image_hash, &data)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Gather, score and sort every valid update candidate reachable from
    /// one configuration
    async fn find_update_candidates(
        &self,
        wallet: Address,
        from: &Configuration,
    ) -> Result<Vec<UpdateCandidate>> {
        let signers = from.topology.signers();
        let sapients = from.topology.sapient_signers();

        // Union of everything those signers have ever witnessed
        let index_futures = signers
            .iter()
            .copied()
            .chain(sapients.iter().map(|(address, _)| *address))
            .map(|signer| {
                let store = Arc::clone(&self.store);
                async move { store.load_subdigests_of_signer(signer).await }
            });
        let digests: BTreeSet<B256> = try_join_all(index_futures)
            .await?
            .into_iter()
            .flatten()
            .collect();

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        for digest in digests {
            let Some(record) = self.store.load_payload_of_subdigest(digest).await? else {
                continue;
            };
            if record.wallet != wallet {
                continue;
            }
            let Some(next_hash) = record.payload.as_config_update() else {
                continue;
            };
            if !seen.insert(next_hash) {
                continue;
            }
            let Some(next_config) = self.store.load_config(next_hash).await? else {
                debug!(image_hash = %next_hash, "candidate configuration not in store");
                continue;
            };
            if next_config.checkpoint <= from.checkpoint {
                continue;
            }

            let (topology, weight) = self
                .aggregate_signatures(from, digest, &signers, &sapients)
                .await?;
            if weight < from.threshold as u64 {
                debug!(
                    image_hash = %next_hash,
                    weight,
                    threshold = from.threshold,
                    "discarding candidate below threshold"
                );
                continue;
            }

            candidates.push(UpdateCandidate {
                checkpoint: next_config.checkpoint,
                image_hash: next_hash,
                config: next_config,
                signature: RawSignature::simple(
                    true,
                    SignedConfiguration {
                        threshold: from.threshold,
                        checkpoint: from.checkpoint,
                        topology,
                    },
                ),
            });
        }

        // One comparator for both search modes
        candidates.sort_by(|a, b| {
            (a.checkpoint, a.image_hash).cmp(&(b.checkpoint, b.image_hash))
        });
        Ok(candidates)
    }

    /// Load all available signatures of a configuration's signers for one
    /// subdigest and aggregate them over the topology
    async fn aggregate_signatures(
        &self,
        from: &Configuration,
        digest: B256,
        signers: &[Address],
        sapients: &[(Address, B256)],
    ) -> Result<(SignatureTopology, u64)> {
        let ecdsa_futures = signers.iter().copied().map(|signer| {
            let store = Arc::clone(&self.store);
            async move {
                let signature = store.load_signature_of_subdigest(signer, digest).await?;
                Ok::<_, Error>((signer, signature))
            }
        });
        let ecdsa: HashMap<Address, SignerSignature> = try_join_all(ecdsa_futures)
            .await?
            .into_iter()
            .filter_map(|(signer, signature)| signature.map(|sig| (signer, sig)))
            .collect();

        let sapient_futures = sapients.iter().copied().map(|(signer, image_hash)| {
            let store = Arc::clone(&self.store);
            async move {
                let signature = store
                    .load_sapient_signature_of_subdigest(signer, digest, image_hash)
                    .await?;
                Ok::<_, Error>(((signer, image_hash), signature))
            }
        });
        let sapient: HashMap<(Address, B256), Bytes> = try_join_all(sapient_futures)
            .await?
            .into_iter()
            .filter_map(|(key, signature)| signature.map(|sig| (key, sig)))
            .collect();

        let resolve = |leaf: &Topology| match leaf {
            Topology::Signer { address, .. } => ecdsa.get(address).cloned(),
            Topology::Sapient {
                address,
                image_hash,
                ..
            } => sapient
                .get(&(*address, *image_hash))
                .cloned()
                .map(SignerSignature::Sapient),
            _ => None,
        };
        Ok(fill_leaves(&from.topology, &resolve))
    }
}

/// Walk a signature topology and collect every leaf carrying a signature
fn collect_signed_leaves(topology: &SignatureTopology, out: &mut Vec<SignedLeaf>) {
    match topology {
        SignatureTopology::Signer {
            address,
            signature: Some(signature),
            ..
        } => out.push(SignedLeaf::Ecdsa {
            address: *address,
            signature: signature.clone(),
        }),
        SignatureTopology::Sapient {
            address,
            image_hash,
            signature: Some(data),
            ..
        } => out.push(SignedLeaf::Sapient {
            address: *address,
            image_hash: *image_hash,
            data: data.clone(),
        }),
        SignatureTopology::Nested { tree, .. } => collect_signed_leaves(tree, out),
        SignatureTopology::Node { left, right } => {
            collect_signed_leaves(left, out);
            collect_signed_leaves(right, out);
        }
        SignatureTopology::Signer { .. }
        | SignatureTopology::Sapient { .. }
        | SignatureTopology::Subdigest { .. }
        | SignatureTopology::NodeHash { .. } => {}
    }
}
