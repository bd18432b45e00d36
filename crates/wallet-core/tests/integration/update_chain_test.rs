//! Integration tests for witness recording and update-chain resolution
//!
//! The store is treated as untrusted throughout: chains only form out of
//! witnessed signatures that re-verify against the configuration active at
//! signing time.

use alloy_primitives::{Address, Bytes, U256};
use k256::ecdsa::SigningKey;
use std::collections::HashMap;
use std::sync::Arc;
use wallet_core::config::signature::fill_leaves;
use wallet_core::config::Topology;
use wallet_core::payload::{subdigest, CHAIN_ID_AGNOSTIC};
use wallet_core::types::signer_address;
use wallet_core::{
    Call, Configuration, Context, EcdsaSignature, MemoryStore, Payload, RawSignature,
    SignedConfiguration, SignerSignature, StateProvider, UpdateOptions,
};

fn key(byte: u8) -> SigningKey {
    SigningKey::from_slice(&[byte; 32]).unwrap()
}

fn provider() -> StateProvider {
    StateProvider::new(Arc::new(MemoryStore::new()))
}

fn config_over(checkpoint: u64, keys: &[&SigningKey]) -> Configuration {
    Configuration::new(
        keys.len() as u16,
        checkpoint,
        Topology::from_leaves(
            keys.iter()
                .map(|k| Topology::Signer {
                    address: signer_address(k),
                    weight: 1,
                })
                .collect(),
        )
        .unwrap(),
    )
    .unwrap()
}

fn update_signature(
    wallet: Address,
    from: &Configuration,
    to: &Configuration,
    keys: &[&SigningKey],
) -> RawSignature {
    let payload = Payload::ConfigUpdate {
        image_hash: to.image_hash(),
    };
    let digest = subdigest(wallet, CHAIN_ID_AGNOSTIC, &payload);
    let signatures: HashMap<Address, SignerSignature> = keys
        .iter()
        .map(|k| {
            (
                signer_address(k),
                SignerSignature::Hash(EcdsaSignature::sign(k, &digest).unwrap()),
            )
        })
        .collect();
    let (topology, _) = fill_leaves(&from.topology, &|leaf| match leaf {
        Topology::Signer { address, .. } => signatures.get(address).cloned(),
        _ => None,
    });
    RawSignature::simple(
        true,
        SignedConfiguration {
            threshold: from.threshold,
            checkpoint: from.checkpoint,
            topology,
        },
    )
}

#[tokio::test]
async fn test_no_updates_for_fresh_wallet() {
    let provider = provider();
    let (a, b) = (key(1), key(2));
    let config = config_over(0, &[&a, &b]);
    let wallet = provider.save_wallet(&config, &Context::dev()).await.unwrap();

    let updates = provider
        .get_configuration_updates(wallet, config.image_hash(), UpdateOptions::default())
        .await
        .unwrap();
    assert!(updates.is_empty());
}

#[tokio::test]
async fn test_single_update_is_one_hop() {
    let provider = provider();
    let (a, b, c) = (key(1), key(2), key(3));
    let from = config_over(0, &[&a, &b]);
    let to = config_over(1, &[&a, &c]);
    let wallet = provider.save_wallet(&from, &Context::dev()).await.unwrap();

    let signature = update_signature(wallet, &from, &to, &[&a, &b]);
    provider.save_update(wallet, &to, &signature).await.unwrap();

    let updates = provider
        .get_configuration_updates(wallet, from.image_hash(), UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].image_hash, to.image_hash());

    // The returned envelope aggregates the stored witnesses back above the
    // threshold and is bound to the signing configuration
    assert_eq!(updates[0].signature.configuration.validate_weight().unwrap(), 2);
    assert_eq!(
        updates[0].signature.configuration.image_hash(),
        from.image_hash()
    );
    assert!(updates[0].signature.no_chain_id);
}

#[tokio::test]
async fn test_chain_walks_across_rotated_signers() {
    let provider = provider();
    let (a, b, c, d) = (key(1), key(2), key(3), key(4));
    let first = config_over(0, &[&a, &b]);
    let second = config_over(1, &[&c, &d]);
    let third = config_over(2, &[&a, &d]);
    let wallet = provider.save_wallet(&first, &Context::dev()).await.unwrap();

    // Each hop is signed by the configuration it departs from
    provider
        .save_update(wallet, &second, &update_signature(wallet, &first, &second, &[&a, &b]))
        .await
        .unwrap();
    provider
        .save_update(wallet, &third, &update_signature(wallet, &second, &third, &[&c, &d]))
        .await
        .unwrap();

    let updates = provider
        .get_configuration_updates(wallet, first.image_hash(), UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].image_hash, second.image_hash());
    assert_eq!(updates[1].image_hash, third.image_hash());
}

#[tokio::test]
async fn test_all_updates_has_no_duplicates_and_ascends() {
    let provider = provider();
    let (a, b, c, d, e) = (key(1), key(2), key(3), key(4), key(5));
    let from = config_over(0, &[&a, &b]);
    let low = config_over(1, &[&a, &c]);
    let mid = config_over(2, &[&a, &d]);
    let high = config_over(3, &[&a, &e]);
    let wallet = provider.save_wallet(&from, &Context::dev()).await.unwrap();

    for to in [&high, &low, &mid] {
        provider
            .save_update(wallet, to, &update_signature(wallet, &from, to, &[&a, &b]))
            .await
            .unwrap();
    }

    let updates = provider
        .get_configuration_updates(
            wallet,
            from.image_hash(),
            UpdateOptions { all_updates: true },
        )
        .await
        .unwrap();

    let hashes: Vec<_> = updates.iter().map(|u| u.image_hash).collect();
    assert_eq!(
        hashes,
        vec![low.image_hash(), mid.image_hash(), high.image_hash()]
    );

    let mut deduped = hashes.clone();
    deduped.dedup();
    assert_eq!(deduped, hashes);
}

#[tokio::test]
async fn test_witness_round_trip_through_provider() {
    let provider = provider();
    let (a, b) = (key(1), key(2));
    let config = config_over(0, &[&a, &b]);
    let wallet = provider.save_wallet(&config, &Context::dev()).await.unwrap();

    let payload = Payload::calls(vec![Call::new(
        Address::repeat_byte(0x44),
        U256::from(7u64),
        Bytes::new(),
    )]);
    let digest = subdigest(wallet, 1, &payload);
    let signatures: HashMap<Address, SignerSignature> = [(
        signer_address(&a),
        SignerSignature::Hash(EcdsaSignature::sign(&a, &digest).unwrap()),
    )]
    .into();
    let (topology, _) = fill_leaves(&config.topology, &|leaf| match leaf {
        Topology::Signer { address, .. } => signatures.get(address).cloned(),
        _ => None,
    });
    provider
        .save_witnesses(wallet, 1, &payload, &topology)
        .await
        .unwrap();

    let witnesses = provider.get_wallets(signer_address(&a)).await.unwrap();
    assert_eq!(witnesses.len(), 1);
    assert_eq!(witnesses[0].wallet, wallet);
    assert_eq!(witnesses[0].payload, payload);
}
