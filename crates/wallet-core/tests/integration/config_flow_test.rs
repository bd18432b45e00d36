//! Integration tests for configuration trees and signature envelopes
//!
//! Covers the content-addressing guarantees (determinism, redaction,
//! checkpoint sensitivity), threshold aggregation over a real payload, and
//! the wire envelope surviving an encode/decode round trip.

use alloy_primitives::{Address, Bytes, U256};
use k256::ecdsa::SigningKey;
use std::collections::HashMap;
use wallet_core::config::signature::fill_leaves;
use wallet_core::config::Topology;
use wallet_core::payload::subdigest;
use wallet_core::types::signer_address;
use wallet_core::{
    wallet_address, Call, Configuration, Context, EcdsaSignature, Error, Payload, RawSignature,
    SignedConfiguration, SignerSignature,
};

fn key(byte: u8) -> SigningKey {
    SigningKey::from_slice(&[byte; 32]).unwrap()
}

fn three_signer_config(threshold: u16) -> (Configuration, Vec<SigningKey>) {
    let keys: Vec<SigningKey> = (1..=3).map(key).collect();
    let config = Configuration::new(
        threshold,
        0,
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
    .unwrap();
    (config, keys)
}

fn sign_with(
    config: &Configuration,
    keys: &[&SigningKey],
    digest: &alloy_primitives::B256,
) -> SignedConfiguration {
    let signatures: HashMap<Address, SignerSignature> = keys
        .iter()
        .map(|k| {
            (
                signer_address(k),
                SignerSignature::Hash(EcdsaSignature::sign(k, digest).unwrap()),
            )
        })
        .collect();
    let (topology, _) = fill_leaves(&config.topology, &|leaf| match leaf {
        Topology::Signer { address, .. } => signatures.get(address).cloned(),
        _ => None,
    });
    SignedConfiguration {
        threshold: config.threshold,
        checkpoint: config.checkpoint,
        topology,
    }
}

#[test]
fn test_image_hash_survives_redaction() {
    let (config, _) = three_signer_config(2);

    // Replace the first signer with its hash; the root must not move
    let redacted = Configuration {
        threshold: config.threshold,
        checkpoint: config.checkpoint,
        topology: match &config.topology {
            Topology::Node { left, right } => Topology::Node {
                left: Box::new(Topology::NodeHash { hash: left.hash() }),
                right: right.clone(),
            },
            _ => unreachable!(),
        },
    };
    assert_eq!(config.image_hash(), redacted.image_hash());
}

#[test]
fn test_wallet_address_is_deterministic() {
    let (config, _) = three_signer_config(2);
    let context = Context::dev();
    let a = wallet_address(&config.image_hash(), &context);
    let b = wallet_address(&config.image_hash(), &context);
    assert_eq!(a, b);

    let (other, _) = three_signer_config(3);
    assert_ne!(a, wallet_address(&other.image_hash(), &context));
}

#[test]
fn test_threshold_aggregation_over_payload() {
    let (config, keys) = three_signer_config(2);
    let wallet = wallet_address(&config.image_hash(), &Context::dev());
    let payload = Payload::calls(vec![Call::new(
        Address::repeat_byte(0x44),
        U256::from(1u64),
        Bytes::new(),
    )]);
    let digest = subdigest(wallet, 1, &payload);

    // Two of three meets the threshold
    let signed = sign_with(&config, &[&keys[0], &keys[1]], &digest);
    assert_eq!(signed.validate_weight().unwrap(), 2);
    assert_eq!(signed.image_hash(), config.image_hash());

    // One of three does not
    let short = sign_with(&config, &[&keys[0]], &digest);
    assert!(matches!(
        short.validate_weight().unwrap_err(),
        Error::InsufficientWeight {
            required: 2,
            actual: 1
        }
    ));
}

#[test]
fn test_envelope_round_trip_preserves_configuration() {
    let (config, keys) = three_signer_config(2);
    let wallet = wallet_address(&config.image_hash(), &Context::dev());
    let payload = Payload::Message {
        message: Bytes::from_static(b"round trip"),
    };
    let digest = subdigest(wallet, 1, &payload);

    let signed = sign_with(&config, &[&keys[0], &keys[2]], &digest);
    let raw = RawSignature::simple(false, signed);

    let encoded = raw.encode().unwrap();
    let decoded = RawSignature::decode(&encoded).unwrap();

    assert_eq!(decoded.configuration.image_hash(), config.image_hash());
    assert_eq!(decoded.configuration.validate_weight().unwrap(), 2);
    assert!(!decoded.no_chain_id);
}

#[test]
fn test_checkpoint_moves_the_image_hash() {
    let (a, _) = three_signer_config(2);
    let b = Configuration {
        threshold: a.threshold,
        checkpoint: a.checkpoint + 1,
        topology: a.topology.clone(),
    };
    assert_ne!(a.image_hash(), b.image_hash());
}
