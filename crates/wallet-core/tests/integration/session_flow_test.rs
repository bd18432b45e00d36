//! Integration tests for session signing through the wallet stack
//!
//! A wallet configuration commits to a session topology through a sapient
//! leaf; the session manager signs payloads with delegated keys and the
//! state provider verifies those sapient signatures before recording them.

use alloy_primitives::{Address, Bytes, U256, B256};
use k256::ecdsa::SigningKey;
use std::sync::Arc;
use wallet_core::config::Topology;
use wallet_core::permission::usage_hash;
use wallet_core::session::{Attestation, AuthData, SessionPermissions};
use wallet_core::types::signer_address;
use wallet_core::{
    Call, Configuration, Context, EcdsaSignature, Error, MemoryStore, Payload, PermissionBuilder,
    SapientSigner, SessionManager, SessionTopology, SignatureTopology, SignerSignature,
    StateProvider,
};

fn key(byte: u8) -> SigningKey {
    SigningKey::from_slice(&[byte; 32]).unwrap()
}

fn sessions_extension() -> Address {
    wallet_core::Extensions::dev().sessions
}

fn attest(identity: &SigningKey, session: &SigningKey) -> (Attestation, EcdsaSignature) {
    let attestation = Attestation {
        approved_signer: signer_address(session),
        application_data: Bytes::from_static(b"integration"),
        auth_data: AuthData {
            redirect_url: "https://app.example".to_string(),
            issued_at: 1_700_000_000,
        },
    };
    let signature = EcdsaSignature::sign(identity, &attestation.hash()).unwrap();
    (attestation, signature)
}

/// Wallet whose only signer is the session manager's sapient leaf
fn sapient_wallet(manager: &SessionManager) -> Configuration {
    Configuration::new(
        1,
        0,
        Topology::Sapient {
            address: manager.address(),
            weight: 1,
            image_hash: manager.image_hash(),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_sapient_witness_flows_through_provider() {
    let identity = key(1);
    let session = key(2);
    let topology = SessionTopology::new(signer_address(&identity));
    let (attestation, identity_sig) = attest(&identity, &session);
    let manager = Arc::new(
        SessionManager::new(sessions_extension(), topology).with_implicit_signer(
            session,
            attestation,
            identity_sig,
        ),
    );

    let config = sapient_wallet(&manager);
    let provider = StateProvider::new(Arc::new(MemoryStore::new()))
        .with_sapient_signer(Arc::clone(&manager) as Arc<dyn SapientSigner>);
    let wallet = provider.save_wallet(&config, &Context::dev()).await.unwrap();

    let payload = Payload::calls(vec![Call::new(
        Address::repeat_byte(0x44),
        U256::ZERO,
        Bytes::new(),
    )]);
    let session_signature = manager
        .sign_sapient(wallet, 1, &payload, manager.image_hash())
        .await
        .unwrap();

    let topology = SignatureTopology::Sapient {
        address: manager.address(),
        weight: 1,
        image_hash: manager.image_hash(),
        signature: Some(session_signature),
    };
    provider
        .save_witnesses(wallet, 1, &payload, &topology)
        .await
        .unwrap();

    let witnesses = provider
        .get_wallets_for_sapient(manager.address(), manager.image_hash())
        .await
        .unwrap();
    assert_eq!(witnesses.len(), 1);
    assert_eq!(witnesses[0].wallet, wallet);
    assert!(matches!(witnesses[0].signature, SignerSignature::Sapient(_)));
}

#[tokio::test]
async fn test_invalid_sapient_witness_is_not_recorded() {
    let identity = key(1);
    let session = key(2);
    let topology = SessionTopology::new(signer_address(&identity));
    let (attestation, identity_sig) = attest(&identity, &session);
    let manager = Arc::new(
        SessionManager::new(sessions_extension(), topology).with_implicit_signer(
            session,
            attestation,
            identity_sig,
        ),
    );

    let config = sapient_wallet(&manager);
    let provider = StateProvider::new(Arc::new(MemoryStore::new()))
        .with_sapient_signer(Arc::clone(&manager) as Arc<dyn SapientSigner>);
    let wallet = provider.save_wallet(&config, &Context::dev()).await.unwrap();

    let payload = Payload::calls(vec![Call::new(
        Address::repeat_byte(0x44),
        U256::ZERO,
        Bytes::new(),
    )]);
    let topology = SignatureTopology::Sapient {
        address: manager.address(),
        weight: 1,
        image_hash: manager.image_hash(),
        signature: Some(Bytes::from_static(&[0xde, 0xad])),
    };
    // Invalid leaves are skipped, not fatal
    provider
        .save_witnesses(wallet, 1, &payload, &topology)
        .await
        .unwrap();

    assert!(provider
        .get_wallets_for_sapient(manager.address(), manager.image_hash())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_explicit_session_end_to_end_with_usage_limit() {
    let identity = key(1);
    let session = key(3);
    let token = Address::repeat_byte(0x70);
    let recipient = Address::repeat_byte(0x11);

    let permission = PermissionBuilder::for_target(token)
        .for_function("function transfer(address to, uint256 amount)")
        .where_equal("to", wallet_core::abi::word_from_address(recipient))
        .where_cumulative("amount", U256::from(100u64))
        .build()
        .unwrap();
    let topology = SessionTopology::new(signer_address(&identity)).with_explicit(
        SessionPermissions {
            signer: signer_address(&session),
            value_limit: U256::ZERO,
            deadline: 0,
            permissions: vec![permission.clone()],
        },
    );
    let manager = SessionManager::new(sessions_extension(), topology)
        .with_explicit_signer(session.clone());

    let mut data = Vec::new();
    data.extend_from_slice(&wallet_core::abi::selector("transfer(address,uint256)"));
    data.extend_from_slice(wallet_core::abi::word_from_address(recipient).as_slice());
    data.extend_from_slice(&U256::from(40u64).to_be_bytes::<32>());
    let transfer = Call::new(token, U256::ZERO, Bytes::from(data));

    // Cumulative rule 2 is the amount rule (0 selector, 1 recipient)
    let expected_hash: B256 = usage_hash(signer_address(&session), &permission, 2);
    let increment = Call::new(
        sessions_extension(),
        U256::ZERO,
        wallet_core::abi::encode_increment_usage_limit(&[(expected_hash, U256::from(40u64))]),
    );

    let wallet = Address::repeat_byte(0xaa);
    let payload = Payload::calls(vec![transfer, increment]);
    let signature = manager
        .sign_sapient(wallet, 1, &payload, manager.image_hash())
        .await
        .unwrap();
    let recovered = manager
        .is_valid_sapient_signature(wallet, 1, &payload, &signature)
        .await
        .unwrap();
    assert_eq!(recovered, manager.image_hash());
}

#[tokio::test]
async fn test_one_unqualified_call_rejects_the_batch() {
    let identity = key(1);
    let session = key(3);
    let token = Address::repeat_byte(0x70);

    let topology = SessionTopology::new(signer_address(&identity)).with_explicit(
        SessionPermissions {
            signer: signer_address(&session),
            value_limit: U256::ZERO,
            deadline: 0,
            permissions: vec![PermissionBuilder::for_target(token)
                .allow_all()
                .build()
                .unwrap()],
        },
    );
    let manager =
        SessionManager::new(sessions_extension(), topology).with_explicit_signer(session);

    let payload = Payload::calls(vec![
        Call::new(token, U256::ZERO, Bytes::new()),
        // No permission covers this target
        Call::new(Address::repeat_byte(0x99), U256::ZERO, Bytes::new()),
    ]);
    let err = manager
        .sign_sapient(
            Address::repeat_byte(0xaa),
            1,
            &payload,
            manager.image_hash(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoQualifyingSigner { call_index: 1 }));
}
