//! Core types for wallet configuration and signing
//!
//! This module defines the fundamental primitives used throughout the
//! engine: keccak hashing, recoverable ECDSA signatures, the collected
//! per-leaf signature union and the counterfactual deployment context.

use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes};
use k256::ecdsa::{RecoveryId, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

/// Prefix applied by `eth_sign` / `personal_sign` before hashing a 32-byte
/// digest
pub const ETH_SIGN_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Compute keccak256 of the input
pub fn keccak256_hash(data: &[u8]) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    B256::from(out)
}

/// Compute keccak256 over the concatenation of several byte slices without
/// allocating an intermediate buffer
pub fn keccak256_concat(parts: &[&[u8]]) -> B256 {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    B256::from(out)
}

/// Digest actually signed when a signer uses `eth_sign` over a subdigest
pub fn eth_sign_digest(digest: &B256) -> B256 {
    keccak256_concat(&[ETH_SIGN_PREFIX, digest.as_slice()])
}

/// Ethereum address of a secp256k1 public key
pub fn address_from_public_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256_hash(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Ethereum address of a secp256k1 signing key
pub fn signer_address(key: &SigningKey) -> Address {
    address_from_public_key(key.verifying_key())
}

// ============================================================================
// Signatures
// ============================================================================

/// Recoverable ECDSA signature (r, s, v) with v in {27, 28}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaSignature {
    /// R component (32 bytes)
    pub r: B256,
    /// S component (32 bytes)
    pub s: B256,
    /// Recovery byte (27 or 28)
    pub v: u8,
}

impl EcdsaSignature {
    /// Create a new signature
    pub fn new(r: B256, s: B256, v: u8) -> Self {
        Self { r, s, v }
    }

    /// Sign a 32-byte digest with the given key
    pub fn sign(key: &SigningKey, digest: &B256) -> Result<Self> {
        let (sig, recovery_id) = key.sign_prehash_recoverable(digest.as_slice())?;
        let bytes = sig.to_bytes();
        Ok(Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..]),
            v: recovery_id.to_byte() + 27,
        })
    }

    /// Recover the signer address for a 32-byte digest
    pub fn recover(&self, digest: &B256) -> Result<Address> {
        let sig = k256::ecdsa::Signature::from_scalars(
            *k256::FieldBytes::from_slice(self.r.as_slice()),
            *k256::FieldBytes::from_slice(self.s.as_slice()),
        )?;
        let recovery_id = RecoveryId::from_byte(self.v.wrapping_sub(27))
            .ok_or_else(|| Error::InvalidSignature(format!("invalid v byte: {}", self.v)))?;
        let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recovery_id)?;
        Ok(address_from_public_key(&key))
    }

    /// Recover the signer address assuming the digest was wrapped by
    /// `eth_sign` before signing
    pub fn recover_eth_sign(&self, digest: &B256) -> Result<Address> {
        self.recover(&eth_sign_digest(digest))
    }

    /// Serialize to the 65-byte r || s || v layout
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    /// Parse the 65-byte r || s || v layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::Encoding(format!(
                "expected 65 signature bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..64]),
            v: bytes[64],
        })
    }
}

/// Signature collected for a single signer or sapient leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignerSignature {
    /// ECDSA over the raw subdigest
    Hash(EcdsaSignature),
    /// ECDSA over the `eth_sign`-prefixed subdigest
    EthSign(EcdsaSignature),
    /// Opaque signature verified by an external sapient algorithm
    Sapient(Bytes),
}

impl SignerSignature {
    /// Recover the signer address for a subdigest
    ///
    /// Sapient signatures carry no recoverable address; callers resolve them
    /// through their registered verification algorithm instead.
    pub fn recover(&self, subdigest: &B256) -> Result<Address> {
        match self {
            SignerSignature::Hash(sig) => sig.recover(subdigest),
            SignerSignature::EthSign(sig) => sig.recover_eth_sign(subdigest),
            SignerSignature::Sapient(_) => Err(Error::Unsupported(
                "sapient signatures are not address-recoverable".to_string(),
            )),
        }
    }
}

// ============================================================================
// Deployment Context
// ============================================================================

/// Deployment context for counterfactual wallet addresses
///
/// A wallet address is fully determined by its initial image hash and this
/// context; the wallet does not need to be deployed for the address to be
/// valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Factory contract that performs the CREATE2 deployment
    pub factory: Address,
    /// Initial wallet implementation installed by the factory
    pub main_module: Address,
    /// Wallet proxy creation code
    pub creation_code: Bytes,
}

impl Context {
    /// Create a new deployment context
    pub fn new(factory: Address, main_module: Address, creation_code: Bytes) -> Self {
        Self {
            factory,
            main_module,
            creation_code,
        }
    }

    /// Fixed context used by unit tests and local development
    pub fn dev() -> Self {
        Self {
            factory: Address::repeat_byte(0xfa),
            main_module: Address::repeat_byte(0x51),
            creation_code: Bytes::from_static(&[0x60, 0x3d, 0x60, 0x0a, 0x3d, 0x39, 0xf3]),
        }
    }
}

/// Derive the counterfactual wallet address for an image hash
///
/// CREATE2: `address = keccak256(0xff || factory || imageHash || keccak256(creationCode || mainModule))[12..]`
/// with the image hash as the salt.
pub fn wallet_address(image_hash: &B256, context: &Context) -> Address {
    let mut module_word = [0u8; 32];
    module_word[12..].copy_from_slice(context.main_module.as_slice());
    let init_code_hash = keccak256_concat(&[&context.creation_code, &module_word]);

    let hash = keccak256_concat(&[
        &[0xff],
        context.factory.as_slice(),
        image_hash.as_slice(),
        init_code_hash.as_slice(),
    ]);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).expect("valid test key")
    }

    #[test]
    fn test_keccak256_known_vector() {
        // keccak256("") is a well-known constant
        let hash = keccak256_hash(b"");
        assert_eq!(
            hex::encode(hash),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_concat_matches_single_pass() {
        let joined = keccak256_hash(b"hello world");
        let concat = keccak256_concat(&[b"hello", b" ", b"world"]);
        assert_eq!(joined, concat);
    }

    #[test]
    fn test_sign_and_recover() {
        let key = test_key(0x01);
        let digest = keccak256_hash(b"message");

        let sig = EcdsaSignature::sign(&key, &digest).unwrap();
        assert!(sig.v == 27 || sig.v == 28);

        let recovered = sig.recover(&digest).unwrap();
        assert_eq!(recovered, signer_address(&key));
    }

    #[test]
    fn test_eth_sign_recovery_uses_prefix() {
        let key = test_key(0x02);
        let digest = keccak256_hash(b"message");

        let sig = EcdsaSignature::sign(&key, &eth_sign_digest(&digest)).unwrap();
        assert_eq!(sig.recover_eth_sign(&digest).unwrap(), signer_address(&key));
        // Recovering without the prefix must not yield the same signer
        assert_ne!(sig.recover(&digest).unwrap(), signer_address(&key));
    }

    #[test]
    fn test_signature_byte_round_trip() {
        let key = test_key(0x03);
        let digest = keccak256_hash(b"round trip");
        let sig = EcdsaSignature::sign(&key, &digest).unwrap();

        let parsed = EcdsaSignature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_wallet_address_is_deterministic() {
        let context = Context::dev();
        let image_hash = B256::repeat_byte(0x11);

        let a = wallet_address(&image_hash, &context);
        let b = wallet_address(&image_hash, &context);
        assert_eq!(a, b);

        let other = wallet_address(&B256::repeat_byte(0x22), &context);
        assert_ne!(a, other);
    }
}
