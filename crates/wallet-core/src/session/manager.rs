//! Session manager: the sapient signer behind session topologies
//!
//! The manager holds live session keys. Implicit credentials carry an
//! attestation signed by the topology's identity signer and may call any
//! non-blacklisted target without delegate calls; explicit credentials are
//! bound to a permission entry of the topology with value and deadline
//! limits. Each call of a payload is signed by exactly one qualifying
//! session key, implicit keys taking priority, and a single unqualifiable
//! call rejects the whole payload.
//!
//! ## Aggregate signature layout
//!
//! ```text
//! [u8 attestation count]
//! per attestation: [u16 length][packed attestation][65-byte identity sig]
//! per call, in payload order:
//!   [u8 kind: 0x00 implicit / 0x01 explicit]
//!   [20-byte session signer]
//!   [65-byte signature over the call digest]
//! ```
//!
//! The topology itself is not carried in the signature; verifiers resolve it
//! from the image hash they already trust.

use super::topology::{Attestation, SessionTopology};
use crate::abi::{encode_increment_usage_limit, selectors, word_from_u64};
use crate::extensions::SapientSigner;
use crate::payload::{subdigest, Call, Payload};
use crate::permission::usage_hash;
use crate::types::{keccak256_concat, signer_address, EcdsaSignature};
use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::SigningKey;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Digest a session key signs for one call of a payload
pub fn call_digest(wallet: Address, chain_id: u64, payload: &Payload, index: usize) -> B256 {
    keccak256_concat(&[
        b"Session call:\n",
        subdigest(wallet, chain_id, payload).as_slice(),
        word_from_u64(index as u64).as_slice(),
    ])
}

struct ImplicitCredential {
    key: SigningKey,
    attestation: Attestation,
    identity_signature: EcdsaSignature,
}

struct CallSignature {
    implicit: bool,
    signer: Address,
    signature: EcdsaSignature,
}

struct SessionSignature {
    attestations: Vec<(Attestation, EcdsaSignature)>,
    calls: Vec<CallSignature>,
}

impl SessionSignature {
    fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        out.push(self.attestations.len() as u8);
        for (attestation, signature) in &self.attestations {
            let packed = attestation.encode_packed();
            out.extend_from_slice(&(packed.len() as u16).to_be_bytes());
            out.extend_from_slice(&packed);
            out.extend_from_slice(&signature.to_bytes());
        }
        for call in &self.calls {
            out.push(call.implicit as u8 ^ 1);
            out.extend_from_slice(call.signer.as_slice());
            out.extend_from_slice(&call.signature.to_bytes());
        }
        Bytes::from(out)
    }

    fn decode(data: &[u8], call_count: usize) -> Result<Self> {
        let truncated = || Error::Deserialization("truncated session signature".to_string());
        let mut pos = 0;
        let attestation_count = *data.first().ok_or_else(truncated)? as usize;
        pos += 1;

        let mut attestations = Vec::with_capacity(attestation_count);
        for _ in 0..attestation_count {
            if data.len() < pos + 2 {
                return Err(truncated());
            }
            let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if data.len() < pos + len + 65 {
                return Err(truncated());
            }
            let (attestation, consumed) = Attestation::decode_packed(&data[pos..pos + len])?;
            if consumed != len {
                return Err(Error::Deserialization(
                    "attestation length mismatch in session signature".to_string(),
                ));
            }
            pos += len;
            let signature = EcdsaSignature::from_bytes(&data[pos..pos + 65])?;
            pos += 65;
            attestations.push((attestation, signature));
        }

        if data.len() != pos + call_count * 86 {
            return Err(Error::Deserialization(format!(
                "session signature carries {} bytes of call signatures, want {}",
                data.len() - pos,
                call_count * 86
            )));
        }
        let mut calls = Vec::with_capacity(call_count);
        for _ in 0..call_count {
            let implicit = match data[pos] {
                0x00 => true,
                0x01 => false,
                other => {
                    return Err(Error::Deserialization(format!(
                        "unknown session signer kind 0x{other:02x}"
                    )))
                }
            };
            let signer = Address::from_slice(&data[pos + 1..pos + 21]);
            let signature = EcdsaSignature::from_bytes(&data[pos + 21..pos + 86])?;
            pos += 86;
            calls.push(CallSignature {
                implicit,
                signer,
                signature,
            });
        }
        Ok(Self {
            attestations,
            calls,
        })
    }
}

/// Running per-payload accounting shared by signing and verification
#[derive(Default)]
struct BatchState {
    increments: Vec<(B256, U256)>,
    used_hashes: HashSet<B256>,
    value_used: HashMap<Address, U256>,
    increments_consumed: bool,
}

/// Sapient signer producing and validating aggregate session signatures
pub struct SessionManager {
    address: Address,
    topology: SessionTopology,
    implicit: Vec<ImplicitCredential>,
    explicit: Vec<SigningKey>,
}

impl SessionManager {
    /// New manager for the session extension at `address`
    pub fn new(address: Address, topology: SessionTopology) -> Self {
        Self {
            address,
            topology,
            implicit: Vec::new(),
            explicit: Vec::new(),
        }
    }

    /// Add an implicit session key with its identity-signed attestation
    pub fn with_implicit_signer(
        mut self,
        key: SigningKey,
        attestation: Attestation,
        identity_signature: EcdsaSignature,
    ) -> Self {
        self.implicit.push(ImplicitCredential {
            key,
            attestation,
            identity_signature,
        });
        self
    }

    /// Add an explicit session key; its entry must exist in the topology
    pub fn with_explicit_signer(mut self, key: SigningKey) -> Self {
        self.explicit.push(key);
        self
    }

    /// The manager's topology
    pub fn topology(&self) -> &SessionTopology {
        &self.topology
    }

    fn is_increment_call(&self, call: &Call) -> bool {
        call.to == self.address && call.data.starts_with(&selectors::increment_usage_limit())
    }

    /// Verify the trailing `incrementUsageLimit` call against the usage
    /// accumulated by the preceding calls
    fn check_increment_call(
        &self,
        call: &Call,
        index: usize,
        call_count: usize,
        state: &mut BatchState,
    ) -> Result<()> {
        if index + 1 != call_count {
            return Err(Error::IncrementMismatch(
                "incrementUsageLimit must be the final call".to_string(),
            ));
        }
        if call.delegate_call {
            return Err(Error::IncrementMismatch(
                "incrementUsageLimit cannot be a delegate call".to_string(),
            ));
        }
        if state.increments.is_empty() {
            return Err(Error::IncrementMismatch(
                "incrementUsageLimit call without any cumulative usage".to_string(),
            ));
        }
        let expected = encode_increment_usage_limit(&state.increments);
        if call.data != expected {
            return Err(Error::IncrementMismatch(
                "incrementUsageLimit calldata does not match accumulated usage".to_string(),
            ));
        }
        state.increments_consumed = true;
        Ok(())
    }

    /// Record an explicit signer's usage of a call: value limit, deadline and
    /// cumulative rule accounting
    fn account_explicit_use(
        &self,
        signer: Address,
        call: &Call,
        now: u64,
        state: &mut BatchState,
    ) -> Result<bool> {
        let Some(entry) = self.topology.explicit_for(signer) else {
            return Ok(false);
        };
        if !entry.is_active(now) {
            return Ok(false);
        }
        let used = state.value_used.get(&signer).copied().unwrap_or(U256::ZERO);
        let Some(total) = used.checked_add(call.value) else {
            return Ok(false);
        };
        if total > entry.value_limit {
            return Ok(false);
        }
        let Some((_, permission)) = entry.permission_for(call) else {
            return Ok(false);
        };

        for (rule_index, rule) in permission.rules.iter().enumerate() {
            if !rule.cumulative {
                continue;
            }
            let key = usage_hash(signer, permission, rule_index);
            if !state.used_hashes.insert(key) {
                return Err(Error::DuplicateUsageHash(key));
            }
            state.increments.push((key, rule.masked_amount(&call.data)));
        }
        state.value_used.insert(signer, total);
        Ok(true)
    }

    fn qualifying_implicit(&self, call: &Call) -> Option<&ImplicitCredential> {
        if call.delegate_call || self.topology.is_blacklisted(call.to) {
            return None;
        }
        self.implicit.iter().find(|credential| {
            credential.attestation.approved_signer == signer_address(&credential.key)
                && credential
                    .identity_signature
                    .recover(&credential.attestation.hash())
                    .map(|recovered| recovered == self.topology.identity_signer)
                    .unwrap_or(false)
        })
    }

    fn require_calls<'a>(&self, payload: &'a Payload) -> Result<&'a [Call]> {
        match payload {
            Payload::Calls { calls, .. } if !calls.is_empty() => Ok(calls),
            Payload::Calls { .. } => Err(Error::Unsupported(
                "session manager cannot sign an empty calls payload".to_string(),
            )),
            _ => Err(Error::Unsupported(
                "session manager signs Calls payloads only".to_string(),
            )),
        }
    }
}

#[async_trait]
impl SapientSigner for SessionManager {
    fn address(&self) -> Address {
        self.address
    }

    fn image_hash(&self) -> B256 {
        self.topology.image_hash()
    }

    async fn sign_sapient(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
        image_hash: B256,
    ) -> Result<Bytes> {
        if image_hash != self.topology.image_hash() {
            return Err(Error::ImageHashMismatch {
                expected: image_hash,
                actual: self.topology.image_hash(),
            });
        }
        let calls = self.require_calls(payload)?;
        let now = current_timestamp();

        let mut state = BatchState::default();
        let mut attestations: Vec<(Attestation, EcdsaSignature)> = Vec::new();
        let mut call_signatures = Vec::with_capacity(calls.len());
        let mut last_explicit: Option<&SigningKey> = None;

        for (index, call) in calls.iter().enumerate() {
            let digest = call_digest(wallet, chain_id, payload, index);

            if self.is_increment_call(call) {
                self.check_increment_call(call, index, calls.len(), &mut state)?;
                let key = last_explicit.ok_or_else(|| {
                    Error::IncrementMismatch(
                        "usage increment call without a preceding explicit signer".to_string(),
                    )
                })?;
                call_signatures.push(CallSignature {
                    implicit: false,
                    signer: signer_address(key),
                    signature: EcdsaSignature::sign(key, &digest)?,
                });
                continue;
            }

            if let Some(credential) = self.qualifying_implicit(call) {
                let signer = signer_address(&credential.key);
                debug!(call = index, %signer, "signing call with implicit session key");
                if !attestations
                    .iter()
                    .any(|(attestation, _)| attestation.approved_signer == signer)
                {
                    attestations.push((
                        credential.attestation.clone(),
                        credential.identity_signature.clone(),
                    ));
                }
                call_signatures.push(CallSignature {
                    implicit: true,
                    signer,
                    signature: EcdsaSignature::sign(&credential.key, &digest)?,
                });
                continue;
            }

            let mut signed = false;
            for key in &self.explicit {
                let signer = signer_address(key);
                if self.account_explicit_use(signer, call, now, &mut state)? {
                    debug!(call = index, %signer, "signing call with explicit session key");
                    call_signatures.push(CallSignature {
                        implicit: false,
                        signer,
                        signature: EcdsaSignature::sign(key, &digest)?,
                    });
                    last_explicit = Some(key);
                    signed = true;
                    break;
                }
            }
            if !signed {
                return Err(Error::NoQualifyingSigner { call_index: index });
            }
        }

        if !state.increments.is_empty() && !state.increments_consumed {
            return Err(Error::IncrementMismatch(
                "cumulative usage requires a trailing incrementUsageLimit call".to_string(),
            ));
        }

        Ok(SessionSignature {
            attestations,
            calls: call_signatures,
        }
        .encode())
    }

    async fn is_valid_sapient_signature(
        &self,
        wallet: Address,
        chain_id: u64,
        payload: &Payload,
        signature: &Bytes,
    ) -> Result<B256> {
        let calls = self.require_calls(payload)?;
        let decoded = SessionSignature::decode(signature, calls.len())?;
        let now = current_timestamp();

        let mut approved: HashMap<Address, &Attestation> = HashMap::new();
        for (attestation, identity_signature) in &decoded.attestations {
            let recovered = identity_signature.recover(&attestation.hash())?;
            if recovered != self.topology.identity_signer {
                return Err(Error::SignerMismatch {
                    expected: self.topology.identity_signer,
                    recovered,
                });
            }
            approved.insert(attestation.approved_signer, attestation);
        }

        let mut state = BatchState::default();
        for (index, (call, call_signature)) in calls.iter().zip(&decoded.calls).enumerate() {
            let digest = call_digest(wallet, chain_id, payload, index);
            let recovered = call_signature.signature.recover(&digest)?;
            if recovered != call_signature.signer {
                return Err(Error::SignerMismatch {
                    expected: call_signature.signer,
                    recovered,
                });
            }

            // Same precedence as signing: the increment call is checked
            // before any signer kind, so tagging it implicit cannot skip the
            // usage verification
            if self.is_increment_call(call) {
                self.check_increment_call(call, index, calls.len(), &mut state)?;
                if self.topology.explicit_for(call_signature.signer).is_none() {
                    return Err(Error::NoQualifyingSigner { call_index: index });
                }
                continue;
            }

            if call_signature.implicit {
                if !approved.contains_key(&call_signature.signer) {
                    return Err(Error::InvalidSignature(format!(
                        "implicit signer {} has no attestation",
                        call_signature.signer
                    )));
                }
                if call.delegate_call || self.topology.is_blacklisted(call.to) {
                    return Err(Error::NoQualifyingSigner { call_index: index });
                }
                continue;
            }

            if !self.account_explicit_use(call_signature.signer, call, now, &mut state)? {
                return Err(Error::NoQualifyingSigner { call_index: index });
            }
        }

        if !state.increments.is_empty() && !state.increments_consumed {
            return Err(Error::IncrementMismatch(
                "cumulative usage requires a trailing incrementUsageLimit call".to_string(),
            ));
        }

        Ok(self.topology.image_hash())
    }
}

fn current_timestamp() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
