//! # Signature Topologies & Wire Encoding
//!
//! A signature topology is structurally isomorphic to a configuration's
//! signer tree, with signer and sapient leaves additionally carrying a
//! collected signature (or nothing, when still unfilled). `fill_leaves`
//! produces one from a resolver; the [`RawSignature`] envelope serializes it
//! into the byte layout consumed by the on-chain verifier.
//!
//! ## Wire format
//!
//! The envelope layout is a fixed external contract:
//!
//! ```text
//! flags(1)        bit0 = noChainId, bit1 = ERC-6492 wrapper, bit2 = suffix
//! threshold(2)    big endian
//! checkpoint(8)   big endian
//! topology        tag-prefixed recursive node encoding:
//!   0x00 signer, unsigned:    address(20) weight(1)
//!   0x01 signer, hash-signed: address(20) weight(1) r(32) s(32) v(1)
//!   0x02 signer, eth_sign:    address(20) weight(1) r(32) s(32) v(1)
//!   0x03 sapient, unsigned:   address(20) weight(1) imageHash(32)
//!   0x04 sapient, signed:     address(20) weight(1) imageHash(32) len(3) data
//!   0x05 nested:              weight(1) threshold(2) subtree
//!   0x06 subdigest:           digest(32)
//!   0x07 node hash:           hash(32)
//!   0x08 branch:              left-node right-node
//! [erc6492]       to(20) len(3) data
//! [suffix]        count(1), each entry: len(3) + encoded RawSignature
//! ```
//!
//! Every node is self-delimiting, so branches and nested subtrees need no
//! length prefix of their own.

use crate::config::Topology;
use crate::types::{EcdsaSignature, SignerSignature};
use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

const FLAG_NO_CHAIN_ID: u8 = 0b0000_0001;
const FLAG_ERC6492: u8 = 0b0000_0010;
const FLAG_SUFFIX: u8 = 0b0000_0100;

/// Maximum nesting the decoder accepts, for topology nodes and suffix
/// envelopes alike. Envelope bytes come from untrusted peers; without a
/// bound, a run of nested/branch tags recurses once per level and overflows
/// the stack instead of returning an error.
const MAX_DECODE_DEPTH: usize = 256;

/// Configuration tree with collected signatures at its signer leaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignatureTopology {
    Signer {
        address: Address,
        weight: u8,
        signature: Option<SignerSignature>,
    },
    Sapient {
        address: Address,
        weight: u8,
        image_hash: B256,
        signature: Option<Bytes>,
    },
    Nested {
        weight: u8,
        threshold: u16,
        tree: Box<SignatureTopology>,
    },
    Subdigest {
        digest: B256,
    },
    Node {
        left: Box<SignatureTopology>,
        right: Box<SignatureTopology>,
    },
    NodeHash {
        hash: B256,
    },
}

impl SignatureTopology {
    /// Build an unfilled signature topology from a configuration tree
    pub fn unsigned(topology: &Topology) -> Self {
        match topology {
            Topology::Signer { address, weight } => SignatureTopology::Signer {
                address: *address,
                weight: *weight,
                signature: None,
            },
            Topology::Sapient {
                address,
                weight,
                image_hash,
            } => SignatureTopology::Sapient {
                address: *address,
                weight: *weight,
                image_hash: *image_hash,
                signature: None,
            },
            Topology::Nested {
                weight,
                threshold,
                tree,
            } => SignatureTopology::Nested {
                weight: *weight,
                threshold: *threshold,
                tree: Box::new(Self::unsigned(tree)),
            },
            Topology::Subdigest { digest } => SignatureTopology::Subdigest { digest: *digest },
            Topology::Node { left, right } => SignatureTopology::Node {
                left: Box::new(Self::unsigned(left)),
                right: Box::new(Self::unsigned(right)),
            },
            Topology::NodeHash { hash } => SignatureTopology::NodeHash { hash: *hash },
        }
    }

    /// Strip collected signatures, recovering the plain configuration tree
    pub fn topology(&self) -> Topology {
        match self {
            SignatureTopology::Signer {
                address, weight, ..
            } => Topology::Signer {
                address: *address,
                weight: *weight,
            },
            SignatureTopology::Sapient {
                address,
                weight,
                image_hash,
                ..
            } => Topology::Sapient {
                address: *address,
                weight: *weight,
                image_hash: *image_hash,
            },
            SignatureTopology::Nested {
                weight,
                threshold,
                tree,
            } => Topology::Nested {
                weight: *weight,
                threshold: *threshold,
                tree: Box::new(tree.topology()),
            },
            SignatureTopology::Subdigest { digest } => Topology::Subdigest { digest: *digest },
            SignatureTopology::Node { left, right } => Topology::Node {
                left: Box::new(left.topology()),
                right: Box::new(right.topology()),
            },
            SignatureTopology::NodeHash { hash } => Topology::NodeHash { hash: *hash },
        }
    }

    /// Hash of the underlying configuration tree
    pub fn hash(&self) -> B256 {
        self.topology().hash()
    }

    /// Aggregated weight of the leaves that carry a signature
    ///
    /// A nested subtree contributes its weight only when its own threshold
    /// is met; subdigest and redacted leaves carry no signer and contribute
    /// nothing.
    pub fn weight(&self) -> u64 {
        match self {
            SignatureTopology::Signer {
                weight, signature, ..
            } => signature.as_ref().map_or(0, |_| *weight as u64),
            SignatureTopology::Sapient {
                weight, signature, ..
            } => signature.as_ref().map_or(0, |_| *weight as u64),
            SignatureTopology::Nested {
                weight,
                threshold,
                tree,
            } => {
                if tree.weight() >= *threshold as u64 {
                    *weight as u64
                } else {
                    0
                }
            }
            SignatureTopology::Subdigest { .. } | SignatureTopology::NodeHash { .. } => 0,
            SignatureTopology::Node { left, right } => left.weight() + right.weight(),
        }
    }
}

/// Walk a configuration tree, resolving a signature for each signer and
/// sapient leaf
///
/// Returns the isomorphic signature topology together with the aggregated
/// matched weight. Used both to produce a final signature and to score
/// whether a candidate update already carries enough weight.
pub fn fill_leaves<F>(topology: &Topology, resolve: &F) -> (SignatureTopology, u64)
where
    F: Fn(&Topology) -> Option<SignerSignature>,
{
    match topology {
        Topology::Signer { address, weight } => {
            // Only address-recoverable signature kinds fit a plain signer leaf
            let signature = resolve(topology).filter(|sig| {
                matches!(sig, SignerSignature::Hash(_) | SignerSignature::EthSign(_))
            });
            let filled = signature.is_some();
            (
                SignatureTopology::Signer {
                    address: *address,
                    weight: *weight,
                    signature,
                },
                if filled { *weight as u64 } else { 0 },
            )
        }
        Topology::Sapient {
            address,
            weight,
            image_hash,
        } => {
            let signature = match resolve(topology) {
                Some(SignerSignature::Sapient(data)) => Some(data),
                _ => None,
            };
            let filled = signature.is_some();
            (
                SignatureTopology::Sapient {
                    address: *address,
                    weight: *weight,
                    image_hash: *image_hash,
                    signature,
                },
                if filled { *weight as u64 } else { 0 },
            )
        }
        Topology::Nested {
            weight,
            threshold,
            tree,
        } => {
            let (filled, inner_weight) = fill_leaves(tree, resolve);
            let contributed = if inner_weight >= *threshold as u64 {
                *weight as u64
            } else {
                0
            };
            (
                SignatureTopology::Nested {
                    weight: *weight,
                    threshold: *threshold,
                    tree: Box::new(filled),
                },
                contributed,
            )
        }
        Topology::Subdigest { digest } => (SignatureTopology::Subdigest { digest: *digest }, 0),
        Topology::Node { left, right } => {
            let (left_filled, left_weight) = fill_leaves(left, resolve);
            let (right_filled, right_weight) = fill_leaves(right, resolve);
            (
                SignatureTopology::Node {
                    left: Box::new(left_filled),
                    right: Box::new(right_filled),
                },
                left_weight + right_weight,
            )
        }
        Topology::NodeHash { hash } => (SignatureTopology::NodeHash { hash: *hash }, 0),
    }
}

// ============================================================================
// Signature Envelope
// ============================================================================

/// Configuration with its signature topology, as carried by an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedConfiguration {
    pub threshold: u16,
    pub checkpoint: u64,
    pub topology: SignatureTopology,
}

impl SignedConfiguration {
    /// Image hash of the underlying configuration
    pub fn image_hash(&self) -> B256 {
        crate::config::Configuration {
            threshold: self.threshold,
            checkpoint: self.checkpoint,
            topology: self.topology.topology(),
        }
        .image_hash()
    }

    /// Aggregated weight of the collected signatures
    pub fn weight(&self) -> u64 {
        self.topology.weight()
    }

    /// Require the collected weight to meet the threshold
    pub fn validate_weight(&self) -> Result<u64> {
        let actual = self.weight();
        let required = self.threshold as u64;
        if actual < required {
            return Err(Error::InsufficientWeight { required, actual });
        }
        Ok(actual)
    }
}

/// ERC-6492 deployment wrapper for signatures of undeployed wallets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc6492 {
    /// Factory to call before verifying
    pub to: Address,
    /// Deployment calldata
    pub data: Bytes,
}

/// Full signature envelope in the on-chain wire layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignature {
    /// Signature is valid on any chain (chain id 0 domain)
    pub no_chain_id: bool,
    /// Configuration and collected signatures
    pub configuration: SignedConfiguration,
    /// Optional deployment wrapper
    pub erc6492: Option<Erc6492>,
    /// Pending configuration-update signatures replayed after this one
    pub suffix: Vec<RawSignature>,
}

impl RawSignature {
    /// Envelope without wrapper or suffix
    pub fn simple(no_chain_id: bool, configuration: SignedConfiguration) -> Self {
        Self {
            no_chain_id,
            configuration,
            erc6492: None,
            suffix: Vec::new(),
        }
    }

    /// Serialize into the wire layout
    pub fn encode(&self) -> Result<Bytes> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(Bytes::from(out))
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut flags = 0u8;
        if self.no_chain_id {
            flags |= FLAG_NO_CHAIN_ID;
        }
        if self.erc6492.is_some() {
            flags |= FLAG_ERC6492;
        }
        if !self.suffix.is_empty() {
            flags |= FLAG_SUFFIX;
        }
        out.push(flags);
        out.extend_from_slice(&self.configuration.threshold.to_be_bytes());
        out.extend_from_slice(&self.configuration.checkpoint.to_be_bytes());
        encode_topology(&self.configuration.topology, out)?;

        if let Some(erc6492) = &self.erc6492 {
            out.extend_from_slice(erc6492.to.as_slice());
            push_len(out, erc6492.data.len())?;
            out.extend_from_slice(&erc6492.data);
        }

        if !self.suffix.is_empty() {
            if self.suffix.len() > u8::MAX as usize {
                return Err(Error::Encoding("too many suffix signatures".to_string()));
            }
            out.push(self.suffix.len() as u8);
            for entry in &self.suffix {
                let encoded = entry.encode()?;
                push_len(out, encoded.len())?;
                out.extend_from_slice(&encoded);
            }
        }
        Ok(())
    }

    /// Parse an envelope from its wire layout
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_at(data, 0)
    }

    fn decode_at(data: &[u8], depth: usize) -> Result<Self> {
        let mut reader = Reader::new(data);
        let decoded = Self::decode_from(&mut reader, depth)?;
        reader.finish()?;
        Ok(decoded)
    }

    fn decode_from(reader: &mut Reader<'_>, depth: usize) -> Result<Self> {
        if depth > MAX_DECODE_DEPTH {
            return Err(Error::Encoding(format!(
                "suffix nesting exceeds {MAX_DECODE_DEPTH} levels"
            )));
        }
        let flags = reader.read_u8()?;
        let threshold = u16::from_be_bytes(reader.read_array::<2>()?);
        let checkpoint = u64::from_be_bytes(reader.read_array::<8>()?);
        let topology = decode_topology(reader, 0)?;

        let erc6492 = if flags & FLAG_ERC6492 != 0 {
            let to = reader.read_address()?;
            let len = reader.read_len()?;
            let data = Bytes::copy_from_slice(reader.read_slice(len)?);
            Some(Erc6492 { to, data })
        } else {
            None
        };

        let mut suffix = Vec::new();
        if flags & FLAG_SUFFIX != 0 {
            let count = reader.read_u8()?;
            for _ in 0..count {
                let len = reader.read_len()?;
                suffix.push(Self::decode_at(reader.read_slice(len)?, depth + 1)?);
            }
        }

        Ok(Self {
            no_chain_id: flags & FLAG_NO_CHAIN_ID != 0,
            configuration: SignedConfiguration {
                threshold,
                checkpoint,
                topology,
            },
            erc6492,
            suffix,
        })
    }
}

fn encode_topology(topology: &SignatureTopology, out: &mut Vec<u8>) -> Result<()> {
    match topology {
        SignatureTopology::Signer {
            address,
            weight,
            signature,
        } => match signature {
            None => {
                out.push(0x00);
                out.extend_from_slice(address.as_slice());
                out.push(*weight);
            }
            Some(SignerSignature::Hash(sig)) => {
                out.push(0x01);
                out.extend_from_slice(address.as_slice());
                out.push(*weight);
                out.extend_from_slice(&sig.to_bytes());
            }
            Some(SignerSignature::EthSign(sig)) => {
                out.push(0x02);
                out.extend_from_slice(address.as_slice());
                out.push(*weight);
                out.extend_from_slice(&sig.to_bytes());
            }
            Some(SignerSignature::Sapient(_)) => {
                return Err(Error::Encoding(
                    "sapient signature on a plain signer leaf".to_string(),
                ))
            }
        },
        SignatureTopology::Sapient {
            address,
            weight,
            image_hash,
            signature,
        } => {
            match signature {
                None => out.push(0x03),
                Some(_) => out.push(0x04),
            }
            out.extend_from_slice(address.as_slice());
            out.push(*weight);
            out.extend_from_slice(image_hash.as_slice());
            if let Some(data) = signature {
                push_len(out, data.len())?;
                out.extend_from_slice(data);
            }
        }
        SignatureTopology::Nested {
            weight,
            threshold,
            tree,
        } => {
            out.push(0x05);
            out.push(*weight);
            out.extend_from_slice(&threshold.to_be_bytes());
            encode_topology(tree, out)?;
        }
        SignatureTopology::Subdigest { digest } => {
            out.push(0x06);
            out.extend_from_slice(digest.as_slice());
        }
        SignatureTopology::NodeHash { hash } => {
            out.push(0x07);
            out.extend_from_slice(hash.as_slice());
        }
        SignatureTopology::Node { left, right } => {
            out.push(0x08);
            encode_topology(left, out)?;
            encode_topology(right, out)?;
        }
    }
    Ok(())
}

fn decode_topology(reader: &mut Reader<'_>, depth: usize) -> Result<SignatureTopology> {
    if depth > MAX_DECODE_DEPTH {
        return Err(Error::Encoding(format!(
            "topology nesting exceeds {MAX_DECODE_DEPTH} levels"
        )));
    }
    let tag = reader.read_u8()?;
    match tag {
        0x00 => Ok(SignatureTopology::Signer {
            address: reader.read_address()?,
            weight: reader.read_u8()?,
            signature: None,
        }),
        0x01 | 0x02 => {
            let address = reader.read_address()?;
            let weight = reader.read_u8()?;
            let sig = EcdsaSignature::from_bytes(reader.read_slice(65)?)?;
            let signature = if tag == 0x01 {
                SignerSignature::Hash(sig)
            } else {
                SignerSignature::EthSign(sig)
            };
            Ok(SignatureTopology::Signer {
                address,
                weight,
                signature: Some(signature),
            })
        }
        0x03 | 0x04 => {
            let address = reader.read_address()?;
            let weight = reader.read_u8()?;
            let image_hash = B256::from(reader.read_array::<32>()?);
            let signature = if tag == 0x04 {
                let len = reader.read_len()?;
                Some(Bytes::copy_from_slice(reader.read_slice(len)?))
            } else {
                None
            };
            Ok(SignatureTopology::Sapient {
                address,
                weight,
                image_hash,
                signature,
            })
        }
        0x05 => {
            let weight = reader.read_u8()?;
            let threshold = u16::from_be_bytes(reader.read_array::<2>()?);
            let tree = decode_topology(reader, depth + 1)?;
            Ok(SignatureTopology::Nested {
                weight,
                threshold,
                tree: Box::new(tree),
            })
        }
        0x06 => Ok(SignatureTopology::Subdigest {
            digest: B256::from(reader.read_array::<32>()?),
        }),
        0x07 => Ok(SignatureTopology::NodeHash {
            hash: B256::from(reader.read_array::<32>()?),
        }),
        0x08 => {
            let left = decode_topology(reader, depth + 1)?;
            let right = decode_topology(reader, depth + 1)?;
            Ok(SignatureTopology::Node {
                left: Box::new(left),
                right: Box::new(right),
            })
        }
        other => Err(Error::Encoding(format!("unknown topology tag {other:#04x}"))),
    }
}

fn push_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > 0xff_ffff {
        return Err(Error::Encoding(format!("length {len} exceeds u24")));
    }
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(Error::Encoding("truncated signature encoding".to_string()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    fn read_address(&mut self) -> Result<Address> {
        Ok(Address::from_slice(self.read_slice(20)?))
    }

    fn read_len(&mut self) -> Result<usize> {
        let bytes = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize)
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.data.len() {
            return Err(Error::Encoding(format!(
                "{} trailing bytes after signature",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
