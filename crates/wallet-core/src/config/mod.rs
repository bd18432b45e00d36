//! # Configuration Trees
//!
//! A wallet configuration is a weighted threshold signer set encoded as a
//! binary tree. The recursive hash of the tree (plus threshold and
//! checkpoint) is the configuration's **image hash**: its content-addressed
//! identity and primary storage key.
//!
//! Any subtree may be redacted down to its precomputed hash; two partial
//! views of the same logical tree can later be merged back together, always
//! preferring the more expanded branch.

pub mod signature;

use crate::types::keccak256_concat;
use crate::{Error, Result};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

// Domain-separation prefixes for leaf hashing
const SIGNER_PREFIX: &[u8] = b"Sequence signer:\n";
const SAPIENT_PREFIX: &[u8] = b"Sequence sapient config:\n";
const NESTED_PREFIX: &[u8] = b"Sequence nested config:\n";
const SUBDIGEST_PREFIX: &[u8] = b"Sequence static digest:\n";

/// Signer tree of a wallet configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Topology {
    /// Plain recoverable ECDSA signer
    Signer { address: Address, weight: u8 },
    /// Signer whose validity is decided by an external sapient algorithm,
    /// keyed by the algorithm's own image hash
    Sapient {
        address: Address,
        weight: u8,
        image_hash: B256,
    },
    /// A sub-configuration with its own threshold
    Nested {
        weight: u8,
        threshold: u16,
        tree: Box<Topology>,
    },
    /// Pins one specific subdigest unconditionally
    Subdigest { digest: B256 },
    /// Binary branch
    Node {
        left: Box<Topology>,
        right: Box<Topology>,
    },
    /// Redacted subtree known only by its hash
    NodeHash { hash: B256 },
}

impl Topology {
    /// Combine two subtrees into a branch
    pub fn node(left: Topology, right: Topology) -> Topology {
        Topology::Node {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Fold a non-empty list of leaves into a left-leaning binary tree
    pub fn from_leaves(leaves: Vec<Topology>) -> Result<Topology> {
        let mut iter = leaves.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::InvalidConfig("topology needs at least one leaf".to_string()))?;
        Ok(iter.fold(first, Topology::node))
    }

    /// Recursive hash of this (sub)tree
    ///
    /// Leaf hashes are domain-separated content hashes, a branch hashes the
    /// concatenation of its children, and a redacted subtree passes its
    /// precomputed hash through unchanged. The hash is therefore stable
    /// across partial and fully-expanded views of the same tree.
    pub fn hash(&self) -> B256 {
        match self {
            Topology::Signer { address, weight } => {
                keccak256_concat(&[SIGNER_PREFIX, address.as_slice(), &[*weight]])
            }
            Topology::Sapient {
                address,
                weight,
                image_hash,
            } => keccak256_concat(&[
                SAPIENT_PREFIX,
                address.as_slice(),
                &[*weight],
                image_hash.as_slice(),
            ]),
            Topology::Nested {
                weight,
                threshold,
                tree,
            } => keccak256_concat(&[
                NESTED_PREFIX,
                tree.hash().as_slice(),
                &threshold.to_be_bytes(),
                &[*weight],
            ]),
            Topology::Subdigest { digest } => {
                keccak256_concat(&[SUBDIGEST_PREFIX, digest.as_slice()])
            }
            Topology::Node { left, right } => {
                keccak256_concat(&[left.hash().as_slice(), right.hash().as_slice()])
            }
            Topology::NodeHash { hash } => *hash,
        }
    }

    /// Whether the tree contains no redacted subtrees
    pub fn is_complete(&self) -> bool {
        match self {
            Topology::NodeHash { .. } => false,
            Topology::Node { left, right } => left.is_complete() && right.is_complete(),
            Topology::Nested { tree, .. } => tree.is_complete(),
            _ => true,
        }
    }

    /// Addresses of all plain ECDSA signer leaves, nested trees included
    pub fn signers(&self) -> Vec<Address> {
        let mut out = Vec::new();
        self.walk(&mut |leaf| {
            if let Topology::Signer { address, .. } = leaf {
                out.push(*address);
            }
        });
        out
    }

    /// (address, imageHash) pairs of all sapient signer leaves
    pub fn sapient_signers(&self) -> Vec<(Address, B256)> {
        let mut out = Vec::new();
        self.walk(&mut |leaf| {
            if let Topology::Sapient {
                address,
                image_hash,
                ..
            } = leaf
            {
                out.push((*address, *image_hash));
            }
        });
        out
    }

    /// Maximum weight the visible leaves can contribute
    ///
    /// Redacted subtrees count as zero; a nested leaf contributes its own
    /// weight, never the sum of its inner tree.
    pub fn max_weight(&self) -> u64 {
        match self {
            Topology::Signer { weight, .. }
            | Topology::Sapient { weight, .. }
            | Topology::Nested { weight, .. } => *weight as u64,
            Topology::Subdigest { .. } | Topology::NodeHash { .. } => 0,
            Topology::Node { left, right } => left.max_weight() + right.max_weight(),
        }
    }

    fn walk(&self, visit: &mut impl FnMut(&Topology)) {
        match self {
            Topology::Node { left, right } => {
                left.walk(visit);
                right.walk(visit);
            }
            Topology::Nested { tree, .. } => tree.walk(visit),
            leaf => visit(leaf),
        }
    }
}

/// Merge two views of the same topology, preferring expanded branches
///
/// Both trees must hash identically; a structural disagreement between two
/// equally-hashed positions means a hash collision or corrupted storage and
/// is fatal.
pub fn merge_topology(a: &Topology, b: &Topology) -> Result<Topology> {
    if a.hash() != b.hash() {
        return Err(Error::ConfigurationCorruption(format!(
            "cannot merge topologies with different hashes: {} != {}",
            a.hash(),
            b.hash()
        )));
    }
    merge_unchecked(a, b)
}

fn merge_unchecked(a: &Topology, b: &Topology) -> Result<Topology> {
    match (a, b) {
        // A redacted subtree yields to anything more expanded
        (Topology::NodeHash { .. }, other) => Ok(other.clone()),
        (other, Topology::NodeHash { .. }) => Ok(other.clone()),
        (
            Topology::Node {
                left: al,
                right: ar,
            },
            Topology::Node {
                left: bl,
                right: br,
            },
        ) => Ok(Topology::Node {
            left: Box::new(merge_unchecked(al, bl)?),
            right: Box::new(merge_unchecked(ar, br)?),
        }),
        (
            Topology::Nested {
                weight: aw,
                threshold: at,
                tree: atree,
            },
            Topology::Nested {
                weight: bw,
                threshold: bt,
                tree: btree,
            },
        ) if aw == bw && at == bt => Ok(Topology::Nested {
            weight: *aw,
            threshold: *at,
            tree: Box::new(merge_unchecked(atree, btree)?),
        }),
        (x, y) if x == y => Ok(x.clone()),
        // Equal hashes but different shapes: collision or corrupted store
        (x, y) => Err(Error::ConfigurationCorruption(format!(
            "shape mismatch at equally-hashed position: {:?} vs {:?}",
            std::mem::discriminant(x),
            std::mem::discriminant(y)
        ))),
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// A wallet configuration: threshold, replay-protection checkpoint and the
/// signer topology
///
/// Configurations are immutable values; an update produces a new
/// configuration with a new image hash and a strictly larger checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Minimum aggregated signer weight for a valid signature
    pub threshold: u16,
    /// Monotonically increasing version counter of this lineage
    pub checkpoint: u64,
    /// Signer tree
    pub topology: Topology,
}

impl Configuration {
    /// Create a configuration and validate that its threshold is reachable
    pub fn new(threshold: u16, checkpoint: u64, topology: Topology) -> Result<Self> {
        let config = Self {
            threshold,
            checkpoint,
            topology,
        };
        config.validate()?;
        Ok(config)
    }

    /// Content-addressed identity of this configuration
    pub fn image_hash(&self) -> B256 {
        let mut threshold_word = [0u8; 32];
        threshold_word[30..].copy_from_slice(&self.threshold.to_be_bytes());
        let mut checkpoint_word = [0u8; 32];
        checkpoint_word[24..].copy_from_slice(&self.checkpoint.to_be_bytes());

        let root = keccak256_concat(&[self.topology.hash().as_slice(), &threshold_word]);
        keccak256_concat(&[root.as_slice(), &checkpoint_word])
    }

    /// Validate threshold reachability
    ///
    /// Only meaningful on fully-expanded trees; redacted views are accepted
    /// as-is because hidden subtrees may carry the missing weight.
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::InvalidConfig("threshold must be non-zero".to_string()));
        }
        if self.topology.is_complete() {
            let max_weight = self.topology.max_weight();
            if (self.threshold as u64) > max_weight {
                return Err(Error::InvalidThreshold {
                    threshold: self.threshold,
                    max_weight,
                });
            }
        }
        Ok(())
    }
}

/// Merge two views of the same configuration
pub fn merge_configuration(a: &Configuration, b: &Configuration) -> Result<Configuration> {
    if a.threshold != b.threshold || a.checkpoint != b.checkpoint {
        return Err(Error::ConfigurationCorruption(
            "cannot merge configurations with different threshold or checkpoint".to_string(),
        ));
    }
    Ok(Configuration {
        threshold: a.threshold,
        checkpoint: a.checkpoint,
        topology: merge_topology(&a.topology, &b.topology)?,
    })
}
