//! Session topology and attestations
//!
//! The topology is content-addressed the same way wallet configurations are:
//! each leaf is a domain-prefixed packed encoding, and the root hash folds
//! the leaf hashes pairwise left to right. Leaves keep their prefix inside
//! the encoded bytes so the topology converts losslessly to and from the
//! store's [`GenericTree`].

use crate::permission::Permission;
use crate::state::GenericTree;
use crate::types::keccak256_concat;
use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

const IDENTITY_PREFIX: &[u8] = b"Session identity:\n";
const BLACKLIST_PREFIX: &[u8] = b"Session blacklist:\n";
const PERMISSIONS_PREFIX: &[u8] = b"Session permissions:\n";
const ATTESTATION_PREFIX: &[u8] = b"Session attestation:\n";

/// Authorization metadata carried by an attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthData {
    /// Redirect URL of the application the session was approved for
    pub redirect_url: String,
    /// Unix timestamp of the approval
    pub issued_at: u64,
}

/// Identity-signer approval of an implicit session key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Session key the identity signer approved
    pub approved_signer: Address,
    /// Opaque application payload bound into the approval
    pub application_data: Bytes,
    /// Authorization metadata
    pub auth_data: AuthData,
}

impl Attestation {
    /// Packed encoding, also used inside the aggregate session signature
    pub fn encode_packed(&self) -> Vec<u8> {
        let url = self.auth_data.redirect_url.as_bytes();
        let mut out = Vec::with_capacity(32 + url.len() + self.application_data.len());
        out.extend_from_slice(self.approved_signer.as_slice());
        out.extend_from_slice(&self.auth_data.issued_at.to_be_bytes());
        out.extend_from_slice(&(url.len() as u16).to_be_bytes());
        out.extend_from_slice(url);
        out.extend_from_slice(&(self.application_data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.application_data);
        out
    }

    /// Inverse of [`encode_packed`](Self::encode_packed); returns the
    /// attestation and the number of bytes consumed
    pub fn decode_packed(data: &[u8]) -> Result<(Self, usize)> {
        let truncated = || Error::Deserialization("truncated attestation".to_string());
        if data.len() < 30 {
            return Err(truncated());
        }
        let approved_signer = Address::from_slice(&data[..20]);
        let issued_at = u64::from_be_bytes(data[20..28].try_into().unwrap());
        let url_len = u16::from_be_bytes([data[28], data[29]]) as usize;
        let url_end = 30 + url_len;
        if data.len() < url_end + 2 {
            return Err(truncated());
        }
        let redirect_url = String::from_utf8(data[30..url_end].to_vec())
            .map_err(|_| Error::Deserialization("attestation URL is not UTF-8".to_string()))?;
        let app_len = u16::from_be_bytes([data[url_end], data[url_end + 1]]) as usize;
        let end = url_end + 2 + app_len;
        if data.len() < end {
            return Err(truncated());
        }
        Ok((
            Self {
                approved_signer,
                application_data: Bytes::copy_from_slice(&data[url_end + 2..end]),
                auth_data: AuthData {
                    redirect_url,
                    issued_at,
                },
            },
            end,
        ))
    }

    /// Domain-separated hash signed by the identity signer
    pub fn hash(&self) -> B256 {
        keccak256_concat(&[ATTESTATION_PREFIX, &self.encode_packed()])
    }
}

/// One explicit session entry: a signer and what it is allowed to call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPermissions {
    /// Session key the entry applies to
    pub signer: Address,
    /// Cap on the total native value the signer may move per payload
    pub value_limit: U256,
    /// Unix expiry timestamp, 0 for no expiry
    pub deadline: u64,
    /// Calls the signer may make
    pub permissions: Vec<Permission>,
}

impl SessionPermissions {
    /// Whether the entry is usable at `now`
    pub fn is_active(&self, now: u64) -> bool {
        self.deadline == 0 || now < self.deadline
    }

    /// First permission covering a call, with its index
    pub fn permission_for(
        &self,
        call: &crate::payload::Call,
    ) -> Option<(usize, &Permission)> {
        self.permissions
            .iter()
            .enumerate()
            .find(|(_, permission)| permission.matches_call(call))
    }

    fn encode_leaf(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(PERMISSIONS_PREFIX);
        out.extend_from_slice(self.signer.as_slice());
        out.extend_from_slice(&self.value_limit.to_be_bytes::<32>());
        out.extend_from_slice(&self.deadline.to_be_bytes());
        out.push(self.permissions.len() as u8);
        for permission in &self.permissions {
            out.extend_from_slice(&permission.encode_packed());
        }
        out
    }

    fn decode_leaf(data: &[u8]) -> Result<Self> {
        let body = data.strip_prefix(PERMISSIONS_PREFIX).ok_or_else(|| {
            Error::Deserialization("missing session permissions prefix".to_string())
        })?;
        if body.len() < 61 {
            return Err(Error::Deserialization(
                "truncated session permissions leaf".to_string(),
            ));
        }
        let signer = Address::from_slice(&body[..20]);
        let value_limit = U256::from_be_slice(&body[20..52]);
        let deadline = u64::from_be_bytes(body[52..60].try_into().unwrap());
        let count = body[60] as usize;

        let mut permissions = Vec::with_capacity(count);
        let mut cursor = 61;
        for _ in 0..count {
            let (permission, consumed) = Permission::decode_packed(&body[cursor..])?;
            permissions.push(permission);
            cursor += consumed;
        }
        if cursor != body.len() {
            return Err(Error::Deserialization(
                "trailing bytes in session permissions leaf".to_string(),
            ));
        }
        Ok(Self {
            signer,
            value_limit,
            deadline,
            permissions,
        })
    }
}

/// Content-addressed session topology a wallet configuration commits to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTopology {
    /// Signer whose attestations admit implicit sessions
    pub identity_signer: Address,
    /// Targets implicit sessions may never call, kept sorted
    pub blacklist: Vec<Address>,
    /// Explicit permission entries
    pub explicit: Vec<SessionPermissions>,
}

impl SessionTopology {
    /// New topology with only an identity signer
    pub fn new(identity_signer: Address) -> Self {
        Self {
            identity_signer,
            blacklist: Vec::new(),
            explicit: Vec::new(),
        }
    }

    /// Replace the blacklist; addresses are sorted and deduplicated
    pub fn with_blacklist(mut self, mut blacklist: Vec<Address>) -> Self {
        blacklist.sort();
        blacklist.dedup();
        self.blacklist = blacklist;
        self
    }

    /// Append an explicit permission entry
    pub fn with_explicit(mut self, entry: SessionPermissions) -> Self {
        self.explicit.push(entry);
        self
    }

    /// Whether implicit sessions are barred from calling `target`
    pub fn is_blacklisted(&self, target: Address) -> bool {
        self.blacklist.binary_search(&target).is_ok()
    }

    /// Explicit entry of a session signer, if any
    pub fn explicit_for(&self, signer: Address) -> Option<&SessionPermissions> {
        self.explicit.iter().find(|entry| entry.signer == signer)
    }

    /// Root hash of the topology
    pub fn image_hash(&self) -> B256 {
        self.to_tree().hash()
    }

    /// Leaves in canonical order: identity, blacklist, explicit entries
    pub fn to_tree(&self) -> GenericTree {
        let mut identity = Vec::with_capacity(IDENTITY_PREFIX.len() + 20);
        identity.extend_from_slice(IDENTITY_PREFIX);
        identity.extend_from_slice(self.identity_signer.as_slice());

        let mut blacklist = Vec::with_capacity(BLACKLIST_PREFIX.len() + self.blacklist.len() * 20);
        blacklist.extend_from_slice(BLACKLIST_PREFIX);
        for address in &self.blacklist {
            blacklist.extend_from_slice(address.as_slice());
        }

        let mut children = vec![
            GenericTree::Leaf {
                data: Bytes::from(identity),
            },
            GenericTree::Leaf {
                data: Bytes::from(blacklist),
            },
        ];
        children.extend(self.explicit.iter().map(|entry| GenericTree::Leaf {
            data: Bytes::from(entry.encode_leaf()),
        }));
        GenericTree::Branch { children }
    }

    /// Rebuild a topology from a stored tree; redacted subtrees cannot be
    /// reconstructed and are rejected
    pub fn from_tree(tree: &GenericTree) -> Result<Self> {
        let GenericTree::Branch { children } = tree else {
            return Err(Error::Deserialization(
                "session topology root must be a branch".to_string(),
            ));
        };
        if children.len() < 2 {
            return Err(Error::Deserialization(
                "session topology wants identity and blacklist leaves".to_string(),
            ));
        }

        let leaf_data = |node: &GenericTree| -> Result<Bytes> {
            match node {
                GenericTree::Leaf { data } => Ok(data.clone()),
                _ => Err(Error::Deserialization(
                    "session topology leaf is redacted or nested".to_string(),
                )),
            }
        };

        let identity = leaf_data(&children[0])?;
        let identity_body = identity.strip_prefix(IDENTITY_PREFIX).ok_or_else(|| {
            Error::Deserialization("missing session identity prefix".to_string())
        })?;
        if identity_body.len() != 20 {
            return Err(Error::Deserialization(
                "malformed session identity leaf".to_string(),
            ));
        }
        let identity_signer = Address::from_slice(identity_body);

        let blacklist_leaf = leaf_data(&children[1])?;
        let blacklist_body = blacklist_leaf.strip_prefix(BLACKLIST_PREFIX).ok_or_else(|| {
            Error::Deserialization("missing session blacklist prefix".to_string())
        })?;
        if blacklist_body.len() % 20 != 0 {
            return Err(Error::Deserialization(
                "malformed session blacklist leaf".to_string(),
            ));
        }
        let blacklist = blacklist_body
            .chunks_exact(20)
            .map(Address::from_slice)
            .collect();

        let explicit = children[2..]
            .iter()
            .map(|child| SessionPermissions::decode_leaf(&leaf_data(child)?))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identity_signer,
            blacklist,
            explicit,
        })
    }
}
