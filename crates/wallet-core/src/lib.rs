//! # Quorum Wallet Core
//!
//! Off-chain engine for counterfactual multisig smart wallets: weighted
//! threshold configuration trees, partial signature aggregation, a
//! content-addressed state store that resolves signed configuration-update
//! chains, and delegated session signing.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Configuration trees**: content-addressed weighted-threshold signer
//!   topologies with subtree redaction ([`config`])
//! - **Signature aggregation**: partial signatures filled into a topology and
//!   encoded as an on-chain-replayable envelope ([`config::signature`])
//! - **State store**: pluggable persistence plus a [`StateProvider`] that
//!   records witnesses and walks signed configuration-update chains
//!   ([`state`])
//! - **Sessions**: delegated signing through a session topology, implicit
//!   attestation-based keys and explicit permission-scoped keys ([`session`])
//! - **Permissions**: byte-masked calldata rules and a builder turning
//!   function signatures into them ([`permission`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wallet_core::config::{Configuration, Topology};
//! use wallet_core::state::{MemoryStore, StateProvider};
//! use wallet_core::types::Context;
//!
//! // 2-of-2 configuration over two signers
//! let config = Configuration::new(
//!     2,
//!     0,
//!     Topology::from_leaves(vec![
//!         Topology::Signer { address: alice, weight: 1 },
//!         Topology::Signer { address: bob, weight: 1 },
//!     ])?,
//! )?;
//!
//! // Derive the counterfactual wallet address and persist the config
//! let provider = StateProvider::new(Arc::new(MemoryStore::new()));
//! let wallet = provider.save_wallet(&config, &Context::dev()).await?;
//!
//! // Later: resolve the signed update chain from the initial image hash
//! let updates = provider
//!     .get_configuration_updates(wallet, config.image_hash(), Default::default())
//!     .await?;
//! ```
//!
//! ## Trust Model
//!
//! The store is untrusted: every signature it returns is re-verified against
//! the topology before use, update candidates below the signing threshold
//! are discarded, and a malformed update graph (cycles, corrupted trees)
//! fails closed.

pub mod abi;
pub mod config;
pub mod error;
pub mod extensions;
pub mod payload;
pub mod permission;
pub mod session;
pub mod state;
pub mod types;

pub use error::{Error, Result};

pub use config::signature::{RawSignature, SignatureTopology, SignedConfiguration};
pub use config::{Configuration, Topology};
pub use extensions::{Extensions, SapientRegistry, SapientSigner};
pub use payload::{Call, Payload, CHAIN_ID_AGNOSTIC};
pub use permission::{Permission, PermissionBuilder};
pub use session::{SessionManager, SessionTopology};
pub use state::provider::UpdateOptions;
pub use state::{ConfigurationUpdate, MemoryStore, StateProvider, WalletWitness};
pub use types::{wallet_address, Context, EcdsaSignature, SignerSignature};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
