//! # Sessions
//!
//! Delegated signing scoped by a session topology. The topology pins an
//! identity signer, a target blacklist for implicit sessions and a list of
//! explicit permission entries; its root hash is what the wallet
//! configuration commits to through a sapient leaf. The manager holds the
//! actual session keys and produces the aggregate sapient signature.

pub mod manager;
pub mod topology;

pub use manager::SessionManager;
pub use topology::{Attestation, AuthData, SessionPermissions, SessionTopology};
