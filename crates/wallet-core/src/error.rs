//! Error types for wallet configuration and signing operations

use alloy_primitives::{Address, B256};
use thiserror::Error;

/// Result type alias for wallet-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, resolving or signing wallet
/// configurations
#[derive(Debug, Error)]
pub enum Error {
    // ============ Validation Errors ============
    /// Malformed or incomplete configuration input
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold can never be reached by the configured signer weights
    #[error("Invalid threshold: {threshold} exceeds maximum weight {max_weight}")]
    InvalidThreshold { threshold: u16, max_weight: u64 },

    // ============ Threshold Errors ============
    /// Aggregated signature weight is below the configuration threshold
    #[error("Insufficient weight: required {required}, got {actual}")]
    InsufficientWeight { required: u64, actual: u64 },

    // ============ Consistency Errors ============
    /// Two topologies with the same image hash disagree in shape
    #[error("Configuration corruption: {0}")]
    ConfigurationCorruption(String),

    /// The configuration update chain loops back onto a visited image hash
    #[error("Configuration cycle detected at {0}")]
    ConfigurationCycleDetected(B256),

    /// An image hash did not match the expected value
    #[error("Image hash mismatch: expected {expected}, got {actual}")]
    ImageHashMismatch { expected: B256, actual: B256 },

    // ============ Cryptographic Errors ============
    /// A recovered signer address does not match the claimed address
    #[error("Signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch {
        expected: Address,
        recovered: Address,
    },

    /// Invalid or unrecoverable signature
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    // ============ Capability Errors ============
    /// Explicitly unsupported leaf, payload or parameter shape
    #[error("Unsupported: {0}")]
    Unsupported(String),

    // ============ Session Errors ============
    /// A call in the batch has no signer able to authorize it
    #[error("No qualifying signer for call {call_index}")]
    NoQualifyingSigner { call_index: usize },

    /// Two computed usage increments collide on the same usage hash
    #[error("Duplicate usage hash: {0}")]
    DuplicateUsageHash(B256),

    /// The batch carries a usage-limit increment call that conflicts with
    /// the increments computed for this signing pass
    #[error("Usage increment mismatch: {0}")]
    IncrementMismatch(String),

    // ============ Permission Errors ============
    /// PermissionBuilder misuse (no mode selected, mixed modes, bad parameter)
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    // ============ Storage Errors ============
    /// A required record is missing from the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    // ============ Serialization Errors ============
    /// Wire-format encoding or decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ============ Internal Errors ============
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}

impl From<k256::ecdsa::Error> for Error {
    fn from(e: k256::ecdsa::Error) -> Self {
        Error::InvalidSignature(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_weight_display() {
        let err = Error::InsufficientWeight {
            required: 2,
            actual: 1,
        };
        assert!(err.to_string().contains("required 2"));
        assert!(err.to_string().contains("got 1"));
    }

    #[test]
    fn test_cycle_display_contains_hash() {
        let err = Error::ConfigurationCycleDetected(B256::repeat_byte(0xab));
        assert!(err.to_string().contains("abab"));
    }
}
