//! Errors reported by cryptographic tokens

use thiserror::Error;

use crate::{KeyAlgorithm, Mechanism};

/// Result type for token operations
pub type Result<T> = core::result::Result<T, TokenError>;

/// Error type for token operations
///
/// Variants never carry key material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// The token does not implement the requested mechanism
    #[error("Mechanism not supported: {0}")]
    MechanismNotSupported(Mechanism),

    /// No key with the given nickname or handle exists on the token
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The handle was issued by a different token
    #[error("Key handle belongs to a different token")]
    ForeignKey,

    /// The key algorithm cannot be used for the requested operation
    #[error("{actual} key cannot be used for {operation}")]
    IncompatibleKey {
        /// Operation that was attempted
        operation: &'static str,
        /// Algorithm of the supplied key
        actual: KeyAlgorithm,
    },

    /// The key's usage flags do not permit the operation
    #[error("Key usage not permitted: {0}")]
    UsageNotPermitted(&'static str),

    /// Input data is not a whole number of cipher blocks
    #[error("Invalid data length: {actual} bytes is not a non-zero multiple of {block_size}")]
    InvalidDataLength {
        /// Block size of the cipher
        block_size: usize,
        /// Supplied length
        actual: usize,
    },

    /// Key material has the wrong length for its algorithm
    #[error("Invalid key length for {algorithm}: {actual} bytes")]
    InvalidKeyLength {
        /// Algorithm the material was destined for
        algorithm: KeyAlgorithm,
        /// Supplied length
        actual: usize,
    },

    /// A mechanism parameter is out of range
    #[error("Invalid mechanism parameter: {0}")]
    InvalidParameter(&'static str),

    /// Another key already uses this nickname
    #[error("Nickname already in use: {0}")]
    DuplicateNickname(String),
}
