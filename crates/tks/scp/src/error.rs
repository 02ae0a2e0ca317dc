//! Error types for the secure channel engine

use thiserror::Error;
use tks_token::TokenError;

/// Result type for secure channel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for secure channel operations
///
/// Display strings never contain key material.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed, missing or wrong-length request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Protocol version that is unknown or not implemented
    #[error("Unsupported protocol version {version}: {reason}")]
    UnsupportedProtocol {
        /// Requested protocol version
        version: u8,
        /// Why the version was rejected
        reason: &'static str,
    },

    /// The token rejected an operation
    #[error("Cryptographic operation failed: {operation}: {source}")]
    CryptoOperationFailed {
        /// Operation that was being performed
        operation: &'static str,
        /// Error reported by the token
        #[source]
        source: TokenError,
    },

    /// A required configuration entry is absent
    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),

    /// A configuration entry is present but cannot be used
    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfiguration {
        /// Configuration key
        key: String,
        /// What is wrong with the value
        reason: &'static str,
    },

    /// The card cryptogram does not match the computed one
    #[error("Card cryptogram mismatch")]
    CryptogramMismatch,
}

/// Broad classification of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was malformed; reject it
    InvalidInput,
    /// The protocol version cannot be served
    UnsupportedProtocol,
    /// The token failed
    CryptoOperationFailed,
    /// The key set is misconfigured
    Configuration,
    /// Card authentication failed
    Authentication,
}

impl Error {
    /// Classify the error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UnsupportedProtocol { .. } => ErrorKind::UnsupportedProtocol,
            Self::CryptoOperationFailed { .. } => ErrorKind::CryptoOperationFailed,
            Self::ConfigurationMissing(_) | Self::InvalidConfiguration { .. } => {
                ErrorKind::Configuration
            }
            Self::CryptogramMismatch => ErrorKind::Authentication,
        }
    }

    pub(crate) const fn crypto(operation: &'static str, source: TokenError) -> Self {
        Self::CryptoOperationFailed { operation, source }
    }
}

/// Label token failures with the operation that caused them
pub(crate) trait TokenResultExt<T> {
    fn crypto(self, operation: &'static str) -> Result<T>;
}

impl<T> TokenResultExt<T> for tks_token::Result<T> {
    fn crypto(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| Error::crypto(operation, source))
    }
}
