//! Cryptographic token abstraction for smart card key management
//!
//! Every symmetric operation performed by the secure channel engine is requested against a
//! [`CryptoToken`]. A token owns the key material; callers only ever hold opaque
//! [`SymmetricKey`] handles. Raw bytes enter a token through [`CryptoToken::unwrap_key`] and leave
//! it only as ciphertext through [`CryptoToken::wrap_key`].
//!
//! [`SoftToken`] is a software implementation backed by the RustCrypto block ciphers. It is the
//! reference token for tests and tooling; hardware-backed tokens implement the same trait.
//!
//! Tokens are not assumed to be safe for concurrent use. All operations take `&mut self`, and
//! [`SharedToken`] serializes access to a token shared between threads.

pub mod error;
pub mod key;
pub mod mechanism;
pub mod parity;
pub mod shared;
pub mod soft;
pub mod token;

pub use error::{Result, TokenError};
pub use key::{KeyAlgorithm, KeyId, KeyUsages, SymmetricKey, TokenId};
pub use mechanism::{CipherMode, DeriveMechanism, Mechanism};
pub use parity::set_odd_parity;
pub use shared::{SharedToken, TokenSession};
pub use soft::SoftToken;
pub use token::{CryptoToken, move_key};
