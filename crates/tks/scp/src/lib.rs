//! GlobalPlatform secure channel key derivation
//!
//! This crate implements the key engine behind a token key service: diversifying card keys from
//! master or developer keys, deriving SCP01 and SCP03 session keys, computing and verifying
//! authentication cryptograms, and building the key set blobs that replace a card's keys.
//!
//! All key material stays inside a [`CryptoToken`](tks_token::CryptoToken). The engine only
//! ever handles key handles, derivation data and ciphertext.
//!
//! The main entry point is [`SecureChannelProtocol`]; key sets are described by [`KeySet`] and
//! the per-protocol [`GpParams`].

pub mod config;
pub mod constants;
pub mod error;
pub mod gp_params;
pub mod kdf;
pub mod nist_kdf;
pub mod secure_channel;
pub mod standard_kdf;
pub mod types;

// Re-exports
pub use config::{
    ConfigSource, EngineConfig, KeySet, MapConfig, MasterKeyRef, PropertiesConfig, global,
    init_global,
};
pub use error::{Error, ErrorKind, Result};
pub use gp_params::{DiversificationScheme, GpParams, KeyFamily};
pub use kdf::{unwrap_key_material, use_this_kdf};
pub use nist_kdf::{CardKeys, NistSp800108Kdf};
pub use secure_channel::{KCV_LEN, SecureChannelProtocol, SessionKey};
pub use standard_kdf::StandardKdf;
pub use types::{
    CRYPTOGRAM_LEN, CardIdentity, Challenge, CryptogramType, Cuid, DerivationMode,
    DiversifyParams, Kdd, KeyInfo, KeyType, Protocol, SessionKeyParams,
};
