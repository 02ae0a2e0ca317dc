//! The cryptographic token capability trait

use core::fmt;

use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    CipherMode, DeriveMechanism, KeyAlgorithm, KeyUsages, Result, SymmetricKey, TokenError,
    TokenId,
};

/// Execution context bound to a hardware or software cryptographic module
///
/// Implementations own all key material. Every method takes `&mut self`: a derivation sequence
/// holds the token exclusively for its whole duration, which is how callers serialize access to
/// modules that are not safe for concurrent use (see [`SharedToken`](crate::SharedToken)).
pub trait CryptoToken: fmt::Debug {
    /// Identifier carried by every key handle this token issues
    fn id(&self) -> TokenId;

    /// Token name, as used in master key mappings
    fn name(&self) -> &str;

    /// Look up a persistent key by nickname
    fn find_key(&self, nickname: &str) -> Result<Option<SymmetricKey>>;

    /// Generate a random key
    fn generate_key(&mut self, algorithm: KeyAlgorithm, usages: KeyUsages)
    -> Result<SymmetricKey>;

    /// Derive a new key of `algorithm` from `base`
    ///
    /// Tokens that do not implement the mechanism return
    /// [`TokenError::MechanismNotSupported`].
    fn derive_key(
        &mut self,
        base: &SymmetricKey,
        mechanism: DeriveMechanism<'_>,
        algorithm: KeyAlgorithm,
        usages: KeyUsages,
    ) -> Result<SymmetricKey>;

    /// Encrypt block-aligned data
    fn encrypt(
        &mut self,
        key: &SymmetricKey,
        mode: CipherMode,
        data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Decrypt block-aligned data
    fn decrypt(
        &mut self,
        key: &SymmetricKey,
        mode: CipherMode,
        data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// HMAC-SHA-256 keyed with the material of `key`
    fn hmac_sha256(&mut self, key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<[u8; 32]>>;

    /// AES-CMAC keyed with an AES key
    fn cmac_aes(&mut self, key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<[u8; 16]>>;

    /// Encrypt the material of `key` under `wrapping_key`
    fn wrap_key(
        &mut self,
        wrapping_key: &SymmetricKey,
        key: &SymmetricKey,
        mode: CipherMode,
    ) -> Result<Vec<u8>>;

    /// Decrypt `wrapped` under `unwrapping_key` into a new key of `algorithm`
    ///
    /// When `nickname` is given the key is stored persistently under that name.
    fn unwrap_key(
        &mut self,
        unwrapping_key: &SymmetricKey,
        wrapped: &[u8],
        mode: CipherMode,
        algorithm: KeyAlgorithm,
        usages: KeyUsages,
        nickname: Option<&str>,
    ) -> Result<SymmetricKey>;

    /// Remove a key from the token
    fn destroy_key(&mut self, key: &SymmetricKey) -> Result<()>;
}

/// Move `key` from `src` to `dst` under a transport key present on both tokens
///
/// The transport key is looked up by nickname on each side. The key is wrapped with the
/// transport key's zero-IV mode, so its material must be a whole number of transport blocks.
pub fn move_key(
    src: &mut dyn CryptoToken,
    dst: &mut dyn CryptoToken,
    key: &SymmetricKey,
    transport_key: &str,
    nickname: Option<&str>,
) -> Result<SymmetricKey> {
    let src_transport = src
        .find_key(transport_key)?
        .ok_or_else(|| TokenError::KeyNotFound(transport_key.to_string()))?;
    let dst_transport = dst
        .find_key(transport_key)?
        .ok_or_else(|| TokenError::KeyNotFound(transport_key.to_string()))?;

    let mode = CipherMode::for_wrapping_key(src_transport.algorithm()).ok_or(
        TokenError::IncompatibleKey {
            operation: "key transport",
            actual: src_transport.algorithm(),
        },
    )?;

    debug!(from = src.name(), to = dst.name(), "Moving key between tokens");

    let wrapped = src.wrap_key(&src_transport, key, mode)?;
    dst.unwrap_key(
        &dst_transport,
        &wrapped,
        mode,
        key.algorithm(),
        key.usages(),
        nickname,
    )
}
