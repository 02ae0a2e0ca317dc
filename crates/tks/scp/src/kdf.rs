//! Byte-level key derivation primitives
//!
//! Diversification data layouts follow the card applets: both schemes split a 16-byte block into a
//! left half marked `F0 <type>` and a right half marked `0F <type>`, with the same identifier bytes
//! in each half. EMV takes KDD bytes 4..10, VISA2 takes bytes 0..2 and 4..8.

use tks_token::{
    CipherMode, CryptoToken, KeyAlgorithm, KeyUsages, SymmetricKey, set_odd_parity,
};
use tracing::{trace, warn};
use zeroize::Zeroizing;

use crate::{
    Result,
    constants::diversification::{LEFT_MARKER, RIGHT_MARKER},
    error::TokenResultExt,
    types::{Kdd, KeyType},
};

/// Length of diversification data
pub const DIVERSIFICATION_DATA_LEN: usize = 16;

/// Return a copy of `bytes` with odd parity on every byte
pub fn des_parity(bytes: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut result = Zeroizing::new(bytes.to_vec());
    set_odd_parity(&mut result);
    result
}

/// EMV (CPG 2.0.4) diversification data
pub fn diversification_data_emv(kdd: &Kdd, key_type: KeyType) -> [u8; DIVERSIFICATION_DATA_LEN] {
    let key_type = key_type.diversification_byte();
    let mut data = [0u8; DIVERSIFICATION_DATA_LEN];
    data[0..6].copy_from_slice(&kdd[4..10]);
    data[6] = LEFT_MARKER;
    data[7] = key_type;
    data[8..14].copy_from_slice(&kdd[4..10]);
    data[14] = RIGHT_MARKER;
    data[15] = key_type;
    data
}

/// VISA2 diversification data
pub fn diversification_data_visa2(
    kdd: &Kdd,
    key_type: KeyType,
) -> [u8; DIVERSIFICATION_DATA_LEN] {
    let key_type = key_type.diversification_byte();
    let mut data = [0u8; DIVERSIFICATION_DATA_LEN];
    data[0..2].copy_from_slice(&kdd[0..2]);
    data[2..6].copy_from_slice(&kdd[4..8]);
    data[6] = LEFT_MARKER;
    data[7] = key_type;
    data[8..10].copy_from_slice(&kdd[0..2]);
    data[10..14].copy_from_slice(&kdd[4..8]);
    data[14] = RIGHT_MARKER;
    data[15] = key_type;
    data
}

/// Whether the NIST SP 800-108 KDF applies to a card holding key `version`
pub const fn use_this_kdf(threshold: u8, version: u8) -> bool {
    version >= threshold
}

/// Expand two-key triple DES material K1||K2 to K1||K2||K1
pub fn expand_des2(material: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut result = Zeroizing::new(Vec::with_capacity(24));
    result.extend_from_slice(material);
    if material.len() == 16 {
        result.extend_from_slice(&material[..8]);
    }
    result
}

/// Import raw key material into `token`
///
/// Material only enters a token through unwrapping: a transient DES3 key is generated, the
/// material is encrypted under it on the token and unwrapped as `algorithm`, and the transient
/// key is destroyed again. Material must be a multiple of 8 bytes.
pub fn unwrap_key_material(
    token: &mut dyn CryptoToken,
    material: &[u8],
    algorithm: KeyAlgorithm,
    nickname: Option<&str>,
) -> Result<SymmetricKey> {
    let transient = token
        .generate_key(KeyAlgorithm::Des3, KeyUsages::ENCRYPT | KeyUsages::UNWRAP)
        .crypto("generate transient key")?;

    let result = encrypt_and_unwrap(token, &transient, material, algorithm, nickname);
    discard_key(token, &transient);

    result.crypto("unwrap key material")
}

fn encrypt_and_unwrap(
    token: &mut dyn CryptoToken,
    transient: &SymmetricKey,
    material: &[u8],
    algorithm: KeyAlgorithm,
    nickname: Option<&str>,
) -> tks_token::Result<SymmetricKey> {
    let wrapped = token.encrypt(transient, CipherMode::Des3Ecb, material)?;
    token.unwrap_key(
        transient,
        &wrapped,
        CipherMode::Des3Ecb,
        algorithm,
        KeyUsages::ALL,
        nickname,
    )
}

/// Destroy an intermediate key, logging rather than failing
pub(crate) fn discard_key(token: &mut dyn CryptoToken, key: &SymmetricKey) {
    if let Err(err) = token.destroy_key(key) {
        warn!(%err, key = %key.id(), "Failed to destroy intermediate key");
    }
}

/// Dump key material at trace level when enabled
pub(crate) fn trace_material(enabled: bool, label: &str, bytes: &[u8]) {
    if enabled {
        trace!(label, material = %hex::encode_upper(bytes), "Key material");
    }
}
