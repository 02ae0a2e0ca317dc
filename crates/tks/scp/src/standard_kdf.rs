//! SCP01 card key derivation by triple DES encryption of diversification data

use tks_token::{
    CipherMode, CryptoToken, DeriveMechanism, KeyAlgorithm, KeyUsages, SymmetricKey, TokenError,
    move_key,
};
use tracing::debug;

use crate::{
    Error, Result,
    error::TokenResultExt,
    kdf::{
        DIVERSIFICATION_DATA_LEN, des_parity, discard_key, expand_des2, trace_material,
        unwrap_key_material,
    },
};

/// Standard (pre-NIST) card key derivation
///
/// The card key is the master key's triple DES ECB encryption of the 16-byte diversification
/// data, with odd parity, extended to three-key form K1||K2||K1.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardKdf {
    log_key_material: bool,
}

impl StandardKdf {
    /// Create the KDF
    pub const fn new() -> Self {
        Self {
            log_key_material: false,
        }
    }

    /// Dump derived material at trace level
    pub const fn with_key_material_logging(mut self, enabled: bool) -> Self {
        self.log_key_material = enabled;
        self
    }

    /// Compute a DES3 card key from `master` on `token`
    pub fn compute_card_key(
        &self,
        token: &mut dyn CryptoToken,
        master: &SymmetricKey,
        derivation_data: &[u8],
    ) -> Result<SymmetricKey> {
        if derivation_data.len() != DIVERSIFICATION_DATA_LEN {
            return Err(Error::InvalidInput(format!(
                "derivation data must be {DIVERSIFICATION_DATA_LEN} bytes, got {}",
                derivation_data.len()
            )));
        }

        derive_des3(token, master, derivation_data, self.log_key_material)
    }

    /// Compute the card key on the token holding the master key
    pub fn compute_card_key_on_token(
        &self,
        token: &mut dyn CryptoToken,
        master: &SymmetricKey,
        derivation_data: &[u8],
    ) -> Result<SymmetricKey> {
        self.compute_card_key(token, master, derivation_data)
    }

    /// Compute the card key on a software token
    ///
    /// The master key is moved from `source` to `soft` under `transport_key`, which must exist on
    /// both tokens. The moved copy is destroyed once the card key exists.
    pub fn compute_card_key_on_soft_token(
        &self,
        source: &mut dyn CryptoToken,
        soft: &mut dyn CryptoToken,
        master: &SymmetricKey,
        derivation_data: &[u8],
        transport_key: &str,
    ) -> Result<SymmetricKey> {
        if derivation_data.len() != DIVERSIFICATION_DATA_LEN {
            return Err(Error::InvalidInput(format!(
                "derivation data must be {DIVERSIFICATION_DATA_LEN} bytes, got {}",
                derivation_data.len()
            )));
        }

        let moved = move_key(source, soft, master, transport_key, None).crypto("move master key")?;
        let result = self.compute_card_key(soft, &moved, derivation_data);
        discard_key(soft, &moved);
        result
    }
}

/// Derive a DES3 key as the triple DES ECB encryption of `data` under `base`
///
/// The token derives a DES2 key by encryption, then extends it by concatenating its first half.
/// Tokens without encrypt-data derivation instead encrypt the data directly; the parity-adjusted,
/// extended ciphertext is imported as the DES3 key. Both paths yield the same key.
pub(crate) fn derive_des3(
    token: &mut dyn CryptoToken,
    base: &SymmetricKey,
    data: &[u8],
    log_key_material: bool,
) -> Result<SymmetricKey> {
    let mechanism = DeriveMechanism::EncryptData {
        mode: CipherMode::Des3Ecb,
        data,
    };

    match token.derive_key(base, mechanism, KeyAlgorithm::Des2, KeyUsages::ALL) {
        Ok(des2) => {
            let result = extend_to_des3(token, &des2);
            discard_key(token, &des2);
            result
        }
        Err(TokenError::MechanismNotSupported(mechanism)) => {
            debug!(%mechanism, "Deriving from raw ciphertext");
            derive_des3_from_ciphertext(token, base, data, log_key_material)
        }
        Err(err) => Err(Error::crypto("derive key by encryption", err)),
    }
}

fn extend_to_des3(token: &mut dyn CryptoToken, des2: &SymmetricKey) -> Result<SymmetricKey> {
    let first_half = token
        .derive_key(
            des2,
            DeriveMechanism::ExtractKeyFromKey { bit_offset: 0 },
            KeyAlgorithm::GenericSecret(8),
            KeyUsages::ALL,
        )
        .crypto("extract key half")?;

    let result = token
        .derive_key(
            des2,
            DeriveMechanism::ConcatenateBaseAndKey { other: &first_half },
            KeyAlgorithm::Des3,
            KeyUsages::ALL,
        )
        .crypto("concatenate key halves");
    discard_key(token, &first_half);
    result
}

fn derive_des3_from_ciphertext(
    token: &mut dyn CryptoToken,
    base: &SymmetricKey,
    data: &[u8],
    log_key_material: bool,
) -> Result<SymmetricKey> {
    let ciphertext = token
        .encrypt(base, CipherMode::Des3Ecb, data)
        .crypto("encrypt derivation data")?;
    let material = expand_des2(&des_parity(&ciphertext));
    trace_material(log_key_material, "derived key", &material);

    unwrap_key_material(token, &material, KeyAlgorithm::Des3, None)
}
