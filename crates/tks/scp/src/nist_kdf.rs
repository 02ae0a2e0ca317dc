//! NIST SP 800-108 counter mode KDFs
//!
//! Card keys for NIST-enabled key versions come from an HMAC-SHA-256 KDF producing 384 bits,
//! split into the enc, mac and kek card keys. SCP03 session keys and cryptograms come from the
//! AES-CMAC KDF of GlobalPlatform Amendment D.

use tks_token::{CryptoToken, KeyAlgorithm, SymmetricKey};
use zeroize::Zeroizing;

use crate::{
    Error, Result,
    constants::{nist, scp03},
    error::TokenResultExt,
    kdf::{des_parity, discard_key, expand_des2, trace_material, unwrap_key_material},
    types::KeyType,
};

/// Card keys derived together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardKeys {
    /// Encryption key
    pub enc: SymmetricKey,
    /// MAC key
    pub mac: SymmetricKey,
    /// Key encryption key
    pub kek: SymmetricKey,
}

impl CardKeys {
    /// Card key for `key_type`; R-MAC uses the MAC card key
    pub const fn get(&self, key_type: KeyType) -> &SymmetricKey {
        match key_type {
            KeyType::Enc => &self.enc,
            KeyType::Mac | KeyType::Rmac => &self.mac,
            KeyType::Kek => &self.kek,
        }
    }

    /// Take one key and return the other two
    pub(crate) fn split(self, key_type: KeyType) -> (SymmetricKey, [SymmetricKey; 2]) {
        match key_type {
            KeyType::Enc => (self.enc, [self.mac, self.kek]),
            KeyType::Mac | KeyType::Rmac => (self.mac, [self.enc, self.kek]),
            KeyType::Kek => (self.kek, [self.enc, self.mac]),
        }
    }
}

/// NIST SP 800-108 key derivation on a token
#[derive(Debug, Clone, Copy, Default)]
pub struct NistSp800108Kdf {
    log_key_material: bool,
}

impl NistSp800108Kdf {
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

    /// Counter mode KDF with HMAC-SHA-256 as PRF and a fixed 384-bit output
    ///
    /// Each PRF input is `counter || label || 00 || context || 0180` for counters 1 and 2.
    /// `output_len` must be 48.
    pub fn kdf_cm_sha256_hmac_l384(
        &self,
        token: &mut dyn CryptoToken,
        master: &SymmetricKey,
        context: &[u8],
        label: u8,
        output_len: usize,
    ) -> Result<Zeroizing<[u8; nist::OUTPUT_LEN]>> {
        if output_len != nist::OUTPUT_LEN {
            return Err(Error::InvalidInput(format!(
                "KDF output must be {} bytes, got {output_len}",
                nist::OUTPUT_LEN
            )));
        }

        let mut input = Zeroizing::new(Vec::with_capacity(context.len() + 5));
        let mut output = Zeroizing::new([0u8; nist::OUTPUT_LEN]);

        for (counter, chunk) in (1u8..).zip(output.chunks_mut(32)) {
            input.clear();
            input.push(counter);
            input.push(label);
            input.push(0x00);
            input.extend_from_slice(context);
            input.extend_from_slice(&nist::OUTPUT_BITS);

            let block = token
                .hmac_sha256(master, &input)
                .crypto("compute KDF block")?;
            chunk.copy_from_slice(&block[..chunk.len()]);
        }

        trace_material(self.log_key_material, "KDF output", output.as_slice());
        Ok(output)
    }

    /// Derive the enc, mac and kek card keys from `master`
    ///
    /// Each 16-byte segment gets DES parity before import. `algorithm` is [`KeyAlgorithm::Des3`]
    /// for SCP01, in which case segments are extended to three-key form, or
    /// [`KeyAlgorithm::Aes128`].
    pub fn compute_card_keys(
        &self,
        token: &mut dyn CryptoToken,
        master: &SymmetricKey,
        context: &[u8],
        algorithm: KeyAlgorithm,
    ) -> Result<CardKeys> {
        if !matches!(algorithm, KeyAlgorithm::Des3 | KeyAlgorithm::Aes128) {
            return Err(Error::InvalidInput(format!(
                "card keys cannot be {algorithm}"
            )));
        }

        let output = self.kdf_cm_sha256_hmac_l384(
            token,
            master,
            context,
            nist::CARD_KEYS_LABEL,
            nist::OUTPUT_LEN,
        )?;

        let mut keys = Vec::with_capacity(3);
        for segment in output.chunks_exact(nist::KEY_LEN) {
            let mut material = des_parity(segment);
            if algorithm == KeyAlgorithm::Des3 {
                material = expand_des2(&material);
            }

            match unwrap_key_material(token, &material, algorithm, None) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    for key in &keys {
                        discard_key(token, key);
                    }
                    return Err(err);
                }
            }
        }

        let mut keys = keys.into_iter();
        match (keys.next(), keys.next(), keys.next()) {
            (Some(enc), Some(mac), Some(kek)) => Ok(CardKeys { enc, mac, kek }),
            _ => Err(Error::InvalidInput("KDF output too short".into())),
        }
    }

    /// SCP03 counter mode KDF with AES-CMAC as PRF
    ///
    /// Each PRF input is `00 * 11 || constant || 00 || L || counter || context`, where `L` is the
    /// output length in bits as two big endian bytes.
    pub fn kdf_aes_cmac_scp03(
        &self,
        token: &mut dyn CryptoToken,
        key: &SymmetricKey,
        context: &[u8],
        constant: u8,
        output_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let bits = output_len
            .checked_mul(8)
            .and_then(|bits| u16::try_from(bits).ok())
            .filter(|bits| *bits > 0)
            .ok_or_else(|| Error::InvalidInput(format!("invalid KDF output length {output_len}")))?;
        let blocks = output_len.div_ceil(16);
        let counters = u8::try_from(blocks)
            .map_err(|_| Error::InvalidInput(format!("invalid KDF output length {output_len}")))?;

        let mut input = Zeroizing::new(Vec::with_capacity(scp03::LABEL_PADDING + 5 + context.len()));
        let mut output = Zeroizing::new(Vec::with_capacity(blocks * 16));

        for counter in 1..=counters {
            input.clear();
            input.resize(scp03::LABEL_PADDING, 0x00);
            input.push(constant);
            input.push(0x00);
            input.extend_from_slice(&bits.to_be_bytes());
            input.push(counter);
            input.extend_from_slice(context);

            let block = token.cmac_aes(key, &input).crypto("compute CMAC KDF block")?;
            output.extend_from_slice(block.as_slice());
        }

        output.truncate(output_len);
        trace_material(self.log_key_material, "CMAC KDF output", &output);
        Ok(output)
    }
}
