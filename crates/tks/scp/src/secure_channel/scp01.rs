//! SCP01 session keys and cryptograms

use cipher::block_padding::{Iso7816, RawPadding};
use tks_token::{CipherMode, CryptoToken, SymmetricKey};
use tracing::debug;
use zeroize::Zeroizing;

use super::{SecureChannelProtocol, SessionKey};
use crate::{
    Error, Result,
    config::KeySet,
    error::TokenResultExt,
    standard_kdf::derive_des3,
    types::{
        CRYPTOGRAM_LEN, Challenge, CryptogramType, DerivationMode, KeyType, Protocol,
        SessionKeyParams, SessionRequest,
    },
};

const BLOCK_LEN: usize = 8;

impl SecureChannelProtocol {
    /// Compute an SCP01 session key, or the card key when no challenges are given
    ///
    /// The kek is never session-derived. Hand the key back with [`SessionKey::release`].
    pub fn compute_session_key_scp01(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        params: &SessionKeyParams<'_>,
    ) -> Result<SessionKey> {
        let request = params.validate()?;
        self.session_key_scp01(token, key_set, &request)
    }

    fn session_key_scp01(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        request: &SessionRequest,
    ) -> Result<SessionKey> {
        if request.key_type == KeyType::Rmac {
            return Err(Error::InvalidInput("SCP01 has no R-MAC key".into()));
        }

        let card_key = self.card_key(
            token,
            key_set,
            Protocol::Scp01,
            request.key_type,
            &request.card,
            request.key_info,
        )?;

        match (request.mode, request.key_type) {
            (DerivationMode::CardKeyOnly, _) | (_, KeyType::Kek) => {
                debug!(key_type = %request.key_type, "Returning card key");
                Ok(card_key)
            }
            (DerivationMode::Session { host, card }, _) => {
                let result = self.derive_key_scp01(token, &card_key.key, &host, &card);
                card_key.release(token);
                result.map(SessionKey::ephemeral)
            }
        }
    }

    /// Derive an SCP01 session key from a card key
    ///
    /// The derivation data is `card[4..8] || host[0..4] || card[0..4] || host[4..8]`.
    pub fn derive_key_scp01(
        &self,
        token: &mut dyn CryptoToken,
        card_key: &SymmetricKey,
        host: &Challenge,
        card: &Challenge,
    ) -> Result<SymmetricKey> {
        let mut data = Zeroizing::new([0u8; 16]);
        data[0..4].copy_from_slice(&card[4..8]);
        data[4..8].copy_from_slice(&host[0..4]);
        data[8..12].copy_from_slice(&card[0..4]);
        data[12..16].copy_from_slice(&host[4..8]);

        derive_des3(token, card_key, data.as_slice(), self.config.log_key_material)
    }

    /// Compute an SCP01 cryptogram with the session authentication key
    ///
    /// The host cryptogram MACs `card || host`, the card cryptogram `host || card`.
    pub fn compute_cryptogram_scp01(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        params: &SessionKeyParams<'_>,
        cryptogram_type: CryptogramType,
    ) -> Result<[u8; CRYPTOGRAM_LEN]> {
        let request = params.for_key_type(KeyType::Enc).validate()?;
        let DerivationMode::Session { host, card } = request.mode else {
            return Err(Error::InvalidInput(
                "cryptograms require host and card challenges".into(),
            ));
        };

        let mut data = Zeroizing::new([0u8; 16]);
        let (first, second) = match cryptogram_type {
            CryptogramType::Host => (card, host),
            CryptogramType::Card => (host, card),
        };
        data[..8].copy_from_slice(&first[..]);
        data[8..].copy_from_slice(&second[..]);

        let session_key = self.session_key_scp01(token, key_set, &request)?;
        let result = self.compute_mac_scp01(token, &session_key.key, data.as_slice());
        session_key.release(token);
        result
    }

    /// Triple DES CBC-MAC with a zero ICV over `data` padded with `80 00..`
    ///
    /// Each block is XORed into the chaining value, which is then encrypted on the token.
    pub fn compute_mac_scp01(
        &self,
        token: &mut dyn CryptoToken,
        key: &SymmetricKey,
        data: &[u8],
    ) -> Result<[u8; BLOCK_LEN]> {
        let padded_len = (data.len() / BLOCK_LEN + 1) * BLOCK_LEN;
        let last = padded_len - BLOCK_LEN;
        let mut padded = Zeroizing::new(vec![0u8; padded_len]);
        padded[..data.len()].copy_from_slice(data);
        Iso7816::raw_pad(&mut padded[last..], data.len() - last);

        let mut chaining = Zeroizing::new([0u8; BLOCK_LEN]);
        for block in padded.chunks_exact(BLOCK_LEN) {
            for (value, byte) in chaining.iter_mut().zip(block) {
                *value ^= byte;
            }
            let encrypted = token
                .encrypt(key, CipherMode::Des3Ecb, chaining.as_slice())
                .crypto("compute MAC")?;
            chaining.copy_from_slice(&encrypted);
        }

        Ok(*chaining)
    }
}
