//! Key set replacement blobs

use tks_token::{CipherMode, CryptoToken, SymmetricKey};
use tracing::debug;

use super::{SecureChannelProtocol, SessionKey};
use crate::{
    Error, Result,
    config::KeySet,
    constants::key_data,
    error::TokenResultExt,
    types::{CardIdentity, DiversifyParams, KeyInfo, KeyType, Protocol},
};

impl SecureChannelProtocol {
    /// Build the key set blob that replaces the card's keys with the key set `new_key_info`
    ///
    /// The new enc, mac and kek card keys are wrapped under the kek of the key set the card
    /// currently holds. The layout is the new key version followed by, for each key in that order:
    ///
    /// ```text
    /// SCP01: 81 10 <16-byte wrapped key> 03 <kcv>
    /// SCP03: 88 <len + 1> <len> <wrapped key> 03 <kcv>
    /// ```
    ///
    /// SCP01 keys are wrapped with triple DES ECB, keeping the first 16 bytes of the wrapped
    /// three-key form. SCP03 keys are wrapped with AES CBC and a zero IV.
    pub fn diversify_key(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        params: &DiversifyParams<'_>,
    ) -> Result<Vec<u8>> {
        if protocol == Protocol::Scp02 {
            return Err(protocol.not_implemented());
        }
        let card = CardIdentity::from_slices(params.cuid, params.kdd)?;
        let old_key_info = KeyInfo::from_slice(params.old_key_info)?;
        let new_key_info = KeyInfo::from_slice(params.new_key_info)?;

        debug!(%protocol, old = %old_key_info, new = %new_key_info, "Diversifying key set");

        let old_kek = self.card_key(token, key_set, protocol, KeyType::Kek, &card, old_key_info)?;
        let mut new_keys = Vec::with_capacity(KeyType::CARD_KEYS.len());
        let result = self.key_set_blob(
            token,
            key_set,
            protocol,
            &card,
            &old_kek.key,
            new_key_info,
            &mut new_keys,
        );

        for key in new_keys {
            key.release(token);
        }
        old_kek.release(token);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn key_set_blob(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        card: &CardIdentity,
        old_kek: &SymmetricKey,
        new_key_info: KeyInfo,
        new_keys: &mut Vec<SessionKey>,
    ) -> Result<Vec<u8>> {
        for key_type in KeyType::CARD_KEYS {
            new_keys.push(self.card_key(token, key_set, protocol, key_type, card, new_key_info)?);
        }

        let mut blob = Vec::with_capacity(1 + KeyType::CARD_KEYS.len() * 24);
        blob.push(new_key_info.version());

        for new_key in new_keys.iter() {
            match protocol {
                Protocol::Scp01 => {
                    let wrapped = token
                        .wrap_key(old_kek, &new_key.key, CipherMode::Des3Ecb)
                        .crypto("wrap new card key")?;
                    let wrapped = wrapped.get(..key_data::DES3_WRAPPED_LEN).ok_or_else(|| {
                        Error::InvalidInput("new card key is shorter than a DES2 key".into())
                    })?;
                    blob.push(key_data::ALG_DES3);
                    blob.push(key_data::DES3_WRAPPED_LEN as u8);
                    blob.extend_from_slice(wrapped);
                }
                Protocol::Scp03 => {
                    let wrapped = token
                        .wrap_key(old_kek, &new_key.key, CipherMode::AES_CBC_ZERO_IV)
                        .crypto("wrap new card key")?;
                    let len = u8::try_from(wrapped.len())
                        .ok()
                        .filter(|len| *len < u8::MAX)
                        .ok_or_else(|| Error::InvalidInput("new card key is too long".into()))?;
                    blob.extend_from_slice(&[key_data::ALG_AES, len + 1, len]);
                    blob.extend_from_slice(&wrapped);
                }
                Protocol::Scp02 => return Err(protocol.not_implemented()),
            }

            blob.push(key_data::KCV_LEN);
            blob.extend_from_slice(&self.compute_key_check_value(token, &new_key.key, protocol)?);
        }

        Ok(blob)
    }
}
