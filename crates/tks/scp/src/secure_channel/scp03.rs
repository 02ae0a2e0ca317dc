//! SCP03 session keys, cryptograms and card keys

use tks_token::{
    CipherMode, CryptoToken, DeriveMechanism, KeyAlgorithm, KeyUsages, SymmetricKey, TokenError,
};
use tracing::debug;

use super::{SecureChannelProtocol, SessionKey};
use crate::{
    Error, Result,
    config::KeySet,
    constants::scp03,
    error::TokenResultExt,
    kdf::{DIVERSIFICATION_DATA_LEN, trace_material, unwrap_key_material},
    types::{
        CRYPTOGRAM_LEN, Challenge, CryptogramType, DerivationMode, KeyType, Protocol,
        SessionKeyParams, SessionRequest,
    },
};

const SESSION_KEY_LEN: usize = 16;

fn challenge_context(host: &Challenge, card: &Challenge) -> [u8; 16] {
    let mut context = [0u8; 16];
    context[..8].copy_from_slice(&host[..]);
    context[8..].copy_from_slice(&card[..]);
    context
}

impl SecureChannelProtocol {
    /// Compute an SCP03 session key, or the card key when no challenges are given
    ///
    /// S-ENC, S-MAC and S-RMAC come from the AES-CMAC KDF over `host || card`. The kek is the
    /// card key itself. Hand the key back with [`SessionKey::release`].
    pub fn compute_session_key_scp03(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        params: &SessionKeyParams<'_>,
    ) -> Result<SessionKey> {
        let request = params.validate()?;
        self.session_key_scp03(token, key_set, &request)
    }

    fn session_key_scp03(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        request: &SessionRequest,
    ) -> Result<SessionKey> {
        let card_key = self.card_key(
            token,
            key_set,
            Protocol::Scp03,
            request.key_type,
            &request.card,
            request.key_info,
        )?;

        match (request.mode, request.key_type.scp03_constant()) {
            (DerivationMode::Session { host, card }, Some(constant)) => {
                let context = challenge_context(&host, &card);
                let result = self.derive_session_key_scp03(token, &card_key.key, &context, constant);
                card_key.release(token);
                result.map(SessionKey::ephemeral)
            }
            _ => {
                debug!(key_type = %request.key_type, "Returning card key");
                Ok(card_key)
            }
        }
    }

    fn derive_session_key_scp03(
        &self,
        token: &mut dyn CryptoToken,
        card_key: &SymmetricKey,
        context: &[u8],
        constant: u8,
    ) -> Result<SymmetricKey> {
        let material = self.nist_kdf().kdf_aes_cmac_scp03(
            token,
            card_key,
            context,
            constant,
            SESSION_KEY_LEN,
        )?;
        unwrap_key_material(token, &material, KeyAlgorithm::Aes128, None)
    }

    /// Compute an SCP03 cryptogram from the S-MAC session key
    pub fn compute_cryptogram_scp03(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        params: &SessionKeyParams<'_>,
        cryptogram_type: CryptogramType,
    ) -> Result<[u8; CRYPTOGRAM_LEN]> {
        let request = params.for_key_type(KeyType::Mac).validate()?;
        let DerivationMode::Session { host, card } = request.mode else {
            return Err(Error::InvalidInput(
                "cryptograms require host and card challenges".into(),
            ));
        };
        let constant = match cryptogram_type {
            CryptogramType::Host => scp03::HOST_CRYPTOGRAM,
            CryptogramType::Card => scp03::CARD_CRYPTOGRAM,
        };

        let s_mac = self.session_key_scp03(token, key_set, &request)?;
        let result = self.nist_kdf().kdf_aes_cmac_scp03(
            token,
            &s_mac.key,
            &challenge_context(&host, &card),
            constant,
            CRYPTOGRAM_LEN,
        );
        s_mac.release(token);

        let mut cryptogram = [0u8; CRYPTOGRAM_LEN];
        cryptogram.copy_from_slice(&result?);
        Ok(cryptogram)
    }

    /// Derive an AES-128 card key by encrypting diversification data under `master`
    ///
    /// A DES3 master is used with triple DES ECB and its 16-byte ciphertext becomes AES key
    /// material; SCP03 card applets expect exactly this cross-algorithm reuse. The result is an
    /// AES key and gets no parity adjustment. AES masters use AES ECB.
    pub fn reinterpret_des3_key_material_as_aes(
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

        let mode = if master.algorithm().is_aes() {
            CipherMode::AesEcb
        } else {
            CipherMode::Des3Ecb
        };
        let mechanism = DeriveMechanism::EncryptData {
            mode,
            data: derivation_data,
        };

        match token.derive_key(master, mechanism, KeyAlgorithm::Aes128, KeyUsages::ALL) {
            Ok(key) => Ok(key),
            Err(TokenError::MechanismNotSupported(mechanism)) => {
                debug!(%mechanism, "Deriving AES card key from raw ciphertext");
                let ciphertext = token
                    .encrypt(master, mode, derivation_data)
                    .crypto("encrypt derivation data")?;
                trace_material(self.config.log_key_material, "AES card key", &ciphertext);
                unwrap_key_material(token, &ciphertext, KeyAlgorithm::Aes128, None)
            }
            Err(err) => Err(Error::crypto("derive AES card key", err)),
        }
    }
}
