//! Secure channel key engine
//!
//! [`SecureChannelProtocol`] resolves the card key a request refers to and derives session keys,
//! cryptograms and key set blobs from it:
//!
//! - key version `0x01` or `0xFF` selects the developer key set, any other version the master key
//!   mapped for the key info;
//! - SCP01 master keys are diversified with the standard KDF, or with the NIST SP 800-108 KDF once
//!   the key version reaches the key set's threshold;
//! - SCP03 card keys are AES-128 keys derived by encrypting diversification data;
//! - requests without challenges return the card key itself.
//!
//! Every operation validates its inputs before the first token call. Keys created along the way
//! are destroyed before returning, on success and on failure.

mod diversify;
mod scp01;
mod scp03;

use std::sync::OnceLock;

use derive_more::Deref;
use subtle::ConstantTimeEq;
use tks_token::{
    CipherMode, CryptoToken, KeyAlgorithm, KeyUsages, SymmetricKey, TokenError,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    Error, Result,
    config::{self, EngineConfig, KeySet, developer_key_name},
    constants::kcv,
    error::TokenResultExt,
    gp_params::{GpParams, KeyFamily},
    kdf::{DIVERSIFICATION_DATA_LEN, discard_key, expand_des2, unwrap_key_material, use_this_kdf},
    nist_kdf::NistSp800108Kdf,
    standard_kdf::StandardKdf,
    types::{CRYPTOGRAM_LEN, CardIdentity, CryptogramType, KeyInfo, KeyType, Protocol, SessionKeyParams},
};

/// Length of a key check value
pub const KCV_LEN: usize = 3;

/// Key handle returned by the engine
///
/// Keys derived for a request are owned by the handle and destroyed by
/// [`release`](Self::release). Developer keys and undiversified master keys are resident on the
/// token; releasing their handle leaves them in place.
#[derive(Debug, PartialEq, Eq, Deref)]
pub struct SessionKey {
    #[deref]
    key: SymmetricKey,
    /// Created for this request rather than found on the token
    ephemeral: bool,
}

impl SessionKey {
    const fn ephemeral(key: SymmetricKey) -> Self {
        Self {
            key,
            ephemeral: true,
        }
    }

    const fn resident(key: SymmetricKey) -> Self {
        Self {
            key,
            ephemeral: false,
        }
    }

    /// Token key handle
    pub const fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Whether the key was created for this request
    pub const fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Give the key back, destroying it if it was created for this request
    pub fn release(self, token: &mut dyn CryptoToken) {
        if self.ephemeral {
            discard_key(token, &self.key);
        }
    }
}

/// GlobalPlatform secure channel key engine
///
/// The engine holds no per-request state. Callers pass the token for each call and keep it
/// exclusively for the duration of the call, e.g. through a [`SharedToken`](tks_token::SharedToken)
/// session.
#[derive(Debug)]
pub struct SecureChannelProtocol {
    config: EngineConfig,
    /// Transport key handle found by the first transport request
    transport_key: OnceLock<SymmetricKey>,
}

impl SecureChannelProtocol {
    /// Create an engine
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            transport_key: OnceLock::new(),
        }
    }

    /// Create an engine using the process-wide configuration
    pub fn from_global() -> Self {
        Self::new(config::global().clone())
    }

    /// Engine configuration
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    const fn standard_kdf(&self) -> StandardKdf {
        StandardKdf::new().with_key_material_logging(self.config.log_key_material)
    }

    const fn nist_kdf(&self) -> NistSp800108Kdf {
        NistSp800108Kdf::new().with_key_material_logging(self.config.log_key_material)
    }

    /// Compute a session key, or the card key when no challenges are given
    ///
    /// The caller hands the key back with [`SessionKey::release`] once done with it. Only keys
    /// created for the request are destroyed; resident developer and master keys survive.
    pub fn compute_session_key(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        params: &SessionKeyParams<'_>,
    ) -> Result<SessionKey> {
        match protocol {
            Protocol::Scp01 => self.compute_session_key_scp01(token, key_set, params),
            Protocol::Scp03 => self.compute_session_key_scp03(token, key_set, params),
            Protocol::Scp02 => Err(protocol.not_implemented()),
        }
    }

    /// Compute a host or card cryptogram
    pub fn compute_cryptogram(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        params: &SessionKeyParams<'_>,
        cryptogram_type: CryptogramType,
    ) -> Result<[u8; CRYPTOGRAM_LEN]> {
        match protocol {
            Protocol::Scp01 => {
                self.compute_cryptogram_scp01(token, key_set, params, cryptogram_type)
            }
            Protocol::Scp03 => {
                self.compute_cryptogram_scp03(token, key_set, params, cryptogram_type)
            }
            Protocol::Scp02 => Err(protocol.not_implemented()),
        }
    }

    /// Check a cryptogram received from the card
    pub fn verify_card_cryptogram(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        params: &SessionKeyParams<'_>,
        card_cryptogram: &[u8],
    ) -> Result<()> {
        if card_cryptogram.len() != CRYPTOGRAM_LEN {
            return Err(Error::InvalidInput(format!(
                "card cryptogram must be {CRYPTOGRAM_LEN} bytes, got {}",
                card_cryptogram.len()
            )));
        }

        let expected =
            self.compute_cryptogram(token, key_set, protocol, params, CryptogramType::Card)?;
        if bool::from(expected[..].ct_eq(card_cryptogram)) {
            Ok(())
        } else {
            debug!(%protocol, "Card cryptogram does not match");
            Err(Error::CryptogramMismatch)
        }
    }

    /// Key check value of `key`
    ///
    /// SCP01 encrypts a zero block with triple DES ECB, SCP03 a block of `0x01` bytes with AES CBC
    /// and a zero IV. The first three bytes form the check value.
    pub fn compute_key_check_value(
        &self,
        token: &mut dyn CryptoToken,
        key: &SymmetricKey,
        protocol: Protocol,
    ) -> Result<[u8; KCV_LEN]> {
        let output = match protocol {
            Protocol::Scp01 => token.encrypt(key, CipherMode::Des3Ecb, &kcv::DES3_PLAINTEXT),
            Protocol::Scp03 => token.encrypt(key, CipherMode::AES_CBC_ZERO_IV, &kcv::AES_PLAINTEXT),
            Protocol::Scp02 => return Err(protocol.not_implemented()),
        }
        .crypto("compute key check value")?;

        let mut check = [0u8; KCV_LEN];
        check.copy_from_slice(&output[..KCV_LEN]);
        Ok(check)
    }

    /// Encrypt `data` under the card's kek
    ///
    /// Challenges in `params` are ignored. SCP01 uses triple DES ECB, SCP03 AES CBC with a zero IV;
    /// `data` must be a non-zero multiple of the block size.
    pub fn encrypt_data(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        params: &SessionKeyParams<'_>,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mode = match protocol {
            Protocol::Scp01 => CipherMode::Des3Ecb,
            Protocol::Scp03 => CipherMode::AES_CBC_ZERO_IV,
            Protocol::Scp02 => return Err(protocol.not_implemented()),
        };
        let request = params.for_key_type(KeyType::Kek).validate()?;
        if data.is_empty() || data.len() % mode.block_size() != 0 {
            return Err(Error::InvalidInput(format!(
                "data must be a non-zero multiple of {} bytes, got {}",
                mode.block_size(),
                data.len()
            )));
        }

        let kek = self.card_key(
            token,
            key_set,
            protocol,
            KeyType::Kek,
            &request.card,
            request.key_info,
        )?;
        let result = token.encrypt(&kek.key, mode, data).crypto("encrypt data");
        kek.release(token);

        Ok(result?.to_vec())
    }

    /// Wrap `key` under the transport key for delivery to another system
    pub fn wrap_for_transport(
        &self,
        token: &mut dyn CryptoToken,
        key: &SymmetricKey,
    ) -> Result<Vec<u8>> {
        let transport = self.transport_key(token)?;
        let mode = transport_mode(&transport)?;
        token
            .wrap_key(&transport, key, mode)
            .crypto("wrap key for transport")
    }

    /// Unwrap a key delivered under the transport key
    pub fn unwrap_from_transport(
        &self,
        token: &mut dyn CryptoToken,
        wrapped: &[u8],
        algorithm: KeyAlgorithm,
    ) -> Result<SymmetricKey> {
        let transport = self.transport_key(token)?;
        let mode = transport_mode(&transport)?;
        token
            .unwrap_key(&transport, wrapped, mode, algorithm, KeyUsages::ALL, None)
            .crypto("unwrap key from transport")
    }

    /// Transport key on `token`; the first lookup is cached for the engine's lifetime
    ///
    /// The cached handle is only reused on the token that issued it.
    fn transport_key(&self, token: &mut dyn CryptoToken) -> Result<SymmetricKey> {
        if let Some(key) = self.transport_key.get() {
            if key.token() == token.id() {
                return Ok(key.clone());
            }
        }

        let nickname = &self.config.transport_key_name;
        let key = token
            .find_key(nickname)
            .crypto("find transport key")?
            .ok_or_else(|| {
                Error::crypto("find transport key", TokenError::KeyNotFound(nickname.clone()))
            })?;

        if self.transport_key.set(key.clone()).is_ok() {
            debug!(token = token.name(), "Cached transport key");
        }
        Ok(key)
    }

    /// Resolve the card key of `key_type` for the key set identified by `key_info`
    fn card_key(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        key_type: KeyType,
        card: &CardIdentity,
        key_info: KeyInfo,
    ) -> Result<SessionKey> {
        let params = key_set.gp_params(protocol)?;
        let key_type = key_type.card_key();

        if key_info.is_developer() {
            let developer = self.developer_key(token, key_set, protocol, key_type, params)?;
            let scheme = params.version1_diversification;
            return match scheme.diversification_data(&card.kdd, key_type) {
                None => {
                    debug!(%key_type, %key_info, "Using developer key");
                    Ok(SessionKey::resident(developer))
                }
                Some(data) => {
                    debug!(%key_type, %key_info, %scheme, "Diversifying developer key");
                    self.diversify_card_key(token, protocol, &developer, &data)
                        .map(SessionKey::ephemeral)
                }
            };
        }

        let master = self.master_key(token, key_set, protocol, key_info, params)?;

        if protocol == Protocol::Scp01
            && use_this_kdf(key_set.nist_kdf_on_key_version(), key_info.version())
        {
            let context: &[u8] = if key_set.nist_use_cuid_as_kdd() {
                &card.cuid[..]
            } else {
                &card.kdd[..]
            };
            debug!(%key_type, %key_info, "Deriving card keys with the NIST SP 800-108 KDF");

            let keys = self
                .nist_kdf()
                .compute_card_keys(token, &master, context, KeyAlgorithm::Des3)?;
            let (key, others) = keys.split(key_type);
            for other in &others {
                discard_key(token, other);
            }
            return Ok(SessionKey::ephemeral(key));
        }

        let scheme = params.diversification;
        match scheme.diversification_data(&card.kdd, key_type) {
            None if protocol == Protocol::Scp03 && !master.algorithm().is_aes() => {
                Err(Error::InvalidConfiguration {
                    key: format!("tks.{}.prot3.divers", key_set.name()),
                    reason: "DES3 master keys must be diversified",
                })
            }
            None => {
                debug!(%key_type, %key_info, "Using master key without diversification");
                Ok(SessionKey::resident(master))
            }
            Some(data) => {
                debug!(%key_type, %key_info, %scheme, "Diversifying master key");
                self.diversify_card_key(token, protocol, &master, &data)
                    .map(SessionKey::ephemeral)
            }
        }
    }

    fn diversify_card_key(
        &self,
        token: &mut dyn CryptoToken,
        protocol: Protocol,
        base: &SymmetricKey,
        data: &[u8; DIVERSIFICATION_DATA_LEN],
    ) -> Result<SymmetricKey> {
        match protocol {
            Protocol::Scp01 => self.standard_kdf().compute_card_key(token, base, data),
            Protocol::Scp03 => self.reinterpret_des3_key_material_as_aes(token, base, data),
            Protocol::Scp02 => Err(protocol.not_implemented()),
        }
    }

    /// Developer key of `key_type`, imported under a fixed nickname on first use
    ///
    /// SCP01 developer keys are DES3. SCP03 developer keys are AES unless they are themselves
    /// diversified with a DES3 developer key type.
    fn developer_key(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        key_type: KeyType,
        params: &GpParams,
    ) -> Result<SymmetricKey> {
        let material = key_set.developer_key(key_type)?;

        let aes = protocol == Protocol::Scp03
            && (!params.is_ver1_diversified() || params.dev_key_type == KeyFamily::Aes);
        let algorithm = if aes {
            KeyAlgorithm::aes_for_len(material.len())
        } else {
            matches!(material.len(), 16 | 24).then_some(KeyAlgorithm::Des3)
        }
        .ok_or_else(|| Error::InvalidConfiguration {
            key: format!("tks.{}.{}", key_set.name(), developer_key_name(key_type)),
            reason: "key length does not match the developer key type",
        })?;

        let nickname = match algorithm {
            KeyAlgorithm::Des3 => format!("{}-{key_type}Key", key_set.name()),
            other => format!(
                "{}-{key_type}Key-{}",
                key_set.name(),
                other.to_string().to_lowercase().replace('-', "")
            ),
        };

        if let Some(key) = token.find_key(&nickname).crypto("find developer key")? {
            return Ok(key);
        }

        debug!(key = %nickname, %algorithm, "Importing developer key");
        let material = if algorithm == KeyAlgorithm::Des3 {
            expand_des2(material)
        } else {
            Zeroizing::new(material.to_vec())
        };
        unwrap_key_material(token, &material, algorithm, Some(nickname.as_str()))
    }

    /// Master key mapped for `key_info`, which must live on `token`
    fn master_key(
        &self,
        token: &mut dyn CryptoToken,
        key_set: &KeySet,
        protocol: Protocol,
        key_info: KeyInfo,
        params: &GpParams,
    ) -> Result<SymmetricKey> {
        let mapping = key_set.master_key(key_info)?;
        if mapping.token != token.name() {
            return Err(Error::InvalidInput(format!(
                "master key for {key_info} is on token {}, not {}",
                mapping.token,
                token.name()
            )));
        }

        let nickname = format!("{}{}", self.config.master_key_prefix, mapping.key);
        let master = token
            .find_key(&nickname)
            .crypto("find master key")?
            .ok_or_else(|| {
                Error::crypto("find master key", TokenError::KeyNotFound(nickname.clone()))
            })?;

        if !params.master_key_type.contains(master.algorithm())
            || (protocol == Protocol::Scp01 && !master.algorithm().is_des())
        {
            return Err(Error::InvalidConfiguration {
                key: format!(
                    "tks.{}.prot{}.masterKeyType",
                    key_set.name(),
                    protocol.version()
                ),
                reason: "master key algorithm does not match",
            });
        }

        debug!(key = %nickname, algorithm = %master.algorithm(), "Found master key");
        Ok(master)
    }
}

fn transport_mode(transport: &SymmetricKey) -> Result<CipherMode> {
    CipherMode::for_wrapping_key(transport.algorithm()).ok_or_else(|| {
        Error::crypto(
            "select transport mode",
            TokenError::IncompatibleKey {
                operation: "key transport",
                actual: transport.algorithm(),
            },
        )
    })
}
