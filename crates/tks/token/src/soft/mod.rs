//! Software token backed by the RustCrypto block ciphers

mod cipher;
mod mac;

use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::RngCore;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{
    CipherMode, CryptoToken, DeriveMechanism, KeyAlgorithm, KeyId, KeyUsages, Mechanism, Result,
    SymmetricKey, TokenError, TokenId, set_odd_parity,
};

struct StoredKey {
    algorithm: KeyAlgorithm,
    usages: KeyUsages,
    nickname: Option<String>,
    material: Zeroizing<Vec<u8>>,
}

/// In-memory cryptographic token
///
/// Key material lives in zeroizing buffers and is dropped with the key. DES key material always
/// carries odd parity. Individual mechanisms can be disabled to emulate modules with a narrower
/// mechanism set.
pub struct SoftToken {
    id: TokenId,
    name: String,
    next_key: u64,
    keys: HashMap<KeyId, StoredKey>,
    nicknames: HashMap<String, KeyId>,
    disabled: HashSet<Mechanism>,
}

impl fmt::Debug for SoftToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftToken")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("keys", &self.keys.len())
            .field("disabled", &self.disabled)
            .finish()
    }
}

impl SoftToken {
    /// Create an empty token
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TokenId::next(),
            name: name.into(),
            next_key: 1,
            keys: HashMap::new(),
            nicknames: HashMap::new(),
            disabled: HashSet::new(),
        }
    }

    /// Builder variant of [`disable_mechanism`](Self::disable_mechanism)
    pub fn with_disabled_mechanism(mut self, mechanism: Mechanism) -> Self {
        self.disable_mechanism(mechanism);
        self
    }

    /// Make the token report `mechanism` as unsupported
    pub fn disable_mechanism(&mut self, mechanism: Mechanism) {
        self.disabled.insert(mechanism);
    }

    /// Number of keys currently held, persistent and session
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Provision a key from plaintext material
    ///
    /// This is the software equivalent of a key ceremony and is not part of [`CryptoToken`].
    pub fn import_key(
        &mut self,
        algorithm: KeyAlgorithm,
        material: &[u8],
        usages: KeyUsages,
        nickname: Option<&str>,
    ) -> Result<SymmetricKey> {
        self.store(algorithm, Zeroizing::new(material.to_vec()), usages, nickname)
    }

    fn check_mechanism(&self, mechanism: Mechanism) -> Result<()> {
        if self.disabled.contains(&mechanism) {
            return Err(TokenError::MechanismNotSupported(mechanism));
        }
        Ok(())
    }

    fn lookup(&self, key: &SymmetricKey, usage: KeyUsages, name: &'static str) -> Result<&StoredKey> {
        if key.token() != self.id {
            return Err(TokenError::ForeignKey);
        }
        let stored = self
            .keys
            .get(&key.id())
            .ok_or_else(|| TokenError::KeyNotFound(key.id().to_string()))?;
        if !stored.usages.contains(usage) {
            return Err(TokenError::UsageNotPermitted(name));
        }
        Ok(stored)
    }

    fn store(
        &mut self,
        algorithm: KeyAlgorithm,
        mut material: Zeroizing<Vec<u8>>,
        usages: KeyUsages,
        nickname: Option<&str>,
    ) -> Result<SymmetricKey> {
        if material.len() != algorithm.key_len() || material.is_empty() {
            return Err(TokenError::InvalidKeyLength {
                algorithm,
                actual: material.len(),
            });
        }
        if algorithm.is_des() {
            set_odd_parity(&mut material);
        }
        if let Some(nickname) = nickname {
            if self.nicknames.contains_key(nickname) {
                return Err(TokenError::DuplicateNickname(nickname.to_string()));
            }
        }

        let id = KeyId(self.next_key);
        self.next_key += 1;

        if let Some(nickname) = nickname {
            self.nicknames.insert(nickname.to_string(), id);
        }
        self.keys.insert(
            id,
            StoredKey {
                algorithm,
                usages,
                nickname: nickname.map(str::to_string),
                material,
            },
        );

        trace!(token = %self.name, key = %id, %algorithm, "Stored key");

        Ok(SymmetricKey::new(
            self.id,
            id,
            algorithm,
            usages,
            nickname.map(str::to_string),
        ))
    }

    fn run_cipher(
        &self,
        key: &SymmetricKey,
        usage: KeyUsages,
        mode: CipherMode,
        data: &[u8],
        encrypting: bool,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.check_mechanism(mode.mechanism())?;
        let name = if encrypting { "encrypt" } else { "decrypt" };
        let stored = self.lookup(key, usage, name)?;
        if !mode.accepts(stored.algorithm) {
            return Err(TokenError::IncompatibleKey {
                operation: name,
                actual: stored.algorithm,
            });
        }

        let mut buffer = Zeroizing::new(data.to_vec());
        if encrypting {
            cipher::encrypt(mode, stored.algorithm, &stored.material, &mut buffer)?;
        } else {
            cipher::decrypt(mode, stored.algorithm, &stored.material, &mut buffer)?;
        }
        Ok(buffer)
    }
}

impl CryptoToken for SoftToken {
    fn id(&self) -> TokenId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn find_key(&self, nickname: &str) -> Result<Option<SymmetricKey>> {
        Ok(self.nicknames.get(nickname).and_then(|id| {
            self.keys.get(id).map(|stored| {
                SymmetricKey::new(
                    self.id,
                    *id,
                    stored.algorithm,
                    stored.usages,
                    stored.nickname.clone(),
                )
            })
        }))
    }

    fn generate_key(
        &mut self,
        algorithm: KeyAlgorithm,
        usages: KeyUsages,
    ) -> Result<SymmetricKey> {
        self.check_mechanism(Mechanism::KeyGeneration)?;
        let mut material = Zeroizing::new(vec![0u8; algorithm.key_len()]);
        rand::rng().fill_bytes(&mut material);
        self.store(algorithm, material, usages, None)
    }

    fn derive_key(
        &mut self,
        base: &SymmetricKey,
        mechanism: DeriveMechanism<'_>,
        algorithm: KeyAlgorithm,
        usages: KeyUsages,
    ) -> Result<SymmetricKey> {
        self.check_mechanism(mechanism.mechanism())?;
        let stored = self.lookup(base, KeyUsages::DERIVE, "derive")?;
        let len = algorithm.key_len();

        let material = match mechanism {
            DeriveMechanism::EncryptData { mode, data } => {
                if !mode.accepts(stored.algorithm) {
                    return Err(TokenError::IncompatibleKey {
                        operation: "derive",
                        actual: stored.algorithm,
                    });
                }
                let mut buffer = Zeroizing::new(data.to_vec());
                cipher::encrypt(mode, stored.algorithm, &stored.material, &mut buffer)?;
                if buffer.len() < len {
                    return Err(TokenError::InvalidKeyLength {
                        algorithm,
                        actual: buffer.len(),
                    });
                }
                buffer.truncate(len);
                buffer
            }
            DeriveMechanism::ExtractKeyFromKey { bit_offset } => {
                if bit_offset % 8 != 0 {
                    return Err(TokenError::InvalidParameter(
                        "extract offset must be byte aligned",
                    ));
                }
                let start = bit_offset / 8;
                let material = stored
                    .material
                    .get(start..start + len)
                    .ok_or(TokenError::InvalidParameter("extract range exceeds base key"))?;
                Zeroizing::new(material.to_vec())
            }
            DeriveMechanism::ConcatenateBaseAndKey { other } => {
                let other = self.lookup(other, KeyUsages::NONE, "derive")?;
                let mut buffer = Zeroizing::new(Vec::with_capacity(len));
                buffer.extend_from_slice(&stored.material);
                buffer.extend_from_slice(&other.material);
                buffer
            }
        };

        trace!(
            token = %self.name,
            mechanism = %mechanism.mechanism(),
            %algorithm,
            "Derived key"
        );

        self.store(algorithm, material, usages, None)
    }

    fn encrypt(
        &mut self,
        key: &SymmetricKey,
        mode: CipherMode,
        data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.run_cipher(key, KeyUsages::ENCRYPT, mode, data, true)
    }

    fn decrypt(
        &mut self,
        key: &SymmetricKey,
        mode: CipherMode,
        data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.run_cipher(key, KeyUsages::DECRYPT, mode, data, false)
    }

    fn hmac_sha256(&mut self, key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        self.check_mechanism(Mechanism::HmacSha256)?;
        let stored = self.lookup(key, KeyUsages::DERIVE, "HMAC")?;
        mac::hmac_sha256(&stored.material, data)
    }

    fn cmac_aes(&mut self, key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<[u8; 16]>> {
        self.check_mechanism(Mechanism::AesCmac)?;
        let stored = self.lookup(key, KeyUsages::SIGN, "CMAC")?;
        mac::cmac_aes(stored.algorithm, &stored.material, data)
    }

    fn wrap_key(
        &mut self,
        wrapping_key: &SymmetricKey,
        key: &SymmetricKey,
        mode: CipherMode,
    ) -> Result<Vec<u8>> {
        self.check_mechanism(mode.mechanism())?;
        let wrapper = self.lookup(wrapping_key, KeyUsages::WRAP, "wrap")?;
        if !mode.accepts(wrapper.algorithm) {
            return Err(TokenError::IncompatibleKey {
                operation: "wrap",
                actual: wrapper.algorithm,
            });
        }
        let target = self.lookup(key, KeyUsages::NONE, "wrap")?;

        let mut buffer = Zeroizing::new(target.material.to_vec());
        cipher::encrypt(mode, wrapper.algorithm, &wrapper.material, &mut buffer)?;

        debug!(token = %self.name, key = %key.id(), "Wrapped key");
        Ok(buffer.to_vec())
    }

    fn unwrap_key(
        &mut self,
        unwrapping_key: &SymmetricKey,
        wrapped: &[u8],
        mode: CipherMode,
        algorithm: KeyAlgorithm,
        usages: KeyUsages,
        nickname: Option<&str>,
    ) -> Result<SymmetricKey> {
        let material = self.run_cipher(unwrapping_key, KeyUsages::UNWRAP, mode, wrapped, false)?;
        self.store(algorithm, material, usages, nickname)
    }

    fn destroy_key(&mut self, key: &SymmetricKey) -> Result<()> {
        if key.token() != self.id {
            return Err(TokenError::ForeignKey);
        }
        let stored = self
            .keys
            .remove(&key.id())
            .ok_or_else(|| TokenError::KeyNotFound(key.id().to_string()))?;
        if let Some(nickname) = stored.nickname {
            self.nicknames.remove(&nickname);
        }
        Ok(())
    }
}
