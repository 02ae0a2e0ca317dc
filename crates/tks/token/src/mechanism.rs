//! Cipher modes and key derivation mechanisms

use derive_more::Display;

use crate::{KeyAlgorithm, SymmetricKey};

/// Token mechanisms, used to report and disable capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Mechanism {
    /// Triple DES in ECB mode
    #[display("DES3-ECB")]
    Des3Ecb,
    /// Triple DES in CBC mode
    #[display("DES3-CBC")]
    Des3Cbc,
    /// AES in ECB mode
    #[display("AES-ECB")]
    AesEcb,
    /// AES in CBC mode
    #[display("AES-CBC")]
    AesCbc,
    /// Derive a key by encrypting data with triple DES ECB
    #[display("DES3-ECB-ENCRYPT-DATA")]
    Des3EcbEncryptData,
    /// Derive a key by encrypting data with triple DES CBC
    #[display("DES3-CBC-ENCRYPT-DATA")]
    Des3CbcEncryptData,
    /// Derive a key by encrypting data with AES ECB
    #[display("AES-ECB-ENCRYPT-DATA")]
    AesEcbEncryptData,
    /// Derive a key by encrypting data with AES CBC
    #[display("AES-CBC-ENCRYPT-DATA")]
    AesCbcEncryptData,
    /// Derive a key from a bit range of another key
    #[display("EXTRACT-KEY-FROM-KEY")]
    ExtractKeyFromKey,
    /// Derive a key by concatenating two keys
    #[display("CONCATENATE-BASE-AND-KEY")]
    ConcatenateBaseAndKey,
    /// HMAC with SHA-256
    #[display("SHA256-HMAC")]
    HmacSha256,
    /// AES CMAC
    #[display("AES-CMAC")]
    AesCmac,
    /// Random key generation
    #[display("KEY-GEN")]
    KeyGeneration,
}

/// Block cipher mode used for encryption and key wrapping
///
/// No mode pads; data must be a whole number of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    /// Triple DES ECB
    Des3Ecb,
    /// Triple DES CBC with the given IV
    Des3Cbc {
        /// Initial chaining vector
        iv: [u8; 8],
    },
    /// AES ECB
    AesEcb,
    /// AES CBC with the given IV
    AesCbc {
        /// Initial chaining vector
        iv: [u8; 16],
    },
}

impl CipherMode {
    /// AES CBC with an all-zero IV
    pub const AES_CBC_ZERO_IV: Self = Self::AesCbc { iv: [0u8; 16] };

    /// Triple DES CBC with an all-zero IV
    pub const DES3_CBC_ZERO_IV: Self = Self::Des3Cbc { iv: [0u8; 8] };

    /// Cipher block size in bytes
    pub const fn block_size(&self) -> usize {
        match self {
            Self::Des3Ecb | Self::Des3Cbc { .. } => 8,
            Self::AesEcb | Self::AesCbc { .. } => 16,
        }
    }

    /// Whether the mode runs triple DES
    pub const fn is_des(&self) -> bool {
        matches!(self, Self::Des3Ecb | Self::Des3Cbc { .. })
    }

    /// Whether `algorithm` can key this mode
    pub const fn accepts(&self, algorithm: KeyAlgorithm) -> bool {
        if self.is_des() {
            algorithm.is_des()
        } else {
            algorithm.is_aes()
        }
    }

    /// Mechanism implementing the mode
    pub const fn mechanism(&self) -> Mechanism {
        match self {
            Self::Des3Ecb => Mechanism::Des3Ecb,
            Self::Des3Cbc { .. } => Mechanism::Des3Cbc,
            Self::AesEcb => Mechanism::AesEcb,
            Self::AesCbc { .. } => Mechanism::AesCbc,
        }
    }

    /// Mechanism that derives a key by encrypting data in this mode
    pub const fn encrypt_data_mechanism(&self) -> Mechanism {
        match self {
            Self::Des3Ecb => Mechanism::Des3EcbEncryptData,
            Self::Des3Cbc { .. } => Mechanism::Des3CbcEncryptData,
            Self::AesEcb => Mechanism::AesEcbEncryptData,
            Self::AesCbc { .. } => Mechanism::AesCbcEncryptData,
        }
    }

    /// Zero-IV mode used to wrap keys under a key of `algorithm`
    pub const fn for_wrapping_key(algorithm: KeyAlgorithm) -> Option<Self> {
        if algorithm.is_des() {
            Some(Self::Des3Ecb)
        } else if algorithm.is_aes() {
            Some(Self::AES_CBC_ZERO_IV)
        } else {
            None
        }
    }
}

/// Key derivation mechanism with its parameters
#[derive(Debug, Clone, Copy)]
pub enum DeriveMechanism<'a> {
    /// Encrypt `data` with the base key; the ciphertext becomes the new key
    EncryptData {
        /// Cipher mode
        mode: CipherMode,
        /// Data to encrypt
        data: &'a [u8],
    },
    /// Take the new key from the base key starting at `bit_offset`
    ExtractKeyFromKey {
        /// Offset in bits; must be byte aligned
        bit_offset: usize,
    },
    /// Append the material of `other` to the base key
    ConcatenateBaseAndKey {
        /// Key whose material follows the base key
        other: &'a SymmetricKey,
    },
}

impl DeriveMechanism<'_> {
    /// Mechanism used by this derivation
    pub const fn mechanism(&self) -> Mechanism {
        match self {
            Self::EncryptData { mode, .. } => mode.encrypt_data_mechanism(),
            Self::ExtractKeyFromKey { .. } => Mechanism::ExtractKeyFromKey,
            Self::ConcatenateBaseAndKey { .. } => Mechanism::ConcatenateBaseAndKey,
        }
    }
}
