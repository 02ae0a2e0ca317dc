//! Key handles and key attributes

use core::ops::BitOr;
use core::sync::atomic::{AtomicU32, Ordering};

use derive_more::Display;

/// Symmetric key algorithms a token can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum KeyAlgorithm {
    /// Two-key triple DES (16 bytes)
    #[display("DES2")]
    Des2,
    /// Three-key triple DES (24 bytes)
    #[display("DES3")]
    Des3,
    /// AES with a 128-bit key
    #[display("AES-128")]
    Aes128,
    /// AES with a 192-bit key
    #[display("AES-192")]
    Aes192,
    /// AES with a 256-bit key
    #[display("AES-256")]
    Aes256,
    /// Generic secret of the given length in bytes
    #[display("GENERIC-{_0}")]
    GenericSecret(usize),
}

impl KeyAlgorithm {
    /// Length of the key material in bytes
    pub const fn key_len(&self) -> usize {
        match self {
            Self::Des2 | Self::Aes128 => 16,
            Self::Des3 | Self::Aes192 => 24,
            Self::Aes256 => 32,
            Self::GenericSecret(len) => *len,
        }
    }

    /// Whether this is a DES-family algorithm
    pub const fn is_des(&self) -> bool {
        matches!(self, Self::Des2 | Self::Des3)
    }

    /// Whether this is an AES algorithm
    pub const fn is_aes(&self) -> bool {
        matches!(self, Self::Aes128 | Self::Aes192 | Self::Aes256)
    }

    /// AES algorithm for a key of `len` bytes
    pub const fn aes_for_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Aes128),
            24 => Some(Self::Aes192),
            32 => Some(Self::Aes256),
            _ => None,
        }
    }
}

/// Operations a key may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyUsages(u8);

impl KeyUsages {
    /// No usage
    pub const NONE: Self = Self(0x00);
    /// Encrypt data
    pub const ENCRYPT: Self = Self(0x01);
    /// Decrypt data
    pub const DECRYPT: Self = Self(0x02);
    /// Wrap other keys
    pub const WRAP: Self = Self(0x04);
    /// Unwrap other keys
    pub const UNWRAP: Self = Self(0x08);
    /// Derive other keys, including HMAC-based derivation
    pub const DERIVE: Self = Self(0x10);
    /// Compute MACs
    pub const SIGN: Self = Self(0x20);
    /// Every usage
    pub const ALL: Self = Self(0x3F);

    /// Combine two usage sets
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether every usage in `other` is also in `self`
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyUsages {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Identifier of a token instance within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("token#{_0}")]
pub struct TokenId(u32);

impl TokenId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of a key within its token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("key#{_0}")]
pub struct KeyId(pub u64);

/// Opaque handle to a symmetric key resident on a token
///
/// The handle carries attributes only. The material stays with the token that issued it, and
/// tokens reject handles issued by other tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymmetricKey {
    token: TokenId,
    id: KeyId,
    algorithm: KeyAlgorithm,
    usages: KeyUsages,
    nickname: Option<String>,
}

impl SymmetricKey {
    /// Create a handle. Intended for token implementations.
    pub const fn new(
        token: TokenId,
        id: KeyId,
        algorithm: KeyAlgorithm,
        usages: KeyUsages,
        nickname: Option<String>,
    ) -> Self {
        Self {
            token,
            id,
            algorithm,
            usages,
            nickname,
        }
    }

    /// Token that owns the key
    pub const fn token(&self) -> TokenId {
        self.token
    }

    /// Identifier of the key within its token
    pub const fn id(&self) -> KeyId {
        self.id
    }

    /// Key algorithm
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Permitted usages
    pub const fn usages(&self) -> KeyUsages {
        self.usages
    }

    /// Nickname under which the key is stored, if any
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }
}
