//! Request parameters and their validated forms

use derive_more::{Deref, Display};

use crate::{
    Error, Result,
    constants::{diversification, key_version, scp03},
};

/// Length of a card unique identifier
pub const CUID_LEN: usize = 10;
/// Length of key diversification data
pub const KDD_LEN: usize = 10;
/// Length of host and card challenges
pub const CHALLENGE_LEN: usize = 8;
/// Length of a cryptogram
pub const CRYPTOGRAM_LEN: usize = 8;

fn fixed<const N: usize>(name: &str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidInput(format!(
            "{name} must be {} bytes, got {}",
            N,
            bytes.len()
        ))
    })
}

/// Card unique identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deref)]
pub struct Cuid([u8; CUID_LEN]);

impl Cuid {
    /// Validate a CUID
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        fixed("CUID", bytes).map(Self)
    }
}

/// Key diversification data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deref)]
pub struct Kdd([u8; KDD_LEN]);

impl Kdd {
    /// Validate KDD
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        fixed("KDD", bytes).map(Self)
    }
}

/// Host or card challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deref)]
pub struct Challenge([u8; CHALLENGE_LEN]);

impl Challenge {
    /// Validate a challenge
    pub fn from_slice(name: &str, bytes: &[u8]) -> Result<Self> {
        fixed(name, bytes).map(Self)
    }
}

/// Key version and protocol identifier of the key set a card holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("#{version:02X}#{protocol_id:02X}")]
pub struct KeyInfo {
    version: u8,
    protocol_id: u8,
}

impl KeyInfo {
    /// Create key info
    pub const fn new(version: u8, protocol_id: u8) -> Self {
        Self {
            version,
            protocol_id,
        }
    }

    /// Validate key info; trailing bytes are ignored
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [version, protocol_id, ..] => Ok(Self::new(*version, *protocol_id)),
            _ => Err(Error::InvalidInput(format!(
                "key info must be at least 2 bytes, got {}",
                bytes.len()
            ))),
        }
    }

    /// Key version byte
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Protocol or algorithm identifier byte
    pub const fn protocol_id(&self) -> u8 {
        self.protocol_id
    }

    /// Whether the card holds the developer or factory key set
    pub const fn is_developer(&self) -> bool {
        matches!(self.version, key_version::DEVELOPER | key_version::FACTORY)
    }
}

/// Role of a key within a key set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum KeyType {
    /// Encryption key; also the SCP01 authentication key
    #[display("enc")]
    Enc,
    /// MAC key
    #[display("mac")]
    Mac,
    /// Key encryption key
    #[display("kek")]
    Kek,
    /// SCP03 response MAC key, derived from the MAC card key
    #[display("rmac")]
    Rmac,
}

impl KeyType {
    /// The three card keys, in key set order
    pub const CARD_KEYS: [Self; 3] = [Self::Enc, Self::Mac, Self::Kek];

    /// Card key this key type is derived from
    pub const fn card_key(&self) -> Self {
        match self {
            Self::Rmac => Self::Mac,
            other => *other,
        }
    }

    /// Key type byte used in diversification data
    pub const fn diversification_byte(&self) -> u8 {
        match self.card_key() {
            Self::Enc => diversification::ENC,
            Self::Mac | Self::Rmac => diversification::MAC,
            Self::Kek => diversification::KEK,
        }
    }

    /// SCP03 session key derivation constant; the kek has none
    pub const fn scp03_constant(&self) -> Option<u8> {
        match self {
            Self::Enc => Some(scp03::S_ENC),
            Self::Mac => Some(scp03::S_MAC),
            Self::Rmac => Some(scp03::S_RMAC),
            Self::Kek => None,
        }
    }

    /// Parse the key type names used in requests
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "enc" | "auth" => Some(Self::Enc),
            "mac" => Some(Self::Mac),
            "kek" => Some(Self::Kek),
            "rmac" => Some(Self::Rmac),
            _ => None,
        }
    }
}

/// Secure channel protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Protocol {
    /// SCP01
    #[display("SCP01")]
    Scp01,
    /// SCP02, recognised but not implemented
    #[display("SCP02")]
    Scp02,
    /// SCP03
    #[display("SCP03")]
    Scp03,
}

impl Protocol {
    /// Protocol for a version number
    pub const fn from_version(version: u8) -> Result<Self> {
        match version {
            1 => Ok(Self::Scp01),
            2 => Ok(Self::Scp02),
            3 => Ok(Self::Scp03),
            _ => Err(Error::UnsupportedProtocol {
                version,
                reason: "unknown protocol version",
            }),
        }
    }

    /// Protocol version number
    pub const fn version(&self) -> u8 {
        match self {
            Self::Scp01 => 1,
            Self::Scp02 => 2,
            Self::Scp03 => 3,
        }
    }

    /// Error for a recognised protocol the engine does not implement
    pub(crate) const fn not_implemented(self) -> Error {
        Error::UnsupportedProtocol {
            version: self.version(),
            reason: "not implemented",
        }
    }
}

/// Which cryptogram to compute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptogramType {
    /// Cryptogram the host sends to the card
    Host,
    /// Cryptogram the card sends to the host
    Card,
}

/// Whether challenges take part in the derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationMode {
    /// No challenges: return the card key itself
    CardKeyOnly,
    /// Derive a session key from both challenges
    Session {
        /// Host challenge
        host: Challenge,
        /// Card challenge
        card: Challenge,
    },
}

impl DerivationMode {
    /// Select the mode from optional challenges
    ///
    /// Both absent selects [`DerivationMode::CardKeyOnly`]; exactly one present is an error.
    pub fn from_challenges(host: Option<&[u8]>, card: Option<&[u8]>) -> Result<Self> {
        match (host, card) {
            (None, None) => Ok(Self::CardKeyOnly),
            (Some(host), Some(card)) => Ok(Self::Session {
                host: Challenge::from_slice("host challenge", host)?,
                card: Challenge::from_slice("card challenge", card)?,
            }),
            (Some(_), None) => Err(Error::InvalidInput(
                "host challenge given without card challenge".into(),
            )),
            (None, Some(_)) => Err(Error::InvalidInput(
                "card challenge given without host challenge".into(),
            )),
        }
    }
}

/// Card identity shared by every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardIdentity {
    /// Card unique identifier
    pub cuid: Cuid,
    /// Key diversification data
    pub kdd: Kdd,
}

impl CardIdentity {
    /// Validate a CUID and optional KDD; KDD defaults to the CUID
    pub fn from_slices(cuid: &[u8], kdd: Option<&[u8]>) -> Result<Self> {
        let cuid = Cuid::from_slice(cuid)?;
        let kdd = match kdd {
            Some(kdd) => Kdd::from_slice(kdd)?,
            None => Kdd(*cuid),
        };
        Ok(Self { cuid, kdd })
    }
}

/// Raw parameters of a session key or cryptogram request
#[derive(Debug, Clone, Copy)]
pub struct SessionKeyParams<'a> {
    /// Key to derive
    pub key_type: KeyType,
    /// Card unique identifier
    pub cuid: &'a [u8],
    /// Key diversification data, defaulting to the CUID
    pub kdd: Option<&'a [u8]>,
    /// Key info of the key set on the card
    pub key_info: &'a [u8],
    /// Host challenge
    pub host_challenge: Option<&'a [u8]>,
    /// Card challenge
    pub card_challenge: Option<&'a [u8]>,
}

impl<'a> SessionKeyParams<'a> {
    /// Parameters for a card-key-only request
    pub const fn new(key_type: KeyType, cuid: &'a [u8], key_info: &'a [u8]) -> Self {
        Self {
            key_type,
            cuid,
            kdd: None,
            key_info,
            host_challenge: None,
            card_challenge: None,
        }
    }

    /// Set the key diversification data
    pub const fn with_kdd(mut self, kdd: &'a [u8]) -> Self {
        self.kdd = Some(kdd);
        self
    }

    /// Set both challenges
    pub const fn with_challenges(mut self, host: &'a [u8], card: &'a [u8]) -> Self {
        self.host_challenge = Some(host);
        self.card_challenge = Some(card);
        self
    }

    /// Same request for another key type
    pub const fn for_key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub(crate) fn validate(&self) -> Result<SessionRequest> {
        Ok(SessionRequest {
            key_type: self.key_type,
            card: CardIdentity::from_slices(self.cuid, self.kdd)?,
            key_info: KeyInfo::from_slice(self.key_info)?,
            mode: DerivationMode::from_challenges(self.host_challenge, self.card_challenge)?,
        })
    }
}

/// Validated session key request
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionRequest {
    pub(crate) key_type: KeyType,
    pub(crate) card: CardIdentity,
    pub(crate) key_info: KeyInfo,
    pub(crate) mode: DerivationMode,
}

/// Raw parameters of a diversify key request
#[derive(Debug, Clone, Copy)]
pub struct DiversifyParams<'a> {
    /// Card unique identifier
    pub cuid: &'a [u8],
    /// Key diversification data, defaulting to the CUID
    pub kdd: Option<&'a [u8]>,
    /// Key info of the key set currently on the card
    pub old_key_info: &'a [u8],
    /// Key info of the key set to write
    pub new_key_info: &'a [u8],
}

impl<'a> DiversifyParams<'a> {
    /// Create diversify parameters
    pub const fn new(cuid: &'a [u8], old_key_info: &'a [u8], new_key_info: &'a [u8]) -> Self {
        Self {
            cuid,
            kdd: None,
            old_key_info,
            new_key_info,
        }
    }

    /// Set the key diversification data
    pub const fn with_kdd(mut self, kdd: &'a [u8]) -> Self {
        self.kdd = Some(kdd);
        self
    }
}
