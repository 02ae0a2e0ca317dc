//! Per-protocol diversification settings of a key set

use derive_more::Display;
use tks_token::KeyAlgorithm;

use crate::{
    kdf::{DIVERSIFICATION_DATA_LEN, diversification_data_emv, diversification_data_visa2},
    types::{Kdd, KeyType},
};

/// Card key diversification scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum DiversificationScheme {
    /// Keys are used as they are
    #[default]
    #[display("none")]
    None,
    /// EMV CPG diversification
    #[display("emv")]
    Emv,
    /// VISA2 diversification
    #[display("visa2")]
    Visa2,
}

impl DiversificationScheme {
    /// Parse a configured scheme name
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "emv" => Some(Self::Emv),
            "visa2" => Some(Self::Visa2),
            _ => None,
        }
    }

    /// Diversification data for `key_type`, or `None` when keys are not diversified
    pub fn diversification_data(
        &self,
        kdd: &Kdd,
        key_type: KeyType,
    ) -> Option<[u8; DIVERSIFICATION_DATA_LEN]> {
        match self {
            Self::None => None,
            Self::Emv => Some(diversification_data_emv(kdd, key_type)),
            Self::Visa2 => Some(diversification_data_visa2(kdd, key_type)),
        }
    }
}

/// Key family named by `devKeyType` and `masterKeyType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum KeyFamily {
    /// Triple DES
    #[display("DES3")]
    Des3,
    /// AES
    #[display("AES")]
    Aes,
}

impl KeyFamily {
    /// Parse a configured key type
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DES3" | "DES" => Some(Self::Des3),
            "AES" => Some(Self::Aes),
            _ => None,
        }
    }

    /// Whether `algorithm` belongs to this family
    pub const fn contains(&self, algorithm: KeyAlgorithm) -> bool {
        match self {
            Self::Des3 => algorithm.is_des(),
            Self::Aes => algorithm.is_aes(),
        }
    }
}

/// Diversification settings for one protocol band of a key set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpParams {
    /// Scheme applied to master keys of upgraded key sets
    pub diversification: DiversificationScheme,
    /// Scheme applied to developer keys of version 1 key sets
    pub version1_diversification: DiversificationScheme,
    /// Family of developer keys
    pub dev_key_type: KeyFamily,
    /// Family of master keys
    pub master_key_type: KeyFamily,
}

impl Default for GpParams {
    fn default() -> Self {
        Self {
            diversification: DiversificationScheme::None,
            version1_diversification: DiversificationScheme::None,
            dev_key_type: KeyFamily::Des3,
            master_key_type: KeyFamily::Des3,
        }
    }
}

impl GpParams {
    /// Parameters diversifying master keys with `diversification`
    pub fn new(diversification: DiversificationScheme) -> Self {
        Self {
            diversification,
            ..Self::default()
        }
    }

    /// Set the developer key scheme
    pub const fn with_version1_diversification(mut self, scheme: DiversificationScheme) -> Self {
        self.version1_diversification = scheme;
        self
    }

    /// Set the developer key family
    pub const fn with_dev_key_type(mut self, family: KeyFamily) -> Self {
        self.dev_key_type = family;
        self
    }

    /// Set the master key family
    pub const fn with_master_key_type(mut self, family: KeyFamily) -> Self {
        self.master_key_type = family;
        self
    }

    /// Master keys are diversified with EMV
    pub const fn is_divers_emv(&self) -> bool {
        matches!(self.diversification, DiversificationScheme::Emv)
    }

    /// Master keys are diversified with VISA2
    pub const fn is_divers_visa2(&self) -> bool {
        matches!(self.diversification, DiversificationScheme::Visa2)
    }

    /// Master keys are used without diversification
    pub const fn is_divers_none(&self) -> bool {
        matches!(self.diversification, DiversificationScheme::None)
    }

    /// Developer keys are diversified before use
    pub const fn is_ver1_diversified(&self) -> bool {
        !matches!(self.version1_diversification, DiversificationScheme::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_parse_scheme() {
        assert_eq!(DiversificationScheme::parse("EMV"), Some(DiversificationScheme::Emv));
        assert_eq!(
            DiversificationScheme::parse(" visa2 "),
            Some(DiversificationScheme::Visa2)
        );
        assert_eq!(DiversificationScheme::parse("none"), Some(DiversificationScheme::None));
        assert_eq!(DiversificationScheme::parse("visa3"), None);
    }

    #[test]
    fn test_schemes_are_interchangeable() {
        let kdd = Kdd::from_slice(&hex!("0102030405060708090a")).unwrap();
        assert_eq!(
            DiversificationScheme::Emv.diversification_data(&kdd, KeyType::Enc),
            Some(diversification_data_emv(&kdd, KeyType::Enc))
        );
        assert_eq!(
            DiversificationScheme::Visa2.diversification_data(&kdd, KeyType::Mac),
            Some(diversification_data_visa2(&kdd, KeyType::Mac))
        );
        assert_eq!(
            DiversificationScheme::None.diversification_data(&kdd, KeyType::Kek),
            None
        );
    }

    #[test]
    fn test_params() {
        let params = GpParams::new(DiversificationScheme::Visa2)
            .with_version1_diversification(DiversificationScheme::Emv)
            .with_dev_key_type(KeyFamily::Aes);

        assert!(params.is_divers_visa2());
        assert!(!params.is_divers_emv());
        assert!(!params.is_divers_none());
        assert!(params.is_ver1_diversified());
        assert_eq!(params.master_key_type, KeyFamily::Des3);
        assert!(KeyFamily::Aes.contains(KeyAlgorithm::Aes128));
        assert!(!KeyFamily::Des3.contains(KeyAlgorithm::Aes128));
    }
}
