//! Constants of the GlobalPlatform secure channel protocols

/// Key version bytes with special meaning
pub mod key_version {
    /// Developer key set as shipped
    pub const DEVELOPER: u8 = 0x01;
    /// Factory key set
    pub const FACTORY: u8 = 0xFF;
}

/// Key type bytes embedded in EMV and VISA2 diversification data
pub mod diversification {
    /// Encryption (authentication) key
    pub const ENC: u8 = 0x01;
    /// MAC key
    pub const MAC: u8 = 0x02;
    /// Key encryption key
    pub const KEK: u8 = 0x03;
    /// Marker preceding the key type in the left half
    pub const LEFT_MARKER: u8 = 0xF0;
    /// Marker preceding the key type in the right half
    pub const RIGHT_MARKER: u8 = 0x0F;
}

/// Derivation constants of the SCP03 AES-CMAC KDF
pub mod scp03 {
    /// Card cryptogram
    pub const CARD_CRYPTOGRAM: u8 = 0x00;
    /// Host cryptogram
    pub const HOST_CRYPTOGRAM: u8 = 0x01;
    /// S-ENC session key
    pub const S_ENC: u8 = 0x04;
    /// S-MAC session key
    pub const S_MAC: u8 = 0x06;
    /// S-RMAC session key
    pub const S_RMAC: u8 = 0x07;
    /// Zero bytes preceding the derivation constant in the label
    pub const LABEL_PADDING: usize = 11;
}

/// NIST SP 800-108 counter mode KDF parameters
pub mod nist {
    /// Label used when deriving the card key triple
    pub const CARD_KEYS_LABEL: u8 = 0x04;
    /// Output length in bytes
    pub const OUTPUT_LEN: usize = 48;
    /// Output length in bits, big endian
    pub const OUTPUT_BITS: [u8; 2] = [0x01, 0x80];
    /// Length of each card key taken from the output
    pub const KEY_LEN: usize = 16;
}

/// Key data layout of the diversify key blob
pub mod key_data {
    /// Algorithm identifier of triple DES keys
    pub const ALG_DES3: u8 = 0x81;
    /// Algorithm identifier of AES keys
    pub const ALG_AES: u8 = 0x88;
    /// Length of a wrapped triple DES key
    pub const DES3_WRAPPED_LEN: usize = 16;
    /// Length of a key check value
    pub const KCV_LEN: u8 = 0x03;
}

/// Key check value plaintexts
pub mod kcv {
    /// Triple DES keys encrypt one zero block
    pub const DES3_PLAINTEXT: [u8; 8] = [0x00; 8];
    /// AES keys encrypt one block of 0x01 bytes
    pub const AES_PLAINTEXT: [u8; 16] = [0x01; 16];
}
