//! Common test fixtures

#![allow(dead_code, unreachable_pub)]

use hex_literal::hex;
use tks_scp::{
    DiversificationScheme, EngineConfig, GpParams, KCV_LEN, KeyFamily, KeyInfo, KeySet,
    MasterKeyRef, Protocol, SecureChannelProtocol,
};
use tks_token::{CryptoToken, KeyAlgorithm, KeyUsages, SoftToken, SymmetricKey};

pub const DEV_KEY: [u8; 16] = hex!("404142434445464748494A4B4C4D4E4F");
pub const MASTER_KEY: [u8; 24] = hex!("0123456789ABCDEFFEDCBA987654321089ABCDEF01234567");
pub const AES_MASTER_KEY: [u8; 16] = hex!("000102030405060708090A0B0C0D0E0F");
pub const TRANSPORT_KEY: [u8; 16] = hex!("00112233445566778899AABBCCDDEEFF");

pub const CUID: [u8; 10] = [0u8; 10];
pub const KDD: [u8; 10] = hex!("0102030405060708090A");
pub const HOST_CHALLENGE: [u8; 8] = hex!("F0467F908E5CA23F");
pub const CARD_CHALLENGE: [u8; 8] = hex!("B6654CE4C8E55FCB");

pub const SCP01_DEVELOPER: [u8; 2] = [0x01, 0x01];
pub const SCP01_MASTER: [u8; 2] = [0x02, 0x01];
pub const SCP03_DEVELOPER: [u8; 2] = [0x01, 0x03];
pub const SCP03_MASTER: [u8; 2] = [0x02, 0x03];
pub const SCP03_AES_MASTER: [u8; 2] = [0x03, 0x03];

/// Software token named `internal` holding the master and transport keys
pub fn token() -> SoftToken {
    let mut token = SoftToken::new("internal");
    provision(&mut token);
    token
}

pub fn provision(token: &mut SoftToken) {
    token
        .import_key(KeyAlgorithm::Des3, &MASTER_KEY, KeyUsages::ALL, Some("masterKey"))
        .unwrap();
    token
        .import_key(KeyAlgorithm::Aes128, &AES_MASTER_KEY, KeyUsages::ALL, Some("aesMasterKey"))
        .unwrap();
    token
        .import_key(KeyAlgorithm::Des2, &TRANSPORT_KEY, KeyUsages::ALL, Some("sharedSecret"))
        .unwrap();
}

/// Key set with developer keys, VISA2 for SCP01 and EMV for SCP03
///
/// Key versions at or above `nist_threshold` use the NIST SP 800-108 KDF for SCP01.
pub fn key_set(nist_threshold: u8) -> KeySet {
    KeySet::new("defKeySet", nist_threshold)
        .with_developer_keys(&DEV_KEY)
        .with_gp_params(Protocol::Scp01, GpParams::new(DiversificationScheme::Visa2))
        .with_gp_params(
            Protocol::Scp03,
            GpParams::new(DiversificationScheme::Emv).with_dev_key_type(KeyFamily::Aes),
        )
        .with_master_key(
            KeyInfo::new(0x02, 0x01),
            MasterKeyRef::new("internal", "masterKey"),
        )
        .with_master_key(
            KeyInfo::new(0x02, 0x03),
            MasterKeyRef::new("internal", "masterKey"),
        )
}

/// [`key_set`] with an AES master key for SCP03 key version 3
pub fn aes_key_set() -> KeySet {
    key_set(0x10)
        .with_gp_params(
            Protocol::Scp03,
            GpParams::new(DiversificationScheme::Emv).with_master_key_type(KeyFamily::Aes),
        )
        .with_master_key(
            KeyInfo::new(0x03, 0x03),
            MasterKeyRef::new("internal", "aesMasterKey"),
        )
}

pub fn engine() -> SecureChannelProtocol {
    SecureChannelProtocol::new(EngineConfig::default())
}

pub fn kcv(
    engine: &SecureChannelProtocol,
    token: &mut dyn CryptoToken,
    key: &SymmetricKey,
    protocol: Protocol,
) -> [u8; KCV_LEN] {
    engine.compute_key_check_value(token, key, protocol).unwrap()
}
