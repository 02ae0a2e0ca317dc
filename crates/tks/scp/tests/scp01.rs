//! SCP01 session keys and cryptograms against reference vectors

mod common;

use common::*;
use hex_literal::hex;
use tks_scp::{CryptogramType, Error, ErrorKind, KeyType, Protocol, SessionKeyParams};
use tks_token::{Mechanism, SoftToken};

fn session<'a>(key_type: KeyType, key_info: &'a [u8]) -> SessionKeyParams<'a> {
    SessionKeyParams::new(key_type, &CUID, key_info)
        .with_kdd(&KDD)
        .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE)
}

#[test]
fn test_developer_session_key() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();

    let key = engine
        .compute_session_key(
            &mut token,
            &key_set,
            Protocol::Scp01,
            &session(KeyType::Enc, &SCP01_DEVELOPER),
        )
        .unwrap();
    assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), hex!("283D6A"));
}

#[test]
fn test_developer_cryptograms() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();
    let params = session(KeyType::Enc, &SCP01_DEVELOPER);

    let host = engine
        .compute_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, CryptogramType::Host)
        .unwrap();
    assert_eq!(host, hex!("F448885BCFC831B7"));

    let card = engine
        .compute_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, CryptogramType::Card)
        .unwrap();
    assert_eq!(card, hex!("CF4B82AEDECC778B"));

    engine
        .verify_card_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, &card)
        .unwrap();
    let err = engine
        .verify_card_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, &host)
        .unwrap_err();
    assert!(matches!(err, Error::CryptogramMismatch));
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[test]
fn test_developer_card_keys() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();

    for key_type in KeyType::CARD_KEYS {
        let params = SessionKeyParams::new(key_type, &CUID, &SCP01_DEVELOPER).with_kdd(&KDD);
        let key = engine
            .compute_session_key(&mut token, &key_set, Protocol::Scp01, &params)
            .unwrap();
        assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), hex!("8BAF47"));
    }

    // The kek is never session-derived
    let key = engine
        .compute_session_key(
            &mut token,
            &key_set,
            Protocol::Scp01,
            &session(KeyType::Kek, &SCP01_DEVELOPER),
        )
        .unwrap();
    assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), hex!("8BAF47"));
}

#[test]
fn test_master_key_visa2() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();

    let params = SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_MASTER).with_kdd(&KDD);
    let key = engine
        .compute_session_key(&mut token, &key_set, Protocol::Scp01, &params)
        .unwrap();
    assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), hex!("927752"));

    let host = engine
        .compute_cryptogram(
            &mut token,
            &key_set,
            Protocol::Scp01,
            &session(KeyType::Enc, &SCP01_MASTER),
            CryptogramType::Host,
        )
        .unwrap();
    assert_eq!(host, hex!("C6AD48521A54FB9D"));
}

#[test]
fn test_master_key_nist_kdf() {
    let engine = engine();
    let key_set = key_set(0x02);
    let mut token = token();

    let expected = [hex!("5DEBEE"), hex!("3CDDBC"), hex!("5337BF")];
    for (key_type, expected) in KeyType::CARD_KEYS.into_iter().zip(expected) {
        let params = SessionKeyParams::new(key_type, &CUID, &SCP01_MASTER).with_kdd(&KDD);
        let key = engine
            .compute_session_key(&mut token, &key_set, Protocol::Scp01, &params)
            .unwrap();
        assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), expected);
    }

    let host = engine
        .compute_cryptogram(
            &mut token,
            &key_set,
            Protocol::Scp01,
            &session(KeyType::Enc, &SCP01_MASTER),
            CryptogramType::Host,
        )
        .unwrap();
    assert_eq!(host, hex!("81BBBC20535EEF1E"));
}

#[test]
fn test_nist_kdf_with_cuid_context() {
    let engine = engine();
    let key_set = key_set(0x02).with_cuid_as_kdd(true);
    let mut token = token();

    let params = SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_MASTER).with_kdd(&KDD);
    let key = engine
        .compute_session_key(&mut token, &key_set, Protocol::Scp01, &params)
        .unwrap();
    assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), hex!("B3ED47"));
}

#[test]
fn test_token_without_derivation_mechanisms() {
    let engine = engine();
    let mut token = SoftToken::new("internal")
        .with_disabled_mechanism(Mechanism::Des3EcbEncryptData)
        .with_disabled_mechanism(Mechanism::ExtractKeyFromKey);
    provision(&mut token);

    let key = engine
        .compute_session_key(
            &mut token,
            &key_set(0x10),
            Protocol::Scp01,
            &session(KeyType::Enc, &SCP01_DEVELOPER),
        )
        .unwrap();
    assert_eq!(kcv(&engine, &mut token, &key, Protocol::Scp01), hex!("283D6A"));

    let host = engine
        .compute_cryptogram(
            &mut token,
            &key_set(0x10),
            Protocol::Scp01,
            &session(KeyType::Enc, &SCP01_MASTER),
            CryptogramType::Host,
        )
        .unwrap();
    assert_eq!(host, hex!("C6AD48521A54FB9D"));
}

#[test]
fn test_cryptograms_leave_no_keys_behind() {
    let engine = engine();
    let key_set = key_set(0x02);
    let mut token = token();

    for key_info in [SCP01_DEVELOPER, SCP01_MASTER] {
        let params = session(KeyType::Enc, &key_info);
        engine
            .compute_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, CryptogramType::Host)
            .unwrap();
        let count = token.key_count();

        engine
            .compute_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, CryptogramType::Card)
            .unwrap();
        assert_eq!(token.key_count(), count);
    }
}

#[test]
fn test_encrypt_data_under_kek() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();

    let params = SessionKeyParams::new(KeyType::Kek, &CUID, &SCP01_MASTER).with_kdd(&KDD);
    let encrypted = engine
        .encrypt_data(&mut token, &key_set, Protocol::Scp01, &params, &[0u8; 8])
        .unwrap();
    assert_eq!(encrypted, hex!("13C8AC68138DAAD4"));

    let err = engine
        .encrypt_data(&mut token, &key_set, Protocol::Scp01, &params, &[0u8; 7])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_no_rmac_key() {
    let engine = engine();
    let mut token = token();

    let err = engine
        .compute_session_key(
            &mut token,
            &key_set(0x10),
            Protocol::Scp01,
            &session(KeyType::Rmac, &SCP01_DEVELOPER),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_cryptogram_requires_challenges() {
    let engine = engine();
    let mut token = token();

    let params = SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_DEVELOPER);
    let err = engine
        .compute_cryptogram(&mut token, &key_set(0x10), Protocol::Scp01, &params, CryptogramType::Host)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
