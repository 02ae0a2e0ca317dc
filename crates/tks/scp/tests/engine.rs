//! Engine behaviour independent of a particular protocol vector

mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use hex_literal::hex;
use tks_scp::{
    CryptogramType, DiversificationScheme, DiversifyParams, EngineConfig, ErrorKind, GpParams,
    KeySet, KeyType, PropertiesConfig, Protocol, SecureChannelProtocol, SessionKeyParams,
};
use tks_token::{
    CipherMode, CryptoToken, DeriveMechanism, KeyAlgorithm, KeyUsages, SharedToken, SoftToken,
    SymmetricKey, TokenId,
};
use zeroize::Zeroizing;

/// Token that fails the test on any use
#[derive(Debug)]
struct UntouchedToken;

impl CryptoToken for UntouchedToken {
    fn id(&self) -> TokenId {
        panic!("token used before validation")
    }

    fn name(&self) -> &str {
        panic!("token used before validation")
    }

    fn find_key(&self, _: &str) -> tks_token::Result<Option<SymmetricKey>> {
        panic!("token used before validation")
    }

    fn generate_key(&mut self, _: KeyAlgorithm, _: KeyUsages) -> tks_token::Result<SymmetricKey> {
        panic!("token used before validation")
    }

    fn derive_key(
        &mut self,
        _: &SymmetricKey,
        _: DeriveMechanism<'_>,
        _: KeyAlgorithm,
        _: KeyUsages,
    ) -> tks_token::Result<SymmetricKey> {
        panic!("token used before validation")
    }

    fn encrypt(
        &mut self,
        _: &SymmetricKey,
        _: CipherMode,
        _: &[u8],
    ) -> tks_token::Result<Zeroizing<Vec<u8>>> {
        panic!("token used before validation")
    }

    fn decrypt(
        &mut self,
        _: &SymmetricKey,
        _: CipherMode,
        _: &[u8],
    ) -> tks_token::Result<Zeroizing<Vec<u8>>> {
        panic!("token used before validation")
    }

    fn hmac_sha256(
        &mut self,
        _: &SymmetricKey,
        _: &[u8],
    ) -> tks_token::Result<Zeroizing<[u8; 32]>> {
        panic!("token used before validation")
    }

    fn cmac_aes(&mut self, _: &SymmetricKey, _: &[u8]) -> tks_token::Result<Zeroizing<[u8; 16]>> {
        panic!("token used before validation")
    }

    fn wrap_key(
        &mut self,
        _: &SymmetricKey,
        _: &SymmetricKey,
        _: CipherMode,
    ) -> tks_token::Result<Vec<u8>> {
        panic!("token used before validation")
    }

    fn unwrap_key(
        &mut self,
        _: &SymmetricKey,
        _: &[u8],
        _: CipherMode,
        _: KeyAlgorithm,
        _: KeyUsages,
        _: Option<&str>,
    ) -> tks_token::Result<SymmetricKey> {
        panic!("token used before validation")
    }

    fn destroy_key(&mut self, _: &SymmetricKey) -> tks_token::Result<()> {
        panic!("token used before validation")
    }
}

#[test]
fn test_invalid_requests_never_reach_the_token() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = UntouchedToken;

    let short_cuid = [0u8; 9];
    let long_kdd = [0u8; 11];
    let short_challenge = [0u8; 7];

    let requests = [
        SessionKeyParams::new(KeyType::Enc, &short_cuid, &SCP01_DEVELOPER),
        SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_DEVELOPER).with_kdd(&long_kdd),
        SessionKeyParams::new(KeyType::Enc, &CUID, &[0x01]),
        SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_DEVELOPER)
            .with_challenges(&short_challenge, &CARD_CHALLENGE),
        SessionKeyParams {
            card_challenge: None,
            ..SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_DEVELOPER)
                .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE)
        },
    ];

    for params in &requests {
        for protocol in [Protocol::Scp01, Protocol::Scp03] {
            let err = engine
                .compute_session_key(&mut token, &key_set, protocol, params)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);

            let err = engine
                .compute_cryptogram(&mut token, &key_set, protocol, params, CryptogramType::Host)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    let params = DiversifyParams::new(&short_cuid, &SCP01_DEVELOPER, &SCP01_MASTER);
    let err = engine
        .diversify_key(&mut token, &key_set, Protocol::Scp01, &params)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_shared_token_across_threads() {
    let engine = Arc::new(engine());
    let key_set = Arc::new(key_set(0x02));
    let shared = SharedToken::new(token());

    thread::scope(|scope| {
        for worker in 0..4 {
            let engine = Arc::clone(&engine);
            let key_set = Arc::clone(&key_set);
            let shared = shared.clone();
            scope.spawn(move || {
                let key_info = if worker % 2 == 0 {
                    SCP01_DEVELOPER
                } else {
                    SCP01_MASTER
                };
                let expected = if worker % 2 == 0 {
                    hex!("F448885BCFC831B7")
                } else {
                    hex!("81BBBC20535EEF1E")
                };
                let params = SessionKeyParams::new(KeyType::Enc, &CUID, &key_info)
                    .with_kdd(&KDD)
                    .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE);

                for _ in 0..8 {
                    let mut session = shared.acquire();
                    let host = engine
                        .compute_cryptogram(
                            &mut *session,
                            &key_set,
                            Protocol::Scp01,
                            &params,
                            CryptogramType::Host,
                        )
                        .unwrap();
                    assert_eq!(host, expected);
                }
            });
        }
    });
}

#[test]
fn test_session_keys_are_deterministic() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();
    let params = SessionKeyParams::new(KeyType::Mac, &CUID, &SCP03_MASTER)
        .with_kdd(&KDD)
        .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE);

    let first = engine
        .compute_session_key(&mut token, &key_set, Protocol::Scp03, &params)
        .unwrap();
    let second = engine
        .compute_session_key(&mut token, &key_set, Protocol::Scp03, &params)
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(
        kcv(&engine, &mut token, &first, Protocol::Scp03),
        kcv(&engine, &mut token, &second, Protocol::Scp03)
    );
}

#[test]
fn test_transport_round_trip() {
    let engine = engine();
    let key_set = key_set(0x10);
    let mut token = token();

    let params = SessionKeyParams::new(KeyType::Enc, &CUID, &SCP01_DEVELOPER)
        .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE);
    let session_key = engine
        .compute_session_key(&mut token, &key_set, Protocol::Scp01, &params)
        .unwrap();

    let wrapped = engine.wrap_for_transport(&mut token, &session_key).unwrap();
    assert_eq!(wrapped.len(), 24);

    let mut remote = SoftToken::new("remote");
    provision(&mut remote);
    let remote_engine = common::engine();
    let delivered = remote_engine
        .unwrap_from_transport(&mut remote, &wrapped, KeyAlgorithm::Des3)
        .unwrap();
    assert_eq!(
        kcv(&remote_engine, &mut remote, &delivered, Protocol::Scp01),
        hex!("283D6A")
    );
}

#[test]
fn test_generated_aes_key_transport_round_trip() {
    let engine = engine();
    let aes_transport =
        SecureChannelProtocol::new(EngineConfig::new().with_transport_key_name("aesMasterKey"));
    let mut token = token();
    let key = token
        .generate_key(KeyAlgorithm::Aes128, KeyUsages::ALL)
        .unwrap();
    let block = hex!("00112233445566778899AABBCCDDEEFF");
    let expected = token.encrypt(&key, CipherMode::AesEcb, &block).unwrap();

    for transport in [&engine, &aes_transport] {
        let wrapped = transport.wrap_for_transport(&mut token, &key).unwrap();
        assert_eq!(wrapped.len(), 16);

        let unwrapped = transport
            .unwrap_from_transport(&mut token, &wrapped, KeyAlgorithm::Aes128)
            .unwrap();
        assert_ne!(unwrapped, key);
        assert_eq!(
            kcv(transport, &mut token, &unwrapped, Protocol::Scp03),
            kcv(transport, &mut token, &key, Protocol::Scp03)
        );
        assert_eq!(
            token.encrypt(&unwrapped, CipherMode::AesEcb, &block).unwrap(),
            expected
        );
    }
}

#[test]
fn test_release_keeps_resident_keys() {
    let engine = engine();
    let undiversified = key_set(0x10)
        .with_gp_params(Protocol::Scp01, GpParams::new(DiversificationScheme::None));
    let visa2 = key_set(0x10);
    let mut token = token();
    let params = SessionKeyParams::new(KeyType::Kek, &CUID, &SCP01_MASTER).with_kdd(&KDD);

    let master = engine
        .compute_session_key(&mut token, &undiversified, Protocol::Scp01, &params)
        .unwrap();
    assert!(!master.is_ephemeral());
    assert_eq!(master.nickname(), Some("masterKey"));
    master.release(&mut token);
    assert!(token.find_key("masterKey").unwrap().is_some());

    let count = token.key_count();
    for _ in 0..5 {
        let card_key = engine
            .compute_session_key(&mut token, &visa2, Protocol::Scp01, &params)
            .unwrap();
        assert!(card_key.is_ephemeral());
        card_key.release(&mut token);
    }
    assert_eq!(token.key_count(), count);

    let session = engine
        .compute_session_key(
            &mut token,
            &visa2,
            Protocol::Scp01,
            &params
                .for_key_type(KeyType::Enc)
                .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE),
        )
        .unwrap();
    assert!(session.is_ephemeral());
    session.release(&mut token);
    assert_eq!(token.key_count(), count);
}

#[test]
fn test_missing_transport_key() {
    let engine = SecureChannelProtocol::new(EngineConfig::new().with_transport_key_name("other"));
    let mut token = token();
    let key = token.find_key("masterKey").unwrap().unwrap();

    let err = engine.wrap_for_transport(&mut token, &key).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CryptoOperationFailed);
}

#[test]
fn test_key_set_from_properties() {
    let source = PropertiesConfig::parse(
        "
# Developer keys
tks.defKeySet.auth_key=#40#41#42#43#44#45#46#47#48#49#4a#4b#4c#4d#4e#4f
tks.defKeySet.mac_key=#40#41#42#43#44#45#46#47#48#49#4a#4b#4c#4d#4e#4f
tks.defKeySet.kek_key=#40#41#42#43#44#45#46#47#48#49#4a#4b#4c#4d#4e#4f
tks.defKeySet.prot1.divers=visa2
tks.defKeySet.prot1.diversVer1Keys=none
tks.defKeySet.nistSP800-108KdfOnKeyVersion=02
tks.defKeySet.mk_mappings.#02#01=internal:masterKey
",
    )
    .unwrap();
    let key_set = KeySet::load(&source, "defKeySet").unwrap();

    let engine = engine();
    let mut token = token();
    for (key_info, expected) in [
        (SCP01_DEVELOPER, hex!("F448885BCFC831B7")),
        (SCP01_MASTER, hex!("81BBBC20535EEF1E")),
    ] {
        let params = SessionKeyParams::new(KeyType::Enc, &CUID, &key_info)
            .with_kdd(&KDD)
            .with_challenges(&HOST_CHALLENGE, &CARD_CHALLENGE);
        let host = engine
            .compute_cryptogram(&mut token, &key_set, Protocol::Scp01, &params, CryptogramType::Host)
            .unwrap();
        assert_eq!(host, expected);
    }

    let params = SessionKeyParams::new(KeyType::Enc, &CUID, &SCP03_DEVELOPER);
    let err = engine
        .compute_session_key(&mut token, &key_set, Protocol::Scp03, &params)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_global_engine() {
    let engine = SecureChannelProtocol::from_global();
    assert_eq!(engine.config().transport_key_name, "sharedSecret");
    assert_eq!(engine.config().default_protocol, Protocol::Scp01);
}
