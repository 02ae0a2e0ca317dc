//! Command handlers

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use clap::Args;
use tks_scp::{
    CryptogramType, DiversificationScheme, DiversifyParams, EngineConfig, GpParams, KeyFamily,
    KeyInfo, KeySet, KeyType, MasterKeyRef, NistSp800108Kdf, PropertiesConfig, Protocol,
    SecureChannelProtocol, SessionKeyParams,
};
use tks_token::{KeyAlgorithm, KeyUsages, SoftToken, SymmetricKey};
use tracing::{debug, info};

/// Name of the software token holding all keys
const TOKEN_NAME: &str = "internal";

/// GlobalPlatform test key, used when no configuration is given
const DEFAULT_DEVELOPER_KEY: [u8; 16] = [
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f,
];

/// Keys provisioned into the token before a command runs
#[derive(Args, Debug, Clone)]
pub struct TokenArgs {
    /// Master key, as `NAME=HEX` or `NAME=aes:HEX`
    #[arg(short, long = "master-key", value_name = "NAME=KEY")]
    pub master_keys: Vec<String>,

    /// Map a key info to a master key, as `KEYINFO=NAME` (e.g. `0201=masterKey`)
    #[arg(long = "mapping", value_name = "KEYINFO=NAME")]
    pub mappings: Vec<String>,

    /// Transport key (hex)
    #[arg(long)]
    pub transport_key: Option<String>,
}

/// Card and key set selection shared by the session commands
#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// SCP protocol version
    #[arg(short, long, default_value_t = 1)]
    pub protocol: u8,

    /// Card unique identifier (hex)
    #[arg(long)]
    pub cuid: String,

    /// Key diversification data (hex, defaults to the CUID)
    #[arg(long)]
    pub kdd: Option<String>,

    /// Key version and protocol id (hex)
    #[arg(long)]
    pub key_info: String,

    /// Host challenge (hex)
    #[arg(long, requires = "card")]
    pub host: Option<String>,

    /// Card challenge (hex)
    #[arg(long, requires = "host")]
    pub card: Option<String>,
}

/// [`KeyArgs`] with every hex field decoded
struct Request {
    protocol: Protocol,
    cuid: Vec<u8>,
    kdd: Option<Vec<u8>>,
    key_info: Vec<u8>,
    host: Option<Vec<u8>>,
    card: Option<Vec<u8>>,
}

impl Request {
    fn decode(args: &KeyArgs) -> anyhow::Result<Self> {
        Ok(Self {
            protocol: Protocol::from_version(args.protocol)?,
            cuid: decode_hex("cuid", &args.cuid)?,
            kdd: args.kdd.as_deref().map(|kdd| decode_hex("kdd", kdd)).transpose()?,
            key_info: decode_hex("key info", &args.key_info)?,
            host: args.host.as_deref().map(|host| decode_hex("host challenge", host)).transpose()?,
            card: args.card.as_deref().map(|card| decode_hex("card challenge", card)).transpose()?,
        })
    }

    fn params(&self, key_type: KeyType) -> SessionKeyParams<'_> {
        SessionKeyParams {
            key_type,
            cuid: &self.cuid,
            kdd: self.kdd.as_deref(),
            key_info: &self.key_info,
            host_challenge: self.host.as_deref(),
            card_challenge: self.card.as_deref(),
        }
    }
}

fn decode_hex(name: &str, value: &str) -> anyhow::Result<Vec<u8>> {
    let value = value.trim().trim_start_matches("0x");
    hex::decode(value).with_context(|| format!("{name} is not valid hex"))
}

/// Load the engine configuration and key set, or the default developer key set
pub fn load_config(
    path: Option<&Path>,
    key_set: &str,
) -> anyhow::Result<(SecureChannelProtocol, KeySet)> {
    let Some(path) = path else {
        debug!("No configuration given, using the default developer key set");
        let key_set = KeySet::new(key_set, 0xFF)
            .with_developer_keys(&DEFAULT_DEVELOPER_KEY)
            .with_gp_params(Protocol::Scp01, GpParams::new(DiversificationScheme::Visa2))
            .with_gp_params(
                Protocol::Scp03,
                GpParams::new(DiversificationScheme::Emv).with_dev_key_type(KeyFamily::Aes),
            );
        return Ok((SecureChannelProtocol::new(EngineConfig::default()), key_set));
    };

    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let source = PropertiesConfig::parse(&text)?;
    let config = EngineConfig::load(&source)?;
    let key_set = KeySet::load(&source, key_set)?;

    Ok((SecureChannelProtocol::new(config), key_set))
}

/// Create the software token and provision the keys given on the command line
pub fn open_token(args: &TokenArgs, config: &EngineConfig) -> anyhow::Result<SoftToken> {
    let mut token = SoftToken::new(TOKEN_NAME);

    for entry in &args.master_keys {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("master key must be NAME=KEY"))?;
        let (aes, value) = match value.strip_prefix("aes:") {
            Some(value) => (true, value),
            None => (false, value.strip_prefix("des3:").unwrap_or(value)),
        };
        let material = decode_hex("master key", value)?;
        let algorithm = if aes {
            KeyAlgorithm::aes_for_len(material.len())
        } else {
            des_for_len(material.len())
        }
        .ok_or_else(|| anyhow!("master key {name} has an invalid length"))?;

        token.import_key(algorithm, &material, KeyUsages::ALL, Some(name))?;
        debug!(key = name, %algorithm, "Provisioned master key");
    }

    if let Some(value) = &args.transport_key {
        let material = decode_hex("transport key", value)?;
        let algorithm = des_for_len(material.len())
            .or_else(|| KeyAlgorithm::aes_for_len(material.len()))
            .ok_or_else(|| anyhow!("transport key has an invalid length"))?;
        token.import_key(
            algorithm,
            &material,
            KeyUsages::ALL,
            Some(config.transport_key_name.as_str()),
        )?;
    }

    Ok(token)
}

/// Add the `--mapping` entries to `key_set`
pub fn apply_mappings(key_set: KeySet, args: &TokenArgs) -> anyhow::Result<KeySet> {
    args.mappings.iter().try_fold(key_set, |key_set, entry| {
        let (key_info, name) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("mapping must be KEYINFO=NAME"))?;
        let key_info = KeyInfo::from_slice(&decode_hex("key info", key_info)?)?;
        Ok(key_set.with_master_key(key_info, MasterKeyRef::new(TOKEN_NAME, name)))
    })
}

const fn des_for_len(len: usize) -> Option<KeyAlgorithm> {
    match len {
        16 => Some(KeyAlgorithm::Des2),
        24 => Some(KeyAlgorithm::Des3),
        _ => None,
    }
}

pub fn session_key(
    engine: &SecureChannelProtocol,
    token: &mut SoftToken,
    key_set: &KeySet,
    args: &KeyArgs,
    key_type: &str,
    wrap: bool,
) -> anyhow::Result<()> {
    let key_type = KeyType::parse(key_type).ok_or_else(|| anyhow!("unknown key type {key_type}"))?;
    let request = Request::decode(args)?;

    let key = engine.compute_session_key(token, key_set, request.protocol, &request.params(key_type))?;
    let result = report_key(engine, token, &key, request.protocol, key_type, wrap);
    key.release(token);
    result
}

fn report_key(
    engine: &SecureChannelProtocol,
    token: &mut SoftToken,
    key: &SymmetricKey,
    protocol: Protocol,
    key_type: KeyType,
    wrap: bool,
) -> anyhow::Result<()> {
    let kcv = engine.compute_key_check_value(token, key, protocol)?;
    println!("{key_type} key check value: {}", hex::encode_upper(kcv));

    if wrap {
        let wrapped = engine.wrap_for_transport(token, key)?;
        println!("{key_type} key under transport key: {}", hex::encode_upper(wrapped));
    }
    Ok(())
}

pub fn cryptogram(
    engine: &SecureChannelProtocol,
    token: &mut SoftToken,
    key_set: &KeySet,
    args: &KeyArgs,
    host: bool,
    verify: Option<&str>,
) -> anyhow::Result<()> {
    let request = Request::decode(args)?;
    let params = request.params(KeyType::Enc);

    if let Some(expected) = verify {
        let expected = decode_hex("card cryptogram", expected)?;
        engine.verify_card_cryptogram(token, key_set, request.protocol, &params, &expected)?;
        info!("Card cryptogram verified");
        return Ok(());
    }

    let cryptogram_type = if host {
        CryptogramType::Host
    } else {
        CryptogramType::Card
    };
    let cryptogram =
        engine.compute_cryptogram(token, key_set, request.protocol, &params, cryptogram_type)?;
    println!("{}", hex::encode_upper(cryptogram));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn diversify_key(
    engine: &SecureChannelProtocol,
    token: &mut SoftToken,
    key_set: &KeySet,
    protocol: u8,
    cuid: &str,
    kdd: Option<&str>,
    old_key_info: &str,
    new_key_info: &str,
) -> anyhow::Result<()> {
    let protocol = Protocol::from_version(protocol)?;
    let cuid = decode_hex("cuid", cuid)?;
    let kdd = kdd.map(|kdd| decode_hex("kdd", kdd)).transpose()?;
    let old_key_info = decode_hex("old key info", old_key_info)?;
    let new_key_info = decode_hex("new key info", new_key_info)?;

    let params = DiversifyParams {
        cuid: &cuid,
        kdd: kdd.as_deref(),
        old_key_info: &old_key_info,
        new_key_info: &new_key_info,
    };
    let blob = engine.diversify_key(token, key_set, protocol, &params)?;
    println!("{}", hex::encode_upper(blob));
    Ok(())
}

pub fn kdf(
    engine: &SecureChannelProtocol,
    token: &mut SoftToken,
    master: &str,
    context: &str,
    aes: bool,
) -> anyhow::Result<()> {
    let material = decode_hex("master key", master)?;
    let context = decode_hex("context", context)?;
    let algorithm = des_for_len(material.len())
        .ok_or_else(|| anyhow!("master key must be 16 or 24 bytes"))?;
    let master = token.import_key(algorithm, &material, KeyUsages::ALL, None)?;

    let (target, protocol) = if aes {
        (KeyAlgorithm::Aes128, Protocol::Scp03)
    } else {
        (KeyAlgorithm::Des3, Protocol::Scp01)
    };
    let keys = NistSp800108Kdf::new()
        .with_key_material_logging(engine.config().log_key_material)
        .compute_card_keys(token, &master, &context, target)?;

    for key_type in KeyType::CARD_KEYS {
        let key: &SymmetricKey = keys.get(key_type);
        let kcv = engine.compute_key_check_value(token, key, protocol)?;
        println!("{key_type} key check value: {}", hex::encode_upper(kcv));
    }
    Ok(())
}
