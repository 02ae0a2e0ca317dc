//! Key set and engine configuration
//!
//! Key sets are read from flat `key=value` configuration using the `tks.<keySet>.*` names:
//!
//! ```text
//! tks.defKeySet.auth_key=#40#41#42#43#44#45#46#47#48#49#4a#4b#4c#4d#4e#4f
//! tks.defKeySet.prot1.divers=visa2
//! tks.defKeySet.prot1.diversVer1Keys=none
//! tks.defKeySet.nistSP800-108KdfOnKeyVersion=00
//! tks.defKeySet.mk_mappings.#02#01=internal:masterKey
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use derive_more::Display;
use zeroize::Zeroizing;

use crate::{
    Error, Result,
    gp_params::{DiversificationScheme, GpParams, KeyFamily},
    types::{KeyInfo, KeyType, Protocol},
};

/// Source of configuration values
pub trait ConfigSource {
    /// Value of `key`, if set
    fn get(&self, key: &str) -> Option<String>;

    /// All keys starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// In-memory configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapConfig {
    entries: BTreeMap<String, String>,
}

impl MapConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder variant of [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key` to `value`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Configuration parsed from `key=value` lines
///
/// Blank lines and lines starting with `#` are skipped. Keys and values are trimmed; a value may
/// itself contain `=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesConfig {
    entries: MapConfig,
}

impl PropertiesConfig {
    /// Parse configuration text
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = MapConfig::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::InvalidConfiguration {
                    key: format!("line {}", number + 1),
                    reason: "expected key=value",
                })?;
            entries.insert(key.trim(), value.trim());
        }

        Ok(Self { entries })
    }
}

impl FromStr for PropertiesConfig {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text)
    }
}

impl ConfigSource for PropertiesConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries.keys_with_prefix(prefix)
    }
}

/// Location of a master key
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{token}:{key}")]
pub struct MasterKeyRef {
    /// Name of the token holding the key
    pub token: String,
    /// Key nickname, before the engine's master key prefix is applied
    pub key: String,
}

impl MasterKeyRef {
    /// Create a reference
    pub fn new(token: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            key: key.into(),
        }
    }
}

/// Named key set configuration
#[derive(Clone)]
pub struct KeySet {
    name: String,
    developer_keys: HashMap<KeyType, Zeroizing<Vec<u8>>>,
    params: HashMap<Protocol, GpParams>,
    nist_kdf_on_key_version: u8,
    nist_use_cuid_as_kdd: bool,
    master_keys: HashMap<KeyInfo, MasterKeyRef>,
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("name", &self.name)
            .field("developer_keys", &self.developer_keys.keys().collect::<Vec<_>>())
            .field("params", &self.params)
            .field("nist_kdf_on_key_version", &self.nist_kdf_on_key_version)
            .field("nist_use_cuid_as_kdd", &self.nist_use_cuid_as_kdd)
            .field("master_keys", &self.master_keys)
            .finish()
    }
}

impl KeySet {
    /// Create a key set using the NIST KDF for key versions at or above `nist_kdf_on_key_version`
    pub fn new(name: impl Into<String>, nist_kdf_on_key_version: u8) -> Self {
        Self {
            name: name.into(),
            developer_keys: HashMap::new(),
            params: HashMap::new(),
            nist_kdf_on_key_version,
            nist_use_cuid_as_kdd: false,
            master_keys: HashMap::new(),
        }
    }

    /// Set a developer key; [`KeyType::Rmac`] is stored as the MAC key
    pub fn with_developer_key(mut self, key_type: KeyType, material: &[u8]) -> Self {
        self.developer_keys
            .insert(key_type.card_key(), Zeroizing::new(material.to_vec()));
        self
    }

    /// Set the same developer key for enc, mac and kek
    pub fn with_developer_keys(mut self, material: &[u8]) -> Self {
        for key_type in KeyType::CARD_KEYS {
            self = self.with_developer_key(key_type, material);
        }
        self
    }

    /// Set the diversification parameters of a protocol band
    pub fn with_gp_params(mut self, protocol: Protocol, params: GpParams) -> Self {
        self.params.insert(protocol, params);
        self
    }

    /// Use the CUID rather than the KDD as NIST KDF context
    pub const fn with_cuid_as_kdd(mut self, enabled: bool) -> Self {
        self.nist_use_cuid_as_kdd = enabled;
        self
    }

    /// Map the key set identified by `key_info` to a master key
    pub fn with_master_key(mut self, key_info: KeyInfo, master: MasterKeyRef) -> Self {
        self.master_keys.insert(key_info, master);
        self
    }

    /// Key set name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// NIST KDF threshold key version
    pub const fn nist_kdf_on_key_version(&self) -> u8 {
        self.nist_kdf_on_key_version
    }

    /// Whether the NIST KDF context is the CUID
    pub const fn nist_use_cuid_as_kdd(&self) -> bool {
        self.nist_use_cuid_as_kdd
    }

    /// Developer key material for `key_type`
    pub fn developer_key(&self, key_type: KeyType) -> Result<&[u8]> {
        self.developer_keys
            .get(&key_type.card_key())
            .map(|material| material.as_slice())
            .ok_or_else(|| {
                Error::ConfigurationMissing(format!(
                    "tks.{}.{}",
                    self.name,
                    developer_key_name(key_type)
                ))
            })
    }

    /// Diversification parameters of `protocol`
    pub fn gp_params(&self, protocol: Protocol) -> Result<&GpParams> {
        self.params.get(&protocol).ok_or_else(|| {
            Error::ConfigurationMissing(format!(
                "tks.{}.prot{}.divers",
                self.name,
                protocol.version()
            ))
        })
    }

    /// Master key of the key set identified by `key_info`
    pub fn master_key(&self, key_info: KeyInfo) -> Result<&MasterKeyRef> {
        self.master_keys.get(&key_info).ok_or_else(|| {
            Error::ConfigurationMissing(format!("tks.{}.mk_mappings.{key_info}", self.name))
        })
    }

    /// Load key set `name` from `source`
    pub fn load(source: &dyn ConfigSource, name: &str) -> Result<Self> {
        let prefix = format!("tks.{name}.");
        let key = |suffix: &str| format!("{prefix}{suffix}");

        let threshold_key = key("nistSP800-108KdfOnKeyVersion");
        let threshold = source
            .get(&threshold_key)
            .ok_or_else(|| Error::ConfigurationMissing(threshold_key.clone()))?;
        let mut key_set = Self::new(name, parse_hex_byte(&threshold_key, &threshold)?);

        let cuid_key = key("nistSP800-108KdfUseCuidAsKdd");
        if let Some(value) = source.get(&cuid_key) {
            key_set.nist_use_cuid_as_kdd = parse_bool(&cuid_key, &value)?;
        }

        for key_type in KeyType::CARD_KEYS {
            let config_key = key(developer_key_name(key_type));
            if let Some(value) = source.get(&config_key) {
                let material = parse_key_material(&config_key, &value)?;
                key_set.developer_keys.insert(key_type, material);
            }
        }

        for protocol in [Protocol::Scp01, Protocol::Scp03] {
            let band = format!("prot{}.", protocol.version());
            let divers_key = key(&format!("{band}divers"));
            let Some(divers) = source.get(&divers_key) else {
                continue;
            };

            let default_dev = match protocol {
                Protocol::Scp03 => KeyFamily::Aes,
                _ => KeyFamily::Des3,
            };
            let params = GpParams::new(parse_scheme(&divers_key, &divers)?)
                .with_version1_diversification(
                    optional(source, &key(&format!("{band}diversVer1Keys")), parse_scheme)?
                        .unwrap_or_default(),
                )
                .with_dev_key_type(
                    optional(source, &key(&format!("{band}devKeyType")), parse_family)?
                        .unwrap_or(default_dev),
                )
                .with_master_key_type(
                    optional(source, &key(&format!("{band}masterKeyType")), parse_family)?
                        .unwrap_or(KeyFamily::Des3),
                );
            key_set.params.insert(protocol, params);
        }

        let mappings = key("mk_mappings.");
        for config_key in source.keys_with_prefix(&mappings) {
            let key_info = parse_key_info(&config_key, &config_key[mappings.len()..])?;
            let value = source.get(&config_key).unwrap_or_default();
            let (token, master) = value
                .split_once(':')
                .filter(|(token, master)| !token.is_empty() && !master.is_empty())
                .ok_or_else(|| Error::InvalidConfiguration {
                    key: config_key.clone(),
                    reason: "expected <token>:<keyName>",
                })?;
            key_set
                .master_keys
                .insert(key_info, MasterKeyRef::new(token, master));
        }

        Ok(key_set)
    }
}

pub(crate) const fn developer_key_name(key_type: KeyType) -> &'static str {
    match key_type {
        KeyType::Enc => "auth_key",
        KeyType::Mac | KeyType::Rmac => "mac_key",
        KeyType::Kek => "kek_key",
    }
}

fn optional<T>(
    source: &dyn ConfigSource,
    key: &str,
    parse: fn(&str, &str) -> Result<T>,
) -> Result<Option<T>> {
    source.get(key).map(|value| parse(key, &value)).transpose()
}

fn parse_scheme(key: &str, value: &str) -> Result<DiversificationScheme> {
    DiversificationScheme::parse(value).ok_or_else(|| Error::InvalidConfiguration {
        key: key.to_string(),
        reason: "expected emv, visa2 or none",
    })
}

fn parse_family(key: &str, value: &str) -> Result<KeyFamily> {
    KeyFamily::parse(value).ok_or_else(|| Error::InvalidConfiguration {
        key: key.to_string(),
        reason: "expected DES3 or AES",
    })
}

fn parse_hex_byte(key: &str, value: &str) -> Result<u8> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u8::from_str_radix(digits, 16).map_err(|_| Error::InvalidConfiguration {
        key: key.to_string(),
        reason: "expected a hex byte",
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::InvalidConfiguration {
            key: key.to_string(),
            reason: "expected true or false",
        }),
    }
}

/// Key bytes written as `#40#41...` or plain hex
fn parse_key_material(key: &str, value: &str) -> Result<Zeroizing<Vec<u8>>> {
    let digits = Zeroizing::new(
        value
            .chars()
            .filter(|c| *c != '#' && !c.is_whitespace())
            .collect::<String>(),
    );
    let material = hex::decode(digits.as_str())
        .map(Zeroizing::new)
        .map_err(|_| Error::InvalidConfiguration {
            key: key.to_string(),
            reason: "expected hex key bytes",
        })?;

    if !matches!(material.len(), 16 | 24 | 32) {
        return Err(Error::InvalidConfiguration {
            key: key.to_string(),
            reason: "expected a 16, 24 or 32 byte key",
        });
    }
    Ok(material)
}

/// Mapping suffix `#VV#PP`
fn parse_key_info(key: &str, suffix: &str) -> Result<KeyInfo> {
    let invalid = || Error::InvalidConfiguration {
        key: key.to_string(),
        reason: "expected #<version>#<protocol>",
    };

    let mut parts = suffix.strip_prefix('#').ok_or_else(invalid)?.split('#');
    let (Some(version), Some(protocol), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let version = u8::from_str_radix(version, 16).map_err(|_| invalid())?;
    let protocol = u8::from_str_radix(protocol, 16).map_err(|_| invalid())?;
    Ok(KeyInfo::new(version, protocol))
}

/// Process-wide engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Protocol used when a request does not name one
    pub default_protocol: Protocol,
    /// Prefix prepended to mapped master key names
    pub master_key_prefix: String,
    /// Nickname of the shared secret used to wrap keys for transport
    pub transport_key_name: String,
    /// Dump intermediate key material at trace level
    pub log_key_material: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_protocol: Protocol::Scp01,
            master_key_prefix: String::new(),
            transport_key_name: "sharedSecret".to_string(),
            log_key_material: false,
        }
    }
}

impl EngineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default protocol
    pub const fn with_default_protocol(mut self, protocol: Protocol) -> Self {
        self.default_protocol = protocol;
        self
    }

    /// Set the master key prefix
    pub fn with_master_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.master_key_prefix = prefix.into();
        self
    }

    /// Set the transport key nickname
    pub fn with_transport_key_name(mut self, name: impl Into<String>) -> Self {
        self.transport_key_name = name.into();
        self
    }

    /// Set whether key material is dumped at trace level
    pub const fn with_log_key_material(mut self, enabled: bool) -> Self {
        self.log_key_material = enabled;
        self
    }

    /// Read engine settings from `source`, keeping defaults for absent entries
    pub fn load(source: &dyn ConfigSource) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = source.get("tks.defaultProtocol") {
            let version = parse_hex_byte("tks.defaultProtocol", &value)?;
            config.default_protocol = Protocol::from_version(version)?;
        }
        if let Some(value) = source.get("tks.master_key_prefix") {
            config.master_key_prefix = value;
        }
        if let Some(value) = source.get("tks.tksSharedSymKeyName") {
            config.transport_key_name = value;
        }
        if let Some(value) = source.get("tks.logKeyMaterial") {
            config.log_key_material = parse_bool("tks.logKeyMaterial", &value)?;
        }

        Ok(config)
    }
}

static GLOBAL: OnceLock<EngineConfig> = OnceLock::new();

/// Install the process-wide configuration
///
/// Only the first call takes effect; later calls return `false`.
pub fn init_global(config: EngineConfig) -> bool {
    GLOBAL.set(config).is_ok()
}

/// Process-wide configuration, defaulting if [`init_global`] was never called
pub fn global() -> &'static EngineConfig {
    GLOBAL.get_or_init(EngineConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const CONFIG: &str = "
# developer keys
tks.defKeySet.auth_key=#40#41#42#43#44#45#46#47#48#49#4a#4b#4c#4d#4e#4f
tks.defKeySet.mac_key=404142434445464748494a4b4c4d4e4f
tks.defKeySet.kek_key = #40#41#42#43#44#45#46#47#48#49#4a#4b#4c#4d#4e#4f

tks.defKeySet.prot1.divers=visa2
tks.defKeySet.prot1.diversVer1Keys=none
tks.defKeySet.prot3.divers=emv
tks.defKeySet.prot3.masterKeyType=AES
tks.defKeySet.nistSP800-108KdfOnKeyVersion=0x10
tks.defKeySet.nistSP800-108KdfUseCuidAsKdd=true
tks.defKeySet.mk_mappings.#02#01=internal:masterKey
tks.defKeySet.mk_mappings.#03#03=hsm:aesMaster
tks.otherKeySet.mk_mappings.#02#01=internal:other
";

    #[test]
    fn test_load_key_set() {
        let source = PropertiesConfig::parse(CONFIG).unwrap();
        let key_set = KeySet::load(&source, "defKeySet").unwrap();

        assert_eq!(key_set.name(), "defKeySet");
        assert_eq!(key_set.nist_kdf_on_key_version(), 0x10);
        assert!(key_set.nist_use_cuid_as_kdd());
        for key_type in [KeyType::Enc, KeyType::Mac, KeyType::Kek, KeyType::Rmac] {
            assert_eq!(
                key_set.developer_key(key_type).unwrap(),
                hex!("404142434445464748494a4b4c4d4e4f")
            );
        }

        let scp01 = key_set.gp_params(Protocol::Scp01).unwrap();
        assert!(scp01.is_divers_visa2());
        assert!(!scp01.is_ver1_diversified());
        let scp03 = key_set.gp_params(Protocol::Scp03).unwrap();
        assert!(scp03.is_divers_emv());
        assert_eq!(scp03.dev_key_type, KeyFamily::Aes);
        assert_eq!(scp03.master_key_type, KeyFamily::Aes);

        assert_eq!(
            key_set.master_key(KeyInfo::new(0x02, 0x01)).unwrap(),
            &MasterKeyRef::new("internal", "masterKey")
        );
        assert_eq!(
            key_set.master_key(KeyInfo::new(0x03, 0x03)).unwrap().to_string(),
            "hsm:aesMaster"
        );
        assert!(matches!(
            key_set.master_key(KeyInfo::new(0x04, 0x01)),
            Err(Error::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_missing_entries() {
        let source = MapConfig::new().with("tks.defKeySet.prot1.divers", "emv");
        assert!(matches!(
            KeySet::load(&source, "defKeySet"),
            Err(Error::ConfigurationMissing(key)) if key == "tks.defKeySet.nistSP800-108KdfOnKeyVersion"
        ));

        let source = MapConfig::new().with("tks.defKeySet.nistSP800-108KdfOnKeyVersion", "00");
        let key_set = KeySet::load(&source, "defKeySet").unwrap();
        assert!(matches!(
            key_set.gp_params(Protocol::Scp01),
            Err(Error::ConfigurationMissing(key)) if key == "tks.defKeySet.prot1.divers"
        ));
        assert!(matches!(
            key_set.developer_key(KeyType::Enc),
            Err(Error::ConfigurationMissing(key)) if key == "tks.defKeySet.auth_key"
        ));
    }

    #[test]
    fn test_invalid_entries_do_not_echo_values() {
        let source = MapConfig::new()
            .with("tks.ks.nistSP800-108KdfOnKeyVersion", "00")
            .with("tks.ks.auth_key", "#40#41#42#zz");
        let err = KeySet::load(&source, "ks").unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
        assert!(!err.to_string().contains("zz"));

        let source = MapConfig::new()
            .with("tks.ks.nistSP800-108KdfOnKeyVersion", "00")
            .with("tks.ks.mk_mappings.#02", "internal:masterKey");
        assert!(matches!(
            KeySet::load(&source, "ks"),
            Err(Error::InvalidConfiguration { .. })
        ));

        let source = MapConfig::new()
            .with("tks.ks.nistSP800-108KdfOnKeyVersion", "00")
            .with("tks.ks.prot1.divers", "visa3");
        assert!(matches!(
            KeySet::load(&source, "ks"),
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_properties_syntax() {
        assert!(PropertiesConfig::parse("no separator here").is_err());

        let config: PropertiesConfig = "a = b=c\n\n# comment=ignored\n".parse().unwrap();
        assert_eq!(config.get("a").as_deref(), Some("b=c"));
        assert_eq!(config.get("# comment"), None);
    }

    #[test]
    fn test_keys_with_prefix() {
        let config: MapConfig = [("a.b", "1"), ("a.c", "2"), ("ab", "3"), ("b", "4")]
            .into_iter()
            .collect();
        assert_eq!(config.keys_with_prefix("a."), vec!["a.b", "a.c"]);
    }

    #[test]
    fn test_engine_config() {
        let source = MapConfig::new()
            .with("tks.defaultProtocol", "3")
            .with("tks.master_key_prefix", "prefix-")
            .with("tks.logKeyMaterial", "false");
        let config = EngineConfig::load(&source).unwrap();

        assert_eq!(
            config,
            EngineConfig::new()
                .with_default_protocol(Protocol::Scp03)
                .with_master_key_prefix("prefix-")
        );
        assert_eq!(config.transport_key_name, "sharedSecret");
        assert_eq!(
            EngineConfig::load(&MapConfig::new().with("tks.logKeyMaterial", "true")).unwrap(),
            EngineConfig::new().with_log_key_material(true)
        );
        assert!(EngineConfig::load(&MapConfig::new().with("tks.defaultProtocol", "9")).is_err());
    }

    #[test]
    fn test_global_is_initialised_once() {
        let first = global().clone();
        assert!(!init_global(EngineConfig::new().with_master_key_prefix("late-")));
        assert_eq!(global(), &first);
    }
}
