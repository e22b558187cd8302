//! Guard configuration.
//!
//! Loaded from JSON (`from_json_str` / `from_file`) or from `ECC_GUARD_*`
//! environment variables (`from_env`). Every field has a default, so a
//! config only needs to name what it changes. Keys are camelCase:
//!
//! ```json
//! {
//!   "privateKey": "<64 hex>",
//!   "publicKeyX": "<64 hex>",
//!   "publicKeyY": "<64 hex>",
//!   "userContextCache": { "maxSize": 5000, "expireMinutes": 120 },
//!   "replayAttack": { "timeWindowMs": 300000 },
//!   "uniqueRequest": { "strictMode": true }
//! }
//! ```
//!
//! Environment variables:
//!
//! ```text
//! ECC_GUARD_ENABLED                      true | false
//! ECC_GUARD_PRIVATE_KEY                  service private key (hex)
//! ECC_GUARD_PUBLIC_KEY_X / _Y            service public key coordinates
//! ECC_GUARD_CONTEXT_CACHE_MAX_SIZE       default 5000
//! ECC_GUARD_CONTEXT_CACHE_EXPIRE_MINUTES default 120
//! ECC_GUARD_REPLAY_CACHE_MAX_SIZE        default 1000
//! ECC_GUARD_REPLAY_CACHE_EXPIRE_MINUTES  default 30
//! ECC_GUARD_REPLAY_WINDOW_MS             default 300000
//! ECC_GUARD_REPLAY_FUTURE_TOLERANCE_SECS default 60
//! ECC_GUARD_UNIQUE_CACHE_MAX_SIZE        default 10000
//! ECC_GUARD_UNIQUE_CACHE_EXPIRE_MINUTES  default 60
//! ECC_GUARD_UNIQUE_STRICT_MODE           default true
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::dispatch::FieldNames;
use crate::error::{ErrorCode, GuardError};
use crate::replay::ReplayPolicy;
use crate::unique::UniquePolicy;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// A required value is absent or blank.
    Missing(&'static str),
    /// A numeric setting must be greater than zero.
    NotPositive(&'static str),
    /// An environment variable could not be parsed. Carries the variable name.
    InvalidValue(String),
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(field) => write!(f, "{} is required", field),
            Self::NotPositive(field) => write!(f, "{} must be greater than 0", field),
            Self::InvalidValue(var) => write!(f, "invalid value for {}", var),
            Self::Io(e) => write!(f, "cannot read config: {}", e),
            Self::Parse(e) => write!(f, "cannot parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for GuardError {
    fn from(err: ConfigError) -> Self {
        GuardError::new(ErrorCode::Configuration, err.to_string()).with_source(err)
    }
}

// ---------------------------------------------------------------------------
// Secret string
// ---------------------------------------------------------------------------

/// Hex key text held in config. Redacted in `Debug`, wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretHex(String);

impl SecretHex {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            f.write_str("SecretHex(<empty>)")
        } else {
            f.write_str("SecretHex([REDACTED])")
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    pub max_size: usize,
    pub expire_minutes: u64,
}

impl CacheSettings {
    pub const USER_CONTEXT: Self = Self::new(5000, 120);
    pub const REPLAY: Self = Self::new(1000, 30);
    pub const UNIQUE_REQUEST: Self = Self::new(10_000, 60);

    pub const fn new(max_size: usize, expire_minutes: u64) -> Self {
        Self {
            max_size,
            expire_minutes,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.expire_minutes.saturating_mul(60))
    }

    fn validate(&self, size_field: &'static str, ttl_field: &'static str) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::NotPositive(size_field));
        }
        if self.expire_minutes == 0 {
            return Err(ConfigError::NotPositive(ttl_field));
        }
        Ok(())
    }
}

/// A cache section as written in JSON. Absent fields fall back to the
/// defaults of whichever cache the section configures.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheOverrides {
    max_size: Option<usize>,
    expire_minutes: Option<u64>,
}

impl CacheOverrides {
    fn over(self, base: CacheSettings) -> CacheSettings {
        CacheSettings {
            max_size: self.max_size.unwrap_or(base.max_size),
            expire_minutes: self.expire_minutes.unwrap_or(base.expire_minutes),
        }
    }
}

fn user_context_cache<'de, D: Deserializer<'de>>(de: D) -> Result<CacheSettings, D::Error> {
    CacheOverrides::deserialize(de).map(|o| o.over(CacheSettings::USER_CONTEXT))
}

fn replay_cache<'de, D: Deserializer<'de>>(de: D) -> Result<CacheSettings, D::Error> {
    CacheOverrides::deserialize(de).map(|o| o.over(CacheSettings::REPLAY))
}

fn unique_request_cache<'de, D: Deserializer<'de>>(de: D) -> Result<CacheSettings, D::Error> {
    CacheOverrides::deserialize(de).map(|o| o.over(CacheSettings::UNIQUE_REQUEST))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplaySection {
    #[serde(deserialize_with = "replay_cache")]
    pub cache: CacheSettings,
    #[serde(flatten)]
    pub policy: ReplayPolicy,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            cache: CacheSettings::REPLAY,
            policy: ReplayPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UniqueSection {
    #[serde(deserialize_with = "unique_request_cache")]
    pub cache: CacheSettings,
    #[serde(flatten)]
    pub policy: UniquePolicy,
}

impl Default for UniqueSection {
    fn default() -> Self {
        Self {
            cache: CacheSettings::UNIQUE_REQUEST,
            policy: UniquePolicy::default(),
        }
    }
}

/// Marker header written on encrypted responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseSettings {
    pub status_header_name: String,
    pub status_header_value: String,
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            status_header_name: "encryptStatusHeader".into(),
            status_header_value: "encrypt-complete".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GuardConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardConfig {
    /// When false the whole layer passes requests and responses through.
    pub enabled: bool,
    pub private_key: SecretHex,
    pub public_key_x: String,
    pub public_key_y: String,
    #[serde(deserialize_with = "user_context_cache")]
    pub user_context_cache: CacheSettings,
    pub replay_attack: ReplaySection,
    pub unique_request: UniqueSection,
    pub decrypt_fields: FieldNames,
    pub response_encryption: ResponseSettings,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            private_key: SecretHex::default(),
            public_key_x: String::new(),
            public_key_y: String::new(),
            user_context_cache: CacheSettings::USER_CONTEXT,
            replay_attack: ReplaySection::default(),
            unique_request: UniqueSection::default(),
            decrypt_fields: FieldNames::default(),
            response_encryption: ResponseSettings::default(),
        }
    }
}

impl GuardConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&text)
    }

    /// Defaults overridden by `ECC_GUARD_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "ECC_GUARD_ENABLED")? {
            config.enabled = v;
        }
        if let Some(v) = lookup("ECC_GUARD_PRIVATE_KEY") {
            config.private_key = SecretHex::new(v);
        }
        if let Some(v) = lookup("ECC_GUARD_PUBLIC_KEY_X") {
            config.public_key_x = v;
        }
        if let Some(v) = lookup("ECC_GUARD_PUBLIC_KEY_Y") {
            config.public_key_y = v;
        }

        let ctx = &mut config.user_context_cache;
        set_parsed(&lookup, "ECC_GUARD_CONTEXT_CACHE_MAX_SIZE", &mut ctx.max_size)?;
        set_parsed(&lookup, "ECC_GUARD_CONTEXT_CACHE_EXPIRE_MINUTES", &mut ctx.expire_minutes)?;

        let replay = &mut config.replay_attack;
        set_parsed(&lookup, "ECC_GUARD_REPLAY_CACHE_MAX_SIZE", &mut replay.cache.max_size)?;
        set_parsed(&lookup, "ECC_GUARD_REPLAY_CACHE_EXPIRE_MINUTES", &mut replay.cache.expire_minutes)?;
        set_parsed(&lookup, "ECC_GUARD_REPLAY_WINDOW_MS", &mut replay.policy.time_window_ms)?;
        set_parsed(&lookup, "ECC_GUARD_REPLAY_FUTURE_TOLERANCE_SECS", &mut replay.policy.future_tolerance_secs)?;

        let unique = &mut config.unique_request;
        set_parsed(&lookup, "ECC_GUARD_UNIQUE_CACHE_MAX_SIZE", &mut unique.cache.max_size)?;
        set_parsed(&lookup, "ECC_GUARD_UNIQUE_CACHE_EXPIRE_MINUTES", &mut unique.cache.expire_minutes)?;
        set_parsed(&lookup, "ECC_GUARD_UNIQUE_STRICT_MODE", &mut unique.policy.strict_mode)?;

        Ok(config)
    }

    /// Startup checks. Skipped entirely when the layer is disabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.private_key.is_blank() {
            return Err(ConfigError::Missing("privateKey"));
        }
        if self.public_key_x.trim().is_empty() {
            return Err(ConfigError::Missing("publicKeyX"));
        }
        if self.public_key_y.trim().is_empty() {
            return Err(ConfigError::Missing("publicKeyY"));
        }
        self.user_context_cache
            .validate("userContextCache.maxSize", "userContextCache.expireMinutes")?;
        self.replay_attack
            .cache
            .validate("replayAttack.cache.maxSize", "replayAttack.cache.expireMinutes")?;
        self.unique_request
            .cache
            .validate("uniqueRequest.cache.maxSize", "uniqueRequest.cache.expireMinutes")?;
        if self.replay_attack.policy.time_window_ms == 0 {
            return Err(ConfigError::NotPositive("replayAttack.timeWindowMs"));
        }
        Ok(())
    }

    /// One-line description for startup logs. Never includes key material.
    pub fn summary(&self) -> String {
        format!(
            "enabled={} serverKey={} contextCache={}/{}m replayCache={}/{}m window={}ms uniqueCache={}/{}m strict={}",
            self.enabled,
            if self.private_key.is_blank() { "unset" } else { "set" },
            self.user_context_cache.max_size,
            self.user_context_cache.expire_minutes,
            self.replay_attack.cache.max_size,
            self.replay_attack.cache.expire_minutes,
            self.replay_attack.policy.time_window_ms,
            self.unique_request.cache.max_size,
            self.unique_request.cache.expire_minutes,
            self.unique_request.policy.strict_mode,
        )
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        None => Ok(None),
    }
}

fn set_parsed<F, T>(lookup: &F, name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(v) = parse_var(lookup, name)? {
        *slot = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn keyed() -> GuardConfig {
        GuardConfig {
            private_key: SecretHex::new("01"),
            public_key_x: "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798".into(),
            public_key_y: "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8".into(),
            ..GuardConfig::default()
        }
    }

    #[test]
    fn defaults() {
        let c = GuardConfig::default();
        assert!(c.enabled);
        assert_eq!(c.user_context_cache, CacheSettings::new(5000, 120));
        assert_eq!(c.replay_attack.cache, CacheSettings::new(1000, 30));
        assert_eq!(c.unique_request.cache, CacheSettings::new(10_000, 60));
        assert_eq!(c.replay_attack.policy.time_window_ms, 300_000);
        assert_eq!(c.replay_attack.policy.future_tolerance_secs, 60);
        assert!(c.unique_request.policy.strict_mode);
        assert_eq!(c.decrypt_fields.unique_user_key, "username");
        assert_eq!(c.response_encryption.status_header_value, "encrypt-complete");
    }

    #[test]
    fn validation() {
        assert!(matches!(GuardConfig::default().validate(), Err(ConfigError::Missing("privateKey"))));
        assert!(keyed().validate().is_ok());

        let mut c = keyed();
        c.unique_request.cache.expire_minutes = 0;
        assert!(matches!(c.validate(), Err(ConfigError::NotPositive("uniqueRequest.cache.expireMinutes"))));

        let disabled = GuardConfig {
            enabled: false,
            ..GuardConfig::default()
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = GuardConfig::from_json_str(
            r#"{"privateKey":"01","replayAttack":{"timeWindowMs":1000,"cache":{"maxSize":5,"expireMinutes":1}},"uniqueRequest":{"strictMode":false}}"#,
        )
        .unwrap();
        assert_eq!(c.private_key.expose(), "01");
        assert_eq!(c.replay_attack.policy.time_window_ms, 1000);
        assert_eq!(c.replay_attack.policy.header_name, "X-Timestamp");
        assert_eq!(c.replay_attack.cache.max_size, 5);
        assert!(!c.unique_request.policy.strict_mode);
        assert_eq!(c.user_context_cache.max_size, 5000);
    }

    #[test]
    fn partial_cache_sections_keep_their_own_defaults() {
        let c = GuardConfig::from_json_str(
            r#"{"userContextCache":{"maxSize":10},"replayAttack":{"cache":{"expireMinutes":5}},"uniqueRequest":{"cache":{}}}"#,
        )
        .unwrap();
        assert_eq!(c.user_context_cache, CacheSettings::new(10, 120));
        assert_eq!(c.replay_attack.cache, CacheSettings::new(1000, 5));
        assert_eq!(c.unique_request.cache, CacheSettings::UNIQUE_REQUEST);

        assert!(matches!(
            GuardConfig::from_json_str(r#"{"userContextCache":{"maxSize":"big"}}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn file_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"enabled":false}}"#).unwrap();
        let c = GuardConfig::from_file(file.path()).unwrap();
        assert!(!c.enabled);

        assert!(matches!(GuardConfig::from_file("/definitely/not/here.json"), Err(ConfigError::Io(_))));
    }

    #[test]
    fn env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ECC_GUARD_PRIVATE_KEY", "0x01"),
            ("ECC_GUARD_REPLAY_WINDOW_MS", "2500"),
            ("ECC_GUARD_UNIQUE_STRICT_MODE", "false"),
        ]
        .into_iter()
        .collect();
        let c = GuardConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.private_key.expose(), "0x01");
        assert_eq!(c.replay_attack.policy.time_window_ms, 2500);
        assert!(!c.unique_request.policy.strict_mode);

        let err = GuardConfig::from_lookup(|k| (k == "ECC_GUARD_CONTEXT_CACHE_MAX_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid value for ECC_GUARD_CONTEXT_CACHE_MAX_SIZE");
    }

    #[test]
    fn debug_and_summary_hide_key() {
        let c = keyed();
        let debug = format!("{:?}", c);
        assert!(debug.contains("SecretHex([REDACTED])"));
        assert!(c.summary().contains("serverKey=set"));
        assert!(!c.summary().contains("79be"));
    }
}
