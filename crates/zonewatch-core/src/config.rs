//! Broker configuration.
//!
//! An INI-style file with `[DB]`, `[ZONEMASTER]`, `[RPCAPI]`, `[LANGUAGE]`,
//! `[PUBLIC PROFILES]`, and `[PRIVATE PROFILES]` sections. Every key has a
//! default; the file overrides them. Unknown sections or keys are
//! configuration errors so that typos fail loudly at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain;
use crate::error::{Error, Result};
use crate::i18n;

/// Which store backend to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    Sqlite,
    Postgresql,
    Mysql,
}

impl DbEngine {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }

    const fn default_port(self) -> u16 {
        match self {
            Self::Sqlite => 0,
            Self::Postgresql => 5432,
            Self::Mysql => 3306,
        }
    }
}

impl std::str::FromStr for DbEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgresql" | "postgres" => Ok(Self::Postgresql),
            "mysql" => Ok(Self::Mysql),
            other => Err(Error::Config(format!("Unknown DB.engine: {other}"))),
        }
    }
}

/// `[DB]` section.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub engine: DbEngine,
    /// SQLite only.
    pub database_file: PathBuf,
    /// PostgreSQL / MySQL only.
    pub host: String,
    port: Option<u16>,
    pub user: String,
    pub password: String,
    pub database_name: String,
}

impl DbConfig {
    /// Configured port, or the engine's well-known default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            engine: DbEngine::Sqlite,
            database_file: PathBuf::from("zonewatch.db"),
            host: "localhost".to_string(),
            port: None,
            user: String::new(),
            password: String::new(),
            database_name: "zonewatch".to_string(),
        }
    }
}

/// `[ZONEMASTER]` section.
#[derive(Debug, Clone)]
pub struct ZonemasterConfig {
    /// Reuse window for deduplicating equivalent requests, in seconds.
    pub age_reuse_previous_test: u64,
    /// Queue tag this broker instance considers authoritative; submissions
    /// without an explicit queue land here.
    pub lock_on_queue: i64,
}

impl Default for ZonemasterConfig {
    fn default() -> Self {
        Self {
            age_reuse_previous_test: 600,
            lock_on_queue: 0,
        }
    }
}

/// `[RPCAPI]` section.
#[derive(Debug, Clone)]
pub struct RpcapiConfig {
    pub enable_add_api_user: bool,
    pub enable_add_batch_job: bool,
}

impl Default for RpcapiConfig {
    fn default() -> Self {
        Self {
            enable_add_api_user: true,
            enable_add_batch_job: true,
        }
    }
}

/// Complete broker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub zonemaster: ZonemasterConfig,
    pub rpcapi: RpcapiConfig,
    /// Configured `ll_CC[.UTF-8]` locales, `[LANGUAGE] locale`.
    pub locales: Vec<String>,
    pub public_profiles: BTreeMap<String, PathBuf>,
    pub private_profiles: BTreeMap<String, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            zonemaster: ZonemasterConfig::default(),
            rpcapi: RpcapiConfig::default(),
            locales: vec!["en_US".to_string()],
            public_profiles: BTreeMap::new(),
            private_profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from an INI-style file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_ini_str(&content)
    }

    /// Parse configuration from INI-style text.
    pub fn from_ini_str(input: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut section = String::new();

        for (idx, raw) in input.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name
                    .strip_suffix(']')
                    .ok_or_else(|| Error::Config(format!("Malformed section at line {lineno}")))?;
                section = name.trim().to_ascii_uppercase();
                match section.as_str() {
                    "DB" | "ZONEMASTER" | "RPCAPI" | "LANGUAGE" | "PUBLIC PROFILES"
                    | "PRIVATE PROFILES" => {}
                    other => {
                        return Err(Error::Config(format!(
                            "Unknown section [{other}] at line {lineno}"
                        )))
                    }
                }
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::Config(format!("Expected key = value at line {lineno}"))
            })?;
            let key = key.trim();
            let value = value.trim();

            match section.as_str() {
                "DB" => config.db_key(key, value)?,
                "ZONEMASTER" => config.zonemaster_key(key, value)?,
                "RPCAPI" => config.rpcapi_key(key, value)?,
                "LANGUAGE" => config.language_key(key, value)?,
                "PUBLIC PROFILES" => {
                    let name = profile_key(key)?;
                    config.public_profiles.insert(name, PathBuf::from(value));
                }
                "PRIVATE PROFILES" => {
                    let name = profile_key(key)?;
                    config.private_profiles.insert(name, PathBuf::from(value));
                }
                _ => {
                    return Err(Error::Config(format!(
                        "Key outside of any section at line {lineno}"
                    )))
                }
            }
        }

        Ok(config)
    }

    fn db_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "engine" => self.db.engine = value.parse()?,
            "database_file" => self.db.database_file = PathBuf::from(value),
            "host" => self.db.host = value.to_string(),
            "port" => {
                let port: u16 = value
                    .parse()
                    .map_err(|_| Error::Config(format!("Invalid DB.port: {value}")))?;
                self.db.port = Some(port);
            }
            "user" => self.db.user = value.to_string(),
            "password" => self.db.password = value.to_string(),
            "database_name" => self.db.database_name = value.to_string(),
            other => return Err(Error::Config(format!("Unknown DB key: {other}"))),
        }
        Ok(())
    }

    fn zonemaster_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "age_reuse_previous_test" => {
                self.zonemaster.age_reuse_previous_test = value.parse().map_err(|_| {
                    Error::Config(format!("Invalid ZONEMASTER.age_reuse_previous_test: {value}"))
                })?;
            }
            "lock_on_queue" => {
                self.zonemaster.lock_on_queue = value.parse().map_err(|_| {
                    Error::Config(format!("Invalid ZONEMASTER.lock_on_queue: {value}"))
                })?;
            }
            other => return Err(Error::Config(format!("Unknown ZONEMASTER key: {other}"))),
        }
        Ok(())
    }

    fn rpcapi_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "enable_add_api_user" => self.rpcapi.enable_add_api_user = parse_bool(value)?,
            "enable_add_batch_job" => self.rpcapi.enable_add_batch_job = parse_bool(value)?,
            other => return Err(Error::Config(format!("Unknown RPCAPI key: {other}"))),
        }
        Ok(())
    }

    fn language_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "locale" => {
                let locales: Vec<String> =
                    value.split_whitespace().map(str::to_string).collect();
                if locales.is_empty() {
                    return Err(Error::Config("LANGUAGE.locale is empty".to_string()));
                }
                for locale in &locales {
                    if i18n::parse_locale(locale).is_none() {
                        return Err(Error::Config(format!(
                            "Invalid locale in LANGUAGE.locale: {locale}"
                        )));
                    }
                }
                self.locales = locales;
            }
            other => return Err(Error::Config(format!("Unknown LANGUAGE key: {other}"))),
        }
        Ok(())
    }

    /// All known profile names, `default` always included.
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::iter::once("default".to_string())
            .chain(self.public_profiles.keys().cloned())
            .chain(self.private_profiles.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Is `name` (already lowercased) a configured profile?
    pub fn has_profile(&self, name: &str) -> bool {
        name == "default"
            || self.public_profiles.contains_key(name)
            || self.private_profiles.contains_key(name)
    }

    /// Client-facing language tags for the configured locales.
    pub fn language_tags(&self) -> Vec<String> {
        i18n::language_tags(&self.locales)
    }

    /// Resolve a client language tag against the configured locales.
    pub fn resolve_language_tag(&self, tag: &str) -> Option<String> {
        i18n::resolve_tag(tag, &self.locales)
    }
}

fn profile_key(key: &str) -> Result<String> {
    domain::valid_profile_name(key)
        .ok_or_else(|| Error::Config(format!("Invalid profile name: {key}")))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        other => Err(Error::Config(format!("Invalid boolean: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.db.engine, DbEngine::Sqlite);
        assert_eq!(config.zonemaster.age_reuse_previous_test, 600);
        assert_eq!(config.zonemaster.lock_on_queue, 0);
        assert!(config.rpcapi.enable_add_api_user);
        assert_eq!(config.locales, vec!["en_US"]);
        assert_eq!(config.profile_names(), vec!["default"]);
    }

    #[test]
    fn parses_a_full_file() {
        let config = Config::from_ini_str(
            r"
; broker configuration
[DB]
engine        = postgresql
host          = db.internal
user          = zonewatch
password      = hunter2
database_name = zonewatch

[ZONEMASTER]
age_reuse_previous_test = 300
lock_on_queue           = 2

[RPCAPI]
enable_add_api_user  = no
enable_add_batch_job = yes

[LANGUAGE]
locale = en_US fr_FR.UTF-8

[PUBLIC PROFILES]
strict = /etc/zonewatch/strict.json

[PRIVATE PROFILES]
internal = /etc/zonewatch/internal.json
",
        )
        .unwrap();

        assert_eq!(config.db.engine, DbEngine::Postgresql);
        assert_eq!(config.db.port(), 5432);
        assert_eq!(config.db.host, "db.internal");
        assert_eq!(config.zonemaster.age_reuse_previous_test, 300);
        assert_eq!(config.zonemaster.lock_on_queue, 2);
        assert!(!config.rpcapi.enable_add_api_user);
        assert!(config.rpcapi.enable_add_batch_job);
        assert_eq!(config.locales, vec!["en_US", "fr_FR.UTF-8"]);
        assert_eq!(config.profile_names(), vec!["default", "internal", "strict"]);
        assert!(config.has_profile("strict"));
        assert!(!config.has_profile("missing"));
    }

    #[test]
    fn rejects_unknown_section_and_key() {
        assert!(Config::from_ini_str("[NOPE]\n").is_err());
        assert!(Config::from_ini_str("[DB]\nnot_a_key = 1\n").is_err());
        assert!(Config::from_ini_str("orphan = 1\n").is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Config::from_ini_str("[DB]\nengine = oracle\n").is_err());
        assert!(Config::from_ini_str("[DB]\nport = 70000\n").is_err());
        assert!(Config::from_ini_str("[RPCAPI]\nenable_add_api_user = maybe\n").is_err());
        assert!(Config::from_ini_str("[LANGUAGE]\nlocale = english\n").is_err());
    }

    #[test]
    fn engine_names_parse_case_insensitively() {
        assert_eq!("SQLite".parse::<DbEngine>().unwrap(), DbEngine::Sqlite);
        assert_eq!("postgres".parse::<DbEngine>().unwrap(), DbEngine::Postgresql);
        assert_eq!("MySQL".parse::<DbEngine>().unwrap(), DbEngine::Mysql);
    }
}
