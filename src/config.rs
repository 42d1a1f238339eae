//! Environment and per-database tuning.
//!
//! Both configurations are plain key/value mappings with merge semantics:
//! [`EnvConfig::configure`] overlays the keys present in a
//! [`ConfigOverrides`] and leaves every other key untouched, and
//! [`DatabaseConfig::configure`] does the same for the open-ended
//! per-database options.
//!
//! Configuration is read once, when an environment is opened. Changing it
//! afterwards only affects the next open.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

/// Errors produced while building a configuration.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The key is not a recognized environment setting.
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    /// The value could not be parsed as an unsigned integer.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// The key being set.
        key: ConfigKey,
        /// The offending value.
        value: String,
    },
    /// The pair is not of the form `key=value`.
    #[error("malformed setting: {0}")]
    Malformed(String),
}

/// A recognized environment setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    /// Number of lock table entries.
    MaxLocks,
    /// Lock wait timeout, in microseconds.
    LockTimeout,
    /// Transaction timeout, in microseconds.
    TxnTimeout,
    /// Page cache size, in bytes.
    CacheSize,
    /// Number of named databases the environment can hold.
    MaxDbs,
}

impl ConfigKey {
    /// Every recognized key, in mapping order.
    pub const ALL: [Self; 5] =
        [Self::MaxLocks, Self::LockTimeout, Self::TxnTimeout, Self::CacheSize, Self::MaxDbs];

    /// The key's name in the mapping.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxLocks => "max_locks",
            Self::LockTimeout => "lock_timeout",
            Self::TxnTimeout => "txn_timeout",
            Self::CacheSize => "cache_size",
            Self::MaxDbs => "max_dbs",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_owned()))
    }
}

/// Environment tuning, applied when the environment is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvConfig {
    max_locks: u64,
    lock_timeout: u64,
    txn_timeout: u64,
    cache_size: u64,
    max_dbs: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_locks: 5000,
            lock_timeout: 30 * 1000 * 1000,
            txn_timeout: 30 * 1000 * 1000,
            cache_size: 1024 * 1024,
            max_dbs: 32,
        }
    }
}

impl EnvConfig {
    /// Reads a setting.
    pub const fn get(&self, key: ConfigKey) -> u64 {
        match key {
            ConfigKey::MaxLocks => self.max_locks,
            ConfigKey::LockTimeout => self.lock_timeout,
            ConfigKey::TxnTimeout => self.txn_timeout,
            ConfigKey::CacheSize => self.cache_size,
            ConfigKey::MaxDbs => self.max_dbs,
        }
    }

    /// Writes a setting.
    pub const fn set(&mut self, key: ConfigKey, value: u64) -> &mut Self {
        match key {
            ConfigKey::MaxLocks => self.max_locks = value,
            ConfigKey::LockTimeout => self.lock_timeout = value,
            ConfigKey::TxnTimeout => self.txn_timeout = value,
            ConfigKey::CacheSize => self.cache_size = value,
            ConfigKey::MaxDbs => self.max_dbs = value,
        }
        self
    }

    /// Merges `overrides` into this configuration and returns the result.
    ///
    /// Keys absent from `overrides` keep their current value, so repeated
    /// calls accumulate.
    pub fn configure(&mut self, overrides: &ConfigOverrides) -> &Self {
        for (key, value) in overrides.iter() {
            self.set(key, value);
        }
        self
    }

    /// Iterates over the full mapping.
    pub fn iter(&self) -> impl Iterator<Item = (ConfigKey, u64)> + '_ {
        ConfigKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    /// Maximum number of lock table entries.
    pub const fn max_locks(&self) -> u64 {
        self.max_locks
    }

    /// How long a transaction waits for a lock before giving up. Zero waits
    /// forever.
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_micros(self.lock_timeout)
    }

    /// How long a transaction may live. Zero disables the limit.
    pub const fn txn_timeout(&self) -> Duration {
        Duration::from_micros(self.txn_timeout)
    }

    /// Page cache size in bytes.
    pub const fn cache_size(&self) -> u64 {
        self.cache_size
    }

    /// Maximum number of named databases.
    pub const fn max_dbs(&self) -> u64 {
        self.max_dbs
    }
}

/// A partial [`EnvConfig`], merged with [`EnvConfig::configure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    values: BTreeMap<ConfigKey, u64>,
}

impl ConfigOverrides {
    /// Creates an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides one setting.
    pub fn set(mut self, key: ConfigKey, value: u64) -> Self {
        self.values.insert(key, value);
        self
    }

    /// Overrides the lock table size.
    pub fn max_locks(self, max_locks: u64) -> Self {
        self.set(ConfigKey::MaxLocks, max_locks)
    }

    /// Overrides the lock wait timeout.
    pub fn lock_timeout(self, timeout: Duration) -> Self {
        self.set(ConfigKey::LockTimeout, micros(timeout))
    }

    /// Overrides the transaction timeout.
    pub fn txn_timeout(self, timeout: Duration) -> Self {
        self.set(ConfigKey::TxnTimeout, micros(timeout))
    }

    /// Overrides the page cache size.
    pub fn cache_size(self, bytes: u64) -> Self {
        self.set(ConfigKey::CacheSize, bytes)
    }

    /// Overrides the named database limit.
    pub fn max_dbs(self, max_dbs: u64) -> Self {
        self.set(ConfigKey::MaxDbs, max_dbs)
    }

    /// Returns the override for `key`, if any.
    pub fn get(&self, key: ConfigKey) -> Option<u64> {
        self.values.get(&key).copied()
    }

    /// Returns `true` if no setting is overridden.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the overridden settings.
    pub fn iter(&self) -> impl Iterator<Item = (ConfigKey, u64)> + '_ {
        self.values.iter().map(|(key, value)| (*key, *value))
    }

    /// Parses `key=value` pairs, e.g. `["max_locks=10000"]`.
    pub fn parse_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        pairs.into_iter().try_fold(Self::new(), |acc, pair| {
            let pair = pair.as_ref();
            let (key, value) =
                pair.split_once('=').ok_or_else(|| ConfigError::Malformed(pair.to_owned()))?;
            let key: ConfigKey = key.trim().parse()?;
            let value = value.trim().replace('_', "");
            let value = value
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue { key, value: value.clone() })?;
            Ok(acc.set(key, value))
        })
    }
}

impl FromIterator<(ConfigKey, u64)> for ConfigOverrides {
    fn from_iter<T: IntoIterator<Item = (ConfigKey, u64)>>(iter: T) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// A per-database option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    /// A boolean switch.
    Bool(bool),
    /// An integer setting.
    Int(i64),
    /// A free-form setting.
    Text(String),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Open-ended options consumed by collaborators when they create individual
/// databases inside an environment. Empty by default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    options: BTreeMap<String, ConfigValue>,
}

impl DatabaseConfig {
    /// Merges `overrides` into this configuration and returns the result.
    pub fn configure<I, K, V>(&mut self, overrides: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ConfigValue>,
    {
        self.options.extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Returns the option named `name`.
    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.options.get(name)
    }

    /// Number of options set.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Returns `true` if no option is set.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Iterates over the options.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }
}
