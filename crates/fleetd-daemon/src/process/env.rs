//! Environment overrides passed to spawned commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Variables a caller may set on a spawned command. Anything else is dropped.
pub const ALLOWED_ENV: [&str; 9] = [
    "EXPERIMENT",
    "JOB_SOURCE",
    "TESTING",
    "HOSTNAME",
    "HARDWARE",
    "ACTIVE",
    "PIO_VERSION",
    "FIRMWARE",
    "DEBUG",
];

pub fn is_allowed(key: &str) -> bool {
    ALLOWED_ENV.contains(&key)
}

/// Allow-listed environment overrides.
///
/// Every constructor filters, including deserialization, so a value of this
/// type never carries a key outside [`ALLOWED_ENV`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct EnvOverrides(BTreeMap<String, String>);

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key=value`. Returns false (and stores nothing) for disallowed keys.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if !is_allowed(&key) {
            debug!(key, "Dropping environment override outside the allow-list");
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<BTreeMap<String, String>> for EnvOverrides {
    fn from(raw: BTreeMap<String, String>) -> Self {
        raw.into_iter().collect()
    }
}

impl From<EnvOverrides> for BTreeMap<String, String> {
    fn from(env: EnvOverrides) -> Self {
        env.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        for (k, v) in iter {
            env.set(k, v);
        }
        env
    }
}
