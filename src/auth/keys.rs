//! Signing key set
//!
//! A key set is a JSON document of the form `{"keys": [{"kid": ..., "alg": ..., ...}]}`.
//! Only `kid` and `alg` are interpreted here; the remaining members are kept
//! as opaque key material for the verifier.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key set: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed key set: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("key at index {index} has no kid")]
    MissingKeyId { index: usize },

    #[error("key '{kid}' has no alg")]
    MissingAlgorithm { kid: String },

    #[error("duplicate kid '{0}'")]
    DuplicateKeyId(String),
}

#[derive(Debug, Deserialize)]
struct RawKeySet {
    keys: Vec<RawKey>,
}

#[derive(Debug, Deserialize)]
struct RawKey {
    kid: Option<String>,
    alg: Option<String>,
    #[serde(flatten)]
    material: Map<String, Value>,
}

/// A single validated key
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    kid: String,
    alg: String,
    material: Map<String, Value>,
}

impl Key {
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn alg(&self) -> &str {
        &self.alg
    }

    /// String-valued member of the key material (e.g. `kty`, `k`)
    pub fn param(&self, name: &str) -> Option<&str> {
        self.material.get(name).and_then(Value::as_str)
    }
}

/// Keys by identifier, read-only once loaded
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: BTreeMap<String, Key>,
}

impl KeySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a key set, rejecting it entirely if any key is invalid
    pub fn parse(bytes: &[u8]) -> Result<Self, KeyError> {
        let raw: RawKeySet = serde_json::from_slice(bytes)?;
        let mut keys = BTreeMap::new();

        for (index, key) in raw.keys.into_iter().enumerate() {
            let kid = key.kid.ok_or(KeyError::MissingKeyId { index })?;
            let alg = key.alg.ok_or_else(|| KeyError::MissingAlgorithm { kid: kid.clone() })?;

            if keys.contains_key(&kid) {
                return Err(KeyError::DuplicateKeyId(kid));
            }

            debug!(kid = %kid, alg = %alg, "Loaded key");
            keys.insert(
                kid.clone(),
                Key {
                    kid,
                    alg,
                    material: key.material,
                },
            );
        }

        Ok(Self { keys })
    }

    /// Load a key set from disk; a missing file yields an empty set
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No key set found, starting with no keys");
            return Ok(Self::empty());
        }

        let bytes = std::fs::read(path)?;
        let keys = Self::parse(&bytes)?;
        info!(path = %path.display(), count = keys.len(), "Key set loaded");
        Ok(keys)
    }

    pub fn get(&self, kid: &str) -> Option<&Key> {
        self.keys.get(kid)
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
