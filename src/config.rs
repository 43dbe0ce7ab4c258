//! Relay configuration and startup wiring

use crate::auth::{HmacVerifier, KeyError, KeySet, RealmRegistry, DEFAULT_CHALLENGE_TIMEOUT_CLAIM};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_KEYS_PATH: &str = "keys.jwk";
pub const KEYS_ENV: &str = "REALMGATE_KEYS";
pub const AUTO_DISCOVER_REALMS_ENV: &str = "REALMGATE_AUTO_DISCOVER_REALMS";
pub const CLAIM_NAMESPACE_ENV: &str = "REALMGATE_CLAIM_NAMESPACE";
pub const CHALLENGE_TIMEOUT_CLAIM_ENV: &str = "REALMGATE_CHALLENGE_TIMEOUT_CLAIM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Key set used to verify bearer credentials
    pub keys_path: PathBuf,
    /// Resolve one realm per key id at startup
    pub auto_discover_realms: bool,
    /// Prefix for private claims, e.g. `https://example.com/`
    pub claim_namespace: Option<String>,
    /// Challenge timeout claim name, relative to the namespace
    pub challenge_timeout_claim: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            keys_path: PathBuf::from(DEFAULT_KEYS_PATH),
            auto_discover_realms: false,
            claim_namespace: None,
            challenge_timeout_claim: DEFAULT_CHALLENGE_TIMEOUT_CLAIM.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            keys_path: std::env::var(KEYS_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.keys_path),
            auto_discover_realms: std::env::var(AUTO_DISCOVER_REALMS_ENV)
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.auto_discover_realms),
            claim_namespace: std::env::var(CLAIM_NAMESPACE_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty()),
            challenge_timeout_claim: std::env::var(CHALLENGE_TIMEOUT_CLAIM_ENV)
                .unwrap_or(defaults.challenge_timeout_claim),
        }
    }

    /// Claim namespace with exactly one trailing slash appended if missing
    pub fn canonical_claim_namespace(&self) -> Option<String> {
        self.claim_namespace.as_deref().map(canonicalize_namespace)
    }

    /// Challenge timeout claim name as it appears in a credential
    pub fn qualified_challenge_timeout_claim(&self) -> String {
        match self.canonical_claim_namespace() {
            Some(namespace) => format!("{namespace}{}", self.challenge_timeout_claim),
            None => self.challenge_timeout_claim.clone(),
        }
    }

    /// Verifier over `keys` reading namespaced claims per this configuration
    pub fn verifier(&self, keys: Arc<KeySet>) -> HmacVerifier {
        HmacVerifier::new(keys).with_challenge_timeout_claim(self.qualified_challenge_timeout_claim())
    }
}

fn canonicalize_namespace(namespace: &str) -> String {
    let namespace = namespace.trim();
    if namespace.ends_with('/') {
        namespace.to_string()
    } else {
        format!("{namespace}/")
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load the key set and, if configured, resolve a realm for each key id.
///
/// Key set errors are fatal. A realm that cannot be allocated is logged and
/// skipped; credentials signed by that key then carry no authorization.
pub fn bootstrap(config: &RelayConfig) -> Result<(KeySet, RealmRegistry), KeyError> {
    let keys = KeySet::load(&config.keys_path)?;
    let realms = RealmRegistry::new();

    if config.auto_discover_realms {
        for kid in keys.key_ids() {
            let authorization = realms.resolve_realm(kid);
            if authorization.is_none() {
                warn!(kid = kid, "No realm bit left for key");
            } else {
                info!(kid = kid, authorization = %authorization, "Discovered realm");
            }
        }
    }

    Ok((keys, realms))
}
