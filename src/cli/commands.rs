//! CLI command definitions

use clap::{Parser, Subcommand};
use realmgate::auth::DEFAULT_CHALLENGE_TIMEOUT_CLAIM;
use realmgate::config::{
    AUTO_DISCOVER_REALMS_ENV, CHALLENGE_TIMEOUT_CLAIM_ENV, CLAIM_NAMESPACE_ENV, DEFAULT_KEYS_PATH, KEYS_ENV,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "realmgate")]
#[command(about = "Authorization-aware stream relay", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the signing key set
    #[arg(long, env = KEYS_ENV, default_value = DEFAULT_KEYS_PATH, global = true)]
    pub keys: PathBuf,

    /// Resolve one realm per key id at startup
    #[arg(long, env = AUTO_DISCOVER_REALMS_ENV, global = true)]
    pub auto_discover_realms: bool,

    /// Namespace prefixed to private claim names
    #[arg(long, env = CLAIM_NAMESPACE_ENV, global = true)]
    pub claim_namespace: Option<String>,

    /// Challenge timeout claim name, relative to the namespace
    #[arg(long, env = CHALLENGE_TIMEOUT_CLAIM_ENV, default_value = DEFAULT_CHALLENGE_TIMEOUT_CLAIM, global = true)]
    pub challenge_timeout_claim: String,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the key set and list its key ids
    CheckKeys,

    /// Mint an HS256 bearer token signed by a key from the key set
    ///
    /// Examples:
    ///   realmgate token svcA --scope 'read write'
    ///   realmgate token svcA --issuer https://issuer --audience api --expires-in 600
    Token {
        /// Key id (realm) to sign with
        kid: String,

        /// Issuer claim
        #[arg(long)]
        issuer: Option<String>,

        /// Audience claim (can be repeated)
        #[arg(long)]
        audience: Vec<String>,

        /// Space-separated scope claim
        #[arg(long)]
        scope: Option<String>,

        /// Seconds until the token expires
        #[arg(long)]
        expires_in: Option<u64>,

        /// Challenge timeout in seconds, written to the namespaced claim
        #[arg(long)]
        challenge_timeout: Option<u64>,
    },

    /// Apply control commands read as JSON lines from stdin
    ///
    /// Each reply is written as one JSON line on stdout.
    Control,
}
