//! Realmgate CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use realmgate::auth::KeySet;
use realmgate::config::{bootstrap, RelayConfig};
use realmgate::control::{ControlCommand, Controller};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays free for replies and tokens
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = RelayConfig {
        keys_path: cli.keys.clone(),
        auto_discover_realms: cli.auto_discover_realms,
        claim_namespace: cli.claim_namespace.clone(),
        challenge_timeout_claim: cli.challenge_timeout_claim.clone(),
    };

    match cli.command {
        Commands::CheckKeys => check_keys(&config.keys_path),
        Commands::Token {
            kid,
            issuer,
            audience,
            scope,
            expires_in,
            challenge_timeout,
        } => token(
            &config,
            &kid,
            TokenClaims {
                issuer,
                audience,
                scope,
                expires_in,
                challenge_timeout,
            },
        ),
        Commands::Control => control(&config).await,
    }
}

fn load_keys(path: &Path) -> Result<KeySet> {
    KeySet::load(path).with_context(|| format!("Failed to load key set: {}", path.display()))
}

fn check_keys(path: &Path) -> Result<()> {
    let keys = load_keys(path)?;

    println!("Key set: {}", path.display());
    if keys.is_empty() {
        println!("  (no keys)");
    }
    for kid in keys.key_ids() {
        if let Some(key) = keys.get(kid) {
            println!("  {} ({})", kid, key.alg());
        }
    }

    Ok(())
}

struct TokenClaims {
    issuer: Option<String>,
    audience: Vec<String>,
    scope: Option<String>,
    expires_in: Option<u64>,
    challenge_timeout: Option<u64>,
}

fn token(config: &RelayConfig, kid: &str, requested: TokenClaims) -> Result<()> {
    let path = &config.keys_path;
    let keys = load_keys(path)?;
    if keys.get(kid).is_none() {
        anyhow::bail!("No key '{}' in {}", kid, path.display());
    }
    let verifier = config.verifier(Arc::new(keys));

    let mut claims = serde_json::Map::new();
    if let Some(iss) = requested.issuer {
        claims.insert("iss".to_string(), iss.into());
    }
    let mut audience = requested.audience;
    match audience.len() {
        0 => {}
        1 => {
            claims.insert("aud".to_string(), audience.remove(0).into());
        }
        _ => {
            claims.insert("aud".to_string(), audience.into());
        }
    }
    if let Some(scope) = requested.scope {
        claims.insert("scope".to_string(), scope.into());
    }
    if let Some(secs) = requested.challenge_timeout {
        claims.insert(verifier.challenge_timeout_claim().to_string(), secs.into());
    }
    if let Some(secs) = requested.expires_in {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("System clock before Unix epoch")?
            .as_secs();
        claims.insert("exp".to_string(), (now + secs).into());
    }

    let token = verifier
        .sign(kid, &serde_json::Value::Object(claims))
        .with_context(|| format!("Failed to sign with key '{}'", kid))?;

    println!("{}", token);
    Ok(())
}

async fn control(config: &RelayConfig) -> Result<()> {
    let (keys, realms) = bootstrap(config)
        .with_context(|| format!("Failed to load key set: {}", config.keys_path.display()))?;
    let controller = Controller::new(Arc::new(realms));

    info!(keys = keys.len(), realms = controller.realms().realm_count(), "Control loop started");

    tokio::select! {
        result = control_loop(&controller) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping control loop");
        }
    }

    info!("Control loop stopped");
    Ok(())
}

async fn control_loop(controller: &Controller) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command: ControlCommand = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed control command");
                continue;
            }
        };

        let reply = controller.handle(command);
        let mut bytes = serde_json::to_vec(&reply)?;
        bytes.push(b'\n');
        stdout.write_all(&bytes).await?;
        stdout.flush().await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
