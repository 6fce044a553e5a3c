//! Warden policy simulator
//!
//! Offline tooling around the authorization core:
//! - `eval`: evaluate a policy file against an action, resource and context
//! - `derive-key`: print a scoped key for a protocol/region/service/date/identity
//! - `check-config`: load and validate an authorizer configuration file
//!
//! The master secret for `derive-key` is read from `WARDEN_SECRET_SIGNING_KEY`.

use anyhow::{Context as _, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;
use warden_authz::policy::{Context, PolicyDocument, PolicyEngine};
use warden_authz::{AuthorizerConfig, KeyScope, Protocol};

/// Warden policy simulator CLI
#[derive(Parser)]
#[command(name = "warden-policy-sim")]
#[command(about = "Evaluate Warden policies and scoped keys offline")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a policy document
    Eval {
        /// Path to a JSON policy document
        #[arg(short, long)]
        policy: PathBuf,

        #[arg(short, long)]
        action: String,

        #[arg(short, long)]
        resource: String,

        /// Context entries as KEY=VALUE, repeatable
        #[arg(short, long = "context", value_parser = parse_context_entry)]
        context: Vec<(String, String)>,
    },

    /// Derive a scoped key from the master secret
    DeriveKey {
        /// jwt, basic-auth or request-signing
        #[arg(long)]
        protocol: Protocol,

        #[arg(long)]
        region: String,

        #[arg(long)]
        service: String,

        /// YYYY-MM-DD, defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long, default_value = "")]
        identity: String,

        #[arg(long, env = "WARDEN_SECRET_SIGNING_KEY", hide_env_values = true)]
        secret: String,
    },

    /// Validate an authorizer configuration file
    CheckConfig {
        #[arg(short, long, default_value = "/etc/warden/authz.toml", env = "WARDEN_CONFIG")]
        config: PathBuf,
    },
}

fn parse_context_entry(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Eval {
            policy,
            action,
            resource,
            context,
        } => {
            let raw = std::fs::read_to_string(&policy)
                .with_context(|| format!("Failed to read policy {}", policy.display()))?;
            let document = PolicyDocument::from_json(&raw)?;
            info!("Loaded {} statements from {:?}", document.statement.len(), policy);

            let context: Context = context
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();

            let evaluation = PolicyEngine::allow(&document, &action, &resource, &context);
            let resources = PolicyEngine::allowed_resources(&document, &action, &context);

            println!("{:?}", evaluation);
            println!("{}", serde_json::to_string_pretty(&resources)?);
        }

        Command::DeriveKey {
            protocol,
            region,
            service,
            date,
            identity,
            secret,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let scope = KeyScope::new(protocol, region, service, date, identity);
            info!("Deriving {} key for {}", scope.protocol, scope.date);

            println!("{}", scope.derive(secret.as_bytes()).to_base64());
        }

        Command::CheckConfig { config } => {
            let loaded = AuthorizerConfig::load(&config)?;
            println!(
                "{}: ok (partition {}, region {}, service {}, {})",
                config.display(),
                loaded.service.partition,
                loaded.service.region,
                loaded.service.service,
                if loaded.remote.is_some() { "remote" } else { "local" }
            );
        }
    }

    Ok(())
}
