// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! LCP broker host.
//!
//! Reads one JSON operation per line on stdin and writes one JSON outcome
//! per line on stdout. Logs go to stderr.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lcp_broker::config::{AdapterConfig, Config, ServerConfig};
use lcp_broker::{Broker, BrokerError, Operation, Outcome};

/// Command-line arguments for the broker.
#[derive(Parser, Debug)]
#[command(name = "lcp-broker")]
#[command(about = "Language servers and debug adapters behind synchronous operations")]
#[command(version = env!("LCP_VERSION"))]
struct Args {
    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive (e.g. "lcp_broker=debug"). `RUST_LOG` also applies.
    #[arg(long)]
    log: Option<String>,

    /// Session idle timeout in seconds before eviction.
    /// Overrides config file if set (default in config is 1800).
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Language servers in "lang:command" format (e.g., "rust:rust-analyzer").
    /// Can be specified multiple times. These override the config file.
    #[arg(long = "lsp")]
    lsps: Vec<String>,

    /// Debug adapters in "lang:command" format (e.g., "python:python3 -m debugpy.adapter").
    #[arg(long = "adapter")]
    adapters: Vec<String>,
}

/// Splits "lang:program arg..." into its parts.
fn parse_command_spec(spec: &str) -> Result<(String, String, Vec<String>)> {
    let (lang, command) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid spec: {spec}. Expected 'lang:command'"))?;
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow!("command cannot be empty"))?
        .to_string();
    let args = parts.map(ToString::to_string).collect();
    Ok((lang.trim().to_string(), program, args))
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.clone())?;

    if let Some(timeout) = args.idle_timeout {
        config.idle_timeout = timeout;
    }

    for spec in &args.lsps {
        let (lang, command, args) = parse_command_spec(spec)?;
        config.server.insert(
            lang,
            ServerConfig {
                command,
                args,
                initialization_options: None,
            },
        );
    }

    for spec in &args.adapters {
        let (lang, command, args) = parse_command_spec(spec)?;
        config.adapter.insert(
            lang,
            AdapterConfig {
                command,
                args,
                adapter_id: None,
                launch_defaults: None,
            },
        );
    }

    Ok(config)
}

async fn handle_line(broker: &Broker, line: &str) -> Outcome {
    match serde_json::from_str::<Operation>(line) {
        Ok(operation) => broker.handle(operation).await,
        Err(e) => Outcome::failure(&BrokerError::InvalidArgument(format!(
            "Malformed operation: {e}"
        ))),
    }
}

async fn serve(broker: &Broker) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Broker ready, waiting for operations on stdin");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        };
        let Some(line) = line else {
            info!("stdin closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        debug!("Received: {}", line);
        let outcome = handle_line(broker, line).await;
        let mut encoded = serde_json::to_string(&outcome)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let directive = args.log.as_deref().unwrap_or("lcp_broker=info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    let broker = Broker::new(config);
    broker.start();

    let result = serve(&broker).await;
    if let Err(e) = &result {
        warn!("Serve loop ended with error: {:#}", e);
    }

    info!("Shutting down sessions");
    broker.shutdown().await;
    result
}
