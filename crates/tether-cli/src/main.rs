//! # tether
//!
//! Command-line client for a Tether server. Prints every subscribed event
//! to stdout as `<type> <json>` and sends each stdin line `<type> [json]`
//! as a frame. Lines starting with `/` drive the connection directly:
//! `/offline`, `/online`, `/expire`, `/refresh <token>`, `/check`,
//! `/state`, `/quit`.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tether_client::{CallbackResult, TetherClient};
use tether_core::events;
use tether_settings::TetherSettings;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Tether command-line client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Connect to a Tether server and exchange frames")]
struct Cli {
    /// Server URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Bearer token presented on connect.
    #[arg(long)]
    token: String,

    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Event type to print. Repeatable.
    #[arg(long = "subscribe", value_name = "TYPE")]
    subscriptions: Vec<String>,
}

/// One parsed stdin line.
#[derive(Debug, PartialEq)]
enum Input {
    Send(String, Value),
    Offline,
    Online,
    Expire,
    Refresh(String),
    Check,
    State,
    Quit,
    Empty,
}

fn parse_line(line: &str) -> Result<Input> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let input = match head {
        "/offline" => Input::Offline,
        "/online" => Input::Online,
        "/expire" => Input::Expire,
        "/refresh" if !rest.is_empty() => Input::Refresh(rest.to_owned()),
        "/refresh" => bail!("usage: /refresh <token>"),
        "/check" => Input::Check,
        "/state" => Input::State,
        "/quit" => Input::Quit,
        cmd if cmd.starts_with('/') => bail!("unknown command: {cmd}"),
        frame_type => {
            let data = if rest.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(rest)
                    .unwrap_or_else(|_| Value::String(rest.to_owned()))
            };
            Input::Send(frame_type.to_owned(), data)
        }
    };
    Ok(input)
}

fn resolve_settings(cli: &Cli, path: &Path) -> Result<TetherSettings> {
    let mut settings = tether_settings::load_settings_from_path(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(url) = &cli.url {
        settings.client.url.clone_from(url);
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    settings.client.validate().context("Invalid client settings")?;
    Ok(settings)
}

fn print_events(client: &TetherClient, event_type: &str) {
    let name = event_type.to_owned();
    let _ = client.subscribe(event_type, move |data: &Value| -> CallbackResult {
        println!("{name} {data}");
        Ok(())
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(tether_settings::settings_path);
    let settings = resolve_settings(&cli, &path)?;

    if cli.json_logs {
        tether_logging::init_json_subscriber(&settings.logging.level);
    } else {
        tether_logging::init_subscriber(&settings.logging.level);
    }
    tracing::info!(url = %settings.client.url, "starting tether client");

    let (client, driver) =
        TetherClient::connect_ws(settings.client).context("Invalid client settings")?;
    for event_type in [
        events::CONNECTION_RESTORED,
        events::CONNECTION_LOST,
        events::CONNECTION_FAILED,
    ] {
        print_events(&client, event_type);
    }
    for event_type in &cli.subscriptions {
        print_events(&client, event_type);
    }

    let mut states = client.state_changes();
    let _state_log = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(%state, "connection state");
        }
    });

    client.connect(cli.token.as_str());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        match parse_line(&line) {
            Ok(Input::Send(frame_type, data)) => client.send(frame_type, data),
            Ok(Input::Offline) => client.network_offline(),
            Ok(Input::Online) => client.network_online(),
            Ok(Input::Expire) => client.token_expired(),
            Ok(Input::Refresh(token)) => client.token_refreshed(token),
            Ok(Input::Check) => client.check_liveness(),
            Ok(Input::State) => eprintln!("{}", client.get_state()),
            Ok(Input::Quit) => break,
            Ok(Input::Empty) => {}
            Err(e) => eprintln!("{e}"),
        }
    }

    client.teardown();
    driver.await.context("Connection driver panicked")?;
    Ok(())
}
