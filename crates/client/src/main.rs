mod commands;
mod render;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use chess_session::{ClientConfig, Command, GameSession, HttpApi, SessionRuntime, Update};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::commands::{parse_line, Input, HELP};
use crate::ws::WsConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so they do not interleave with the board on stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env().context("invalid client configuration")?;
    tracing::info!(api = %config.api_base_url, ws = %config.ws_url, "starting chess client");

    let api = Arc::new(HttpApi::from_config(&config).context("failed to build HTTP client")?);
    let session = GameSession::new(config.session.clone());
    let (runtime, updates) = SessionRuntime::new(session, api, Arc::new(WsConnector), config.ws_url.clone());

    let (commands, command_rx) = mpsc::unbounded_channel();
    if let Some(token) = config.access_token.clone() {
        let _ = commands.send(Command::SetToken(token));
    }

    let runtime_task = tokio::spawn(runtime.run(command_rx));
    let printer = tokio::spawn(print_updates(updates));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(Input::Commands(cmds)) => {
                for cmd in cmds {
                    if commands.send(cmd).is_err() {
                        tracing::warn!("session runtime is gone");
                        break;
                    }
                }
            }
            Ok(Input::Help) => println!("{HELP}"),
            Ok(Input::Quit) => break,
            Ok(Input::Nothing) => {}
            Err(e) => println!("{e:#}"),
        }
    }

    let _ = commands.send(Command::Shutdown);
    match runtime_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("session runtime failed: {}", e),
        Err(e) => tracing::error!("session runtime panicked: {}", e),
    }
    let _ = printer.await;
    Ok(())
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<Update>) {
    let mut last_drawn: Option<(String, usize)> = None;
    while let Some(update) = updates.recv().await {
        for event in &update.events {
            if let Some(line) = render::event_line(event) {
                println!("{line}");
            }
        }
        if let Some(error) = &update.error {
            println!("refused: {error}");
        }

        let snapshot = &update.snapshot;
        let key = (snapshot.fen.clone(), snapshot.cursor);
        if last_drawn.as_ref() != Some(&key) {
            print!("{}", render::board(snapshot));
            if !snapshot.movetext.is_empty() {
                println!("{}", snapshot.movetext);
            }
            if let Some(review) = render::review_lines(snapshot) {
                println!("{review}");
            }
            last_drawn = Some(key);
        }
        println!("{}", render::status_line(snapshot));
    }
}
