use anyhow::{Context, Result};
use std::io::BufRead;
use tokio::sync::mpsc;

pub const HELP: &str = "Commands: record | stop | flash on | flash off | toggle | status | help | quit";

/// Operator actions typed on the console
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Record,
    Stop,
    Flashlight(bool),
    ToggleStream,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let words: Vec<String> = line
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["record"] | ["rec"] => Some(ConsoleCommand::Record),
        ["stop"] => Some(ConsoleCommand::Stop),
        ["flash", "on"] => Some(ConsoleCommand::Flashlight(true)),
        ["flash", "off"] => Some(ConsoleCommand::Flashlight(false)),
        ["toggle"] => Some(ConsoleCommand::ToggleStream),
        ["status"] => Some(ConsoleCommand::Status),
        ["help"] | ["?"] => Some(ConsoleCommand::Help),
        ["quit"] | ["exit"] => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Read stdin on a dedicated thread
///
/// A blocking read cannot be cancelled, so it must not live on the runtime
/// or shutdown would wait for the next line.
pub fn spawn_stdin_reader(tx: mpsc::Sender<ConsoleCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        if let Err(e) = read_commands(stdin.lock(), tx) {
            tracing::error!("Console error: {:#}", e);
        }
    });
}

/// Read commands line by line and send them on `tx` until EOF
pub fn read_commands<R: BufRead>(input: R, tx: mpsc::Sender<ConsoleCommand>) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read console input")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(cmd) => {
                tracing::debug!("Console command: {:?}", cmd);
                if tx.blocking_send(cmd).is_err() {
                    break;
                }
            }
            None => tracing::warn!("Unknown command {:?}. {}", line.trim(), HELP),
        }
    }

    tracing::debug!("Console input closed");
    Ok(())
}
