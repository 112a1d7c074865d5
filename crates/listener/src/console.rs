//! Console toggle: one line per command on stdin.

use std::io::BufRead;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use crate::events::ListenerEvent;

pub(crate) const HELP: &str =
    "commands: <enter>/t = toggle, play, stop, status, q = quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Toggle,
    Play,
    Stop,
    Status,
    Quit,
}

pub(crate) fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Some(ConsoleCommand::Toggle),
        "play" => Some(ConsoleCommand::Play),
        "stop" => Some(ConsoleCommand::Stop),
        "status" | "i" => Some(ConsoleCommand::Status),
        "q" | "quit" | "exit" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Spawn the stdin reader. The thread ends quietly when stdin closes.
pub(crate) fn spawn_console(tx: Sender<ListenerEvent>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::debug!("console read failed: {e}");
                    break;
                }
            };
            match parse_command(&line) {
                Some(cmd) => {
                    if tx.send(ListenerEvent::Console(cmd)).is_err() {
                        break;
                    }
                }
                None => println!("{HELP}"),
            }
        }
        tracing::debug!("console closed");
    })
}
