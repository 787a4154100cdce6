//! Terminal conversation view: input commands and live answer rendering.

use std::io::Write;
use std::path::PathBuf;

use dapur_chat::{TurnObserver, TurnPhase};
use dapur_core::types::{ConversationTurn, Role};
use uuid::Uuid;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    /// Upload a file for the next question. The storage path defaults to the
    /// local path.
    Attach {
        file: PathBuf,
        storage_path: Option<String>,
    },
    Retry,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Ask(line.to_string());
        };

        let mut words = rest.split_whitespace();
        match words.next() {
            Some("quit") | Some("exit") => Command::Quit,
            Some("retry") => Command::Retry,
            Some("attach") => match words.next() {
                Some(file) => Command::Attach {
                    file: PathBuf::from(file),
                    storage_path: words.next().map(str::to_string),
                },
                None => Command::Unknown(line.to_string()),
            },
            _ => Command::Unknown(line.to_string()),
        }
    }
}

/// Prints streamed answers as they arrive.
#[derive(Default)]
pub struct TerminalObserver;

impl TurnObserver for TerminalObserver {
    fn on_phase(&self, turn_id: Uuid, phase: TurnPhase) {
        tracing::debug!(turn_id = %turn_id, phase = %phase, "Turn phase changed");
        if phase == TurnPhase::Generating {
            print!("chef> ");
            let _ = std::io::stdout().flush();
        }
    }

    fn on_delta(&self, _turn_id: Uuid, delta: &str, _buffer: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }
}

/// Render a stored turn for the transcript shown on startup.
pub fn render_turn(turn: &ConversationTurn) -> String {
    let speaker = match turn.role {
        Role::User => "you",
        Role::Assistant => "chef",
    };
    match &turn.attachment_ref {
        Some(path) => format!("{speaker}> [{path}] {}", turn.text),
        None => format!("{speaker}> {}", turn.text),
    }
}
