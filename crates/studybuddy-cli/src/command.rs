//! Parsing of REPL input lines.

use std::path::PathBuf;

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Quit,

    /// A chat message, optionally carrying one file
    Message {
        text: String,
        attachment: Option<PathBuf>,
    },

    /// Unknown or malformed slash command
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        if !line.starts_with('/') {
            return Command::Message {
                text: line.to_string(),
                attachment: None,
            };
        }

        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match name {
            "/quit" | "/exit" => Command::Quit,
            "/help" => Command::Help,
            "/attach" => {
                let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if path.is_empty() {
                    Command::Invalid("usage: /attach <path> [message]".to_string())
                } else {
                    Command::Message {
                        text: text.trim().to_string(),
                        attachment: Some(PathBuf::from(path)),
                    }
                }
            }
            other => Command::Invalid(format!("unknown command {}", other)),
        }
    }
}

pub const HELP: &str = "\
Type a message and press Enter.

  /attach <path> [message]   send a file (.txt .py .cpp .cc .csv .docx .pdf) with a message
  /help                      show this help
  /quit                      end the session and save its history

Ctrl-C stops the answer being streamed; Ctrl-D ends the session.";
