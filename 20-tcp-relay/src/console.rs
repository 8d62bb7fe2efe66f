//! Line commands for the interactive client.
//!
//! Plain text is a chat message. Lines starting with `/` select the other
//! relay operations:
//!
//! - `/all <text>` - broadcast bytes to everyone, yourself included
//! - `/others <text>` - broadcast bytes to everyone else
//! - `/to <id> <text>` - send bytes to a single client
//! - `/store <label> <value>` - store a value on the relay
//! - `/get <label>` - fetch a stored value
//! - `/quit` - disconnect

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;

use crate::message::{ClientId, ClientToServer};

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Chat { text: String },
    All { text: String },
    Others { text: String },
    To { target: ClientId, text: String },
    Store { label: String, value: String },
    Get { label: String },
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            return Ok(ConsoleCommand::Chat {
                text: trimmed.to_string(),
            });
        };

        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        match (name.to_lowercase().as_str(), rest.is_empty()) {
            ("quit", _) => Ok(ConsoleCommand::Quit),
            ("all", false) => Ok(ConsoleCommand::All {
                text: rest.to_string(),
            }),
            ("others", false) => Ok(ConsoleCommand::Others {
                text: rest.to_string(),
            }),
            ("get", false) => Ok(ConsoleCommand::Get {
                label: rest.to_string(),
            }),
            ("to", false) => {
                let (target, text) = split_argument(rest)
                    .ok_or_else(|| anyhow!("/to requires a client id and text"))?;
                let target = target
                    .parse()
                    .with_context(|| format!("invalid client id '{target}'"))?;
                Ok(ConsoleCommand::To {
                    target,
                    text: text.to_string(),
                })
            }
            ("store", false) => {
                let (label, value) = split_argument(rest)
                    .ok_or_else(|| anyhow!("/store requires a label and a value"))?;
                Ok(ConsoleCommand::Store {
                    label: label.to_string(),
                    value: value.to_string(),
                })
            }
            ("all" | "others" | "get" | "to" | "store", true) => {
                Err(anyhow!("/{name} requires an argument"))
            }
            _ => Err(anyhow!(
                "unknown command '/{name}'. Try: /all, /others, /to, /store, /get, /quit"
            )),
        }
    }

    pub fn into_message(self) -> ClientToServer {
        match self {
            ConsoleCommand::Chat { text } => ClientToServer::BroadcastChatMessage { text },
            ConsoleCommand::All { text } => ClientToServer::BroadcastBytesAll {
                bytes: Bytes::from(text),
            },
            ConsoleCommand::Others { text } => ClientToServer::BroadcastBytesOther {
                bytes: Bytes::from(text),
            },
            ConsoleCommand::To { target, text } => ClientToServer::BinaryMessageTo {
                target,
                bytes: Bytes::from(text),
            },
            ConsoleCommand::Store { label, value } => ClientToServer::StoreData {
                label,
                bytes: Bytes::from(value),
            },
            ConsoleCommand::Get { label } => ClientToServer::RetrieveData { label },
            ConsoleCommand::Quit => ClientToServer::Disconnect,
        }
    }
}

fn split_argument(rest: &str) -> Option<(&str, &str)> {
    let (first, remainder) = rest.split_once(char::is_whitespace)?;
    let remainder = remainder.trim_start();
    if remainder.is_empty() {
        return None;
    }
    Some((first, remainder))
}
