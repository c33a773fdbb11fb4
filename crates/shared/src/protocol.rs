//! Line-oriented control protocol: user input grammar, wire encoding, and
//! inbound line handling. Nothing in here performs I/O.

use crate::{domain::ChannelName, error::CommandError};

/// One parsed line of user input destined for the control resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundIntent {
    Join { channel: ChannelName },
    Part,
    Nick { name: String },
    Message { channel: ChannelName, text: String },
    Quit,
    /// Unknown `/`-command. Logged, never written.
    RawLog { text: String },
}

impl OutboundIntent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundIntent::Join { .. } => "join",
            OutboundIntent::Part => "part",
            OutboundIntent::Nick { .. } => "nick",
            OutboundIntent::Message { .. } => "msg",
            OutboundIntent::Quit => "quit",
            OutboundIntent::RawLog { .. } => "raw_log",
        }
    }
}

/// Parses a submitted line typed into the input box of `current`.
///
/// `Ok(None)` means the line produces nothing: plain text typed into a
/// read-only stream (`log`, `raw`) or a blank line.
pub fn parse_input(
    line: &str,
    current: &ChannelName,
) -> Result<Option<OutboundIntent>, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.starts_with('/') {
        return parse_command(line).map(Some);
    }

    if current.is_read_only() || line.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(OutboundIntent::Message {
        channel: current.clone(),
        text: line.to_string(),
    }))
}

fn parse_command(line: &str) -> Result<OutboundIntent, CommandError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = parts.split_first() else {
        return Ok(OutboundIntent::RawLog {
            text: line.to_string(),
        });
    };

    match command {
        "/j" => args
            .first()
            .map(|channel| OutboundIntent::Join {
                channel: ChannelName::from(*channel),
            })
            .ok_or_else(|| CommandError::missing(command, "channel")),
        "/n" => args
            .first()
            .map(|name| OutboundIntent::Nick {
                name: (*name).to_string(),
            })
            .ok_or_else(|| CommandError::missing(command, "name")),
        "/m" => match args {
            [] => Err(CommandError::missing(command, "channel")),
            [_] => Err(CommandError::missing(command, "text")),
            [channel, text @ ..] => Ok(OutboundIntent::Message {
                channel: ChannelName::from(*channel),
                text: text.join(" "),
            }),
        },
        "/p" => Ok(OutboundIntent::Part),
        "/q" => Ok(OutboundIntent::Quit),
        _ => Ok(OutboundIntent::RawLog {
            text: line.to_string(),
        }),
    }
}

/// Renders the wire line for `intent`, newline included. Part, quit and
/// unknown commands have no wire form.
pub fn encode(intent: &OutboundIntent) -> Option<String> {
    match intent {
        OutboundIntent::Join { channel } => Some(format!("join {channel}\n")),
        OutboundIntent::Nick { name } => Some(format!("nick {}\n", single_line(name))),
        OutboundIntent::Message { channel, text } => {
            Some(format!("msg {channel} {}\n", single_line(text)))
        }
        OutboundIntent::Part | OutboundIntent::Quit | OutboundIntent::RawLog { .. } => None,
    }
}

// An embedded line break would start a second command on the wire.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Reads one wire line back into the intent it encodes, if it is one.
pub fn decode_line(line: &str) -> Option<OutboundIntent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, rest) = line.split_once(' ')?;
    match verb {
        "join" if is_single_token(rest) => Some(OutboundIntent::Join {
            channel: ChannelName::from(rest),
        }),
        "nick" if is_single_token(rest) => Some(OutboundIntent::Nick {
            name: rest.to_string(),
        }),
        "msg" => {
            let (channel, text) = rest.split_once(' ')?;
            if channel.is_empty() {
                return None;
            }
            Some(OutboundIntent::Message {
                channel: ChannelName::from(channel),
                text: text.to_string(),
            })
        }
        _ => None,
    }
}

fn is_single_token(value: &str) -> bool {
    !value.is_empty() && !value.contains(char::is_whitespace)
}

/// A line received from the control resource, classified for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// The backend echoed a command it accepted.
    Echo(OutboundIntent),
    Text(String),
}

pub fn classify_inbound(line: &str) -> InboundLine {
    match decode_line(line) {
        Some(intent) => InboundLine::Echo(intent),
        None => InboundLine::Text(line.to_string()),
    }
}

/// Splits one inbound control chunk into lines. Nothing is held back for a
/// later chunk: an unterminated tail comes out as a line of its own.
pub fn chunk_lines(chunk: &[u8]) -> Vec<String> {
    if chunk.is_empty() {
        return Vec::new();
    }
    let body = chunk.strip_suffix(b"\n").unwrap_or(chunk);
    body.split(|byte| *byte == b'\n').map(decode_text).collect()
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
