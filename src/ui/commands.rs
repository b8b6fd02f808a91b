//! Console input parsing
//!
//! Plain text is a chat message. Lines starting with `/` are commands:
//!
//! | Command | Action |
//! |---------|--------|
//! | /listen [port] | Wait for a peer on a port |
//! | /connect [host] [port] | Dial a peer |
//! | /disconnect | Close the connection |
//! | /clear | Clear the transcript |
//! | /save [path] | Save the transcript |
//! | /status | Show connection state |
//! | /help | Show commands |
//! | /quit | Exit |
//!
//! A literal leading slash can be sent by doubling it: `//shrug`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0} is not a valid port number.")]
    InvalidPort(String),

    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),

    #[error("Too many arguments for /{0}")]
    TooManyArgs(&'static str),
}

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Chat text to send
    Message(String),
    Listen { port: Option<u16> },
    Connect { host: Option<String>, port: Option<u16> },
    Disconnect,
    Clear,
    Save { path: Option<PathBuf> },
    Status,
    Help,
    Quit,
    /// Blank input
    Nothing,
}

/// Validate a port number typed by the user
pub fn parse_port(text: &str) -> Result<u16, CommandError> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| CommandError::InvalidPort(text.trim().to_string()))
}

/// Split `host:port` into its parts; a bare host keeps the port unset.
pub fn parse_target(text: &str) -> Result<(String, Option<u16>), CommandError> {
    // Bracketed IPv6 literal, e.g. [::1]:1501
    if let Some(rest) = text.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(parse_port(p)?),
                None => None,
            };
            return Ok((host.to_string(), port));
        }
    }

    match text.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), Some(parse_port(port)?))),
        _ => Ok((text.to_string(), None)),
    }
}

/// Parse one line of console input
pub fn parse(input: &str) -> Result<Command, CommandError> {
    let line = input.trim_end_matches(['\r', '\n']);

    if line.trim().is_empty() {
        return Ok(Command::Nothing);
    }

    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Command::Message(format!("/{}", escaped)));
    }

    let Some(body) = line.strip_prefix('/') else {
        return Ok(Command::Message(line.to_string()));
    };

    let body = body.trim_start();
    let mut words = body.split_whitespace();
    let name = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match name.as_str() {
        "listen" | "l" => {
            max_args(&args, 1, "listen")?;
            Command::Listen {
                port: args.first().map(|p| parse_port(p)).transpose()?,
            }
        }
        "connect" | "c" => {
            max_args(&args, 2, "connect")?;
            match args.as_slice() {
                [] => Command::Connect { host: None, port: None },
                [target] => {
                    let (host, port) = parse_target(target)?;
                    Command::Connect { host: Some(host), port }
                }
                [host, port, ..] => Command::Connect {
                    host: Some(host.to_string()),
                    port: Some(parse_port(port)?),
                },
            }
        }
        "disconnect" | "close" => {
            max_args(&args, 0, "disconnect")?;
            Command::Disconnect
        }
        "clear" => {
            max_args(&args, 0, "clear")?;
            Command::Clear
        }
        "save" => {
            // Paths may contain spaces
            let path = body["save".len()..].trim();
            Command::Save {
                path: (!path.is_empty()).then(|| PathBuf::from(path)),
            }
        }
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => return Err(CommandError::Unknown(name)),
    };

    Ok(command)
}

fn max_args(args: &[&str], max: usize, name: &'static str) -> Result<(), CommandError> {
    if args.len() > max {
        Err(CommandError::TooManyArgs(name))
    } else {
        Ok(())
    }
}
