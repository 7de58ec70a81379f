//! Line-oriented client protocol
//!
//! ```text
//! SET <key> <body...>   ->  OK | ERROR <reason>
//! GET <key>             ->  OK <body> | ERROR <reason>
//! DEL <key>             ->  OK | ERROR <reason>
//! ```
//!
//! Command names are case-insensitive. Lines are trimmed at both ends, so a
//! SET body runs to the last non-whitespace character and keeps its inner
//! whitespace.

use crate::common::{Error, Result};
use bytes::Bytes;
use std::fmt;

pub const SET_USAGE: &str = "Usage: SET <key> <body>";
pub const GET_USAGE: &str = "Usage: GET <key>";
pub const DEL_USAGE: &str = "Usage: DEL <key>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, body: Bytes },
    Get { key: String },
    Del { key: String },
}

impl Command {
    /// Parse one request line. Blank lines are `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_uppercase().as_str() {
            "SET" => {
                let (key, body) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| Error::Protocol(SET_USAGE.into()))?;
                if body.trim().is_empty() {
                    return Err(Error::Protocol(SET_USAGE.into()));
                }
                Command::Set {
                    key: key.to_string(),
                    body: Bytes::copy_from_slice(body.as_bytes()),
                }
            }
            "GET" => Command::Get {
                key: single_key(rest, GET_USAGE)?,
            },
            "DEL" => Command::Del {
                key: single_key(rest, DEL_USAGE)?,
            },
            _ => return Err(Error::Protocol("Unknown command".into())),
        };

        Ok(Some(command))
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. } | Command::Get { key } | Command::Del { key } => key,
        }
    }
}

fn single_key(rest: &str, usage: &str) -> Result<String> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(key), None) => Ok(key.to_string()),
        _ => Err(Error::Protocol(usage.into())),
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Set { key, body } => {
                write!(f, "SET {} {}", key, String::from_utf8_lossy(body))
            }
            Command::Get { key } => write!(f, "GET {}", key),
            Command::Del { key } => write!(f, "DEL {}", key),
        }
    }
}

/// One response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Value(Bytes),
    Error(String),
}

impl Response {
    pub fn error(err: &Error) -> Self {
        Response::Error(err.to_string())
    }

    /// Parse a response line as sent by the leader.
    pub fn parse(line: &str) -> Result<Response> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "OK" {
            return Ok(Response::Ok);
        }
        if let Some(body) = line.strip_prefix("OK ") {
            return Ok(Response::Value(Bytes::copy_from_slice(body.as_bytes())));
        }
        if let Some(reason) = line.strip_prefix("ERROR") {
            return Ok(Response::Error(reason.trim_start().to_string()));
        }
        Err(Error::Protocol(format!("Malformed response: {}", line)))
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => write!(f, "OK"),
            // Keep the reply on one line whatever the stored bytes are.
            Response::Value(body) => {
                let text = String::from_utf8_lossy(body);
                write!(f, "OK {}", text.replace(['\r', '\n'], " "))
            }
            Response::Error(reason) => {
                write!(f, "ERROR {}", reason.replace(['\r', '\n'], " "))
            }
        }
    }
}
